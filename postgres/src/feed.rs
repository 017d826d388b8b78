//! Change feed over `LISTEN/NOTIFY`.

use crate::rows::{ChangeNotice, fetch_item, fetch_order};
use cafe_orders_core::change_feed::{ChangeEvent, ChangeFeed, ChangeFeedError, ChangeStream};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::future::Future;
use std::pin::Pin;

/// Streams committed writes from [`PostgresCatalogStore`](crate::PostgresCatalogStore).
///
/// Each notice names a record; the feed reads that record's current state
/// and yields it. A record deleted before it is read is skipped.
///
/// If the listener connection drops, notices sent meanwhile are lost. The
/// stream reports this as [`ChangeFeedError::TransportError`] and keeps
/// going once the listener reconnects; subscribers should re-read the store.
#[derive(Clone, Debug)]
pub struct PostgresChangeFeed {
    pool: PgPool,
    channel: String,
}

impl PostgresChangeFeed {
    /// Listen on `channel` using connections from `pool`.
    #[must_use]
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// The channel this feed listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

async fn resolve(pool: &PgPool, payload: &str) -> Result<Option<ChangeEvent>, ChangeFeedError> {
    let notice: ChangeNotice = serde_json::from_str(payload)
        .map_err(|e| ChangeFeedError::DeserializationFailed(format!("{e}: {payload}")))?;

    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| ChangeFeedError::TransportError(e.to_string()))?;

    let change = match notice {
        ChangeNotice::Item(id) => fetch_item(&mut conn, &id)
            .await
            .map_err(|e| ChangeFeedError::TransportError(e.to_string()))?
            .map(ChangeEvent::ItemChanged),
        ChangeNotice::Order(id) => fetch_order(&mut conn, &id)
            .await
            .map_err(|e| ChangeFeedError::TransportError(e.to_string()))?
            .map(ChangeEvent::OrderChanged),
    };
    Ok(change)
}

impl ChangeFeed for PostgresChangeFeed {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>> {
        Box::pin(async move {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(|e| ChangeFeedError::SubscriptionFailed(e.to_string()))?;
            listener
                .listen(&self.channel)
                .await
                .map_err(|e| ChangeFeedError::SubscriptionFailed(e.to_string()))?;

            tracing::info!(channel = %self.channel, "Listening for catalog changes");

            let pool = self.pool.clone();
            let stream: ChangeStream = Box::pin(async_stream::stream! {
                loop {
                    match listener.try_recv().await {
                        Ok(Some(notification)) => match resolve(&pool, notification.payload()).await {
                            Ok(Some(change)) => yield Ok(change),
                            Ok(None) => tracing::debug!("Changed record no longer exists"),
                            Err(error) => yield Err(error),
                        },
                        Ok(None) => {
                            tracing::warn!("Change listener connection lost, reconnecting");
                            yield Err(ChangeFeedError::TransportError(
                                "listener connection lost".to_string(),
                            ));
                        }
                        Err(error) => {
                            tracing::error!(error = %error, "Change listener failed");
                            yield Err(ChangeFeedError::TransportError(error.to_string()));
                            break;
                        }
                    }
                }
            });
            Ok(stream)
        })
    }
}

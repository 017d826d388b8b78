//! Viewer subscriptions and their leases.
//!
//! A [`Subscription`] watches one view of the projected state and yields a
//! new value only when that view actually changes. Each subscription holds a
//! [`Lease`] counted by the projector; dropping the subscription, calling
//! [`Subscription::unsubscribe`], or closing the [`ViewerScope`] that tracks
//! it releases the lease exactly once.

use crate::state::ProjectionState;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

#[derive(Debug)]
struct LeaseInner {
    released: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl LeaseInner {
    fn release(&self) -> bool {
        let released = self.released.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        });
        if released {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        released
    }
}

/// Registration of one live subscription with the projector.
///
/// Released on drop.
#[derive(Debug)]
pub struct Lease {
    inner: Arc<LeaseInner>,
}

impl Lease {
    pub(crate) fn acquire(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        let (released, _) = watch::channel(false);
        Self {
            inner: Arc::new(LeaseInner { released, active }),
        }
    }

    /// Whether the lease has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        *self.inner.released.borrow()
    }

    /// Release the lease. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    fn watch_release(&self) -> watch::Receiver<bool> {
        self.inner.released.subscribe()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.inner.release();
    }
}

type Selector<T> = Box<dyn Fn(&ProjectionState) -> T + Send + Sync>;

/// A live view of the projected state.
pub struct Subscription<T> {
    state: watch::Receiver<Arc<ProjectionState>>,
    select: Selector<T>,
    current: T,
    released: watch::Receiver<bool>,
    lease: Lease,
}

impl<T> Subscription<T>
where
    T: Clone + PartialEq,
{
    pub(crate) fn new(
        mut state: watch::Receiver<Arc<ProjectionState>>,
        select: Selector<T>,
        lease: Lease,
    ) -> Self {
        let current = select(&state.borrow_and_update());
        let released = lease.watch_release();
        Self {
            state,
            select,
            current,
            released,
            lease,
        }
    }

    /// The value as of the last change seen.
    #[must_use]
    pub const fn current(&self) -> &T {
        &self.current
    }

    /// Wait for the view to change and return the new value.
    ///
    /// Projected updates that leave this view unchanged are skipped. Returns
    /// `None` once the subscription is released or the projector stops.
    pub async fn changed(&mut self) -> Option<T> {
        loop {
            if *self.released.borrow() {
                return None;
            }

            tokio::select! {
                changed = self.state.changed() => changed.ok()?,
                _ = self.released.changed() => return None,
            }

            let next = (self.select)(&self.state.borrow_and_update());
            if next != self.current {
                self.current = next.clone();
                return Some(next);
            }
        }
    }

    /// Whether this subscription still receives changes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.lease.is_released()
    }

    /// Stop receiving changes.
    pub fn unsubscribe(self) {
        self.lease.release();
    }
}

impl<T: fmt::Debug> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("current", &self.current)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// Every subscription one viewer holds, released together on teardown.
///
/// The scope does not keep subscriptions alive; a subscription dropped
/// earlier has already released its own lease.
#[derive(Debug, Default)]
pub struct ViewerScope {
    leases: Vec<Weak<LeaseInner>>,
}

impl ViewerScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription` with this scope and hand it back.
    pub fn track<T>(&mut self, subscription: Subscription<T>) -> Subscription<T> {
        self.leases.retain(|lease| lease.strong_count() > 0);
        self.leases.push(Arc::downgrade(&subscription.lease.inner));
        subscription
    }

    /// Number of tracked subscriptions still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leases
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|lease| !*lease.released.borrow())
            .count()
    }

    /// Whether no tracked subscription is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every tracked subscription. Returns how many were still live.
    pub fn close(&mut self) -> usize {
        self.leases
            .drain(..)
            .filter_map(|lease| lease.upgrade())
            .filter(|lease| lease.release())
            .count()
    }
}

impl Drop for ViewerScope {
    fn drop(&mut self) {
        let released = self.close();
        if released > 0 {
            tracing::debug!(released, "Viewer scope closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_releases_once() {
        let active = Arc::new(AtomicUsize::new(0));
        let lease = Lease::acquire(Arc::clone(&active));
        assert_eq!(active.load(Ordering::SeqCst), 1);

        assert!(lease.release());
        assert!(!lease.release());
        drop(lease);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scope_close_releases_tracked_subscriptions() {
        let active = Arc::new(AtomicUsize::new(0));
        let (_state_tx, state_rx) = watch::channel(Arc::new(ProjectionState::default()));

        let mut scope = ViewerScope::new();
        let first = scope.track(Subscription::new(
            state_rx.clone(),
            Box::new(ProjectionState::item_count),
            Lease::acquire(Arc::clone(&active)),
        ));
        let second = scope.track(Subscription::new(
            state_rx,
            Box::new(ProjectionState::order_count),
            Lease::acquire(Arc::clone(&active)),
        ));
        assert_eq!(scope.len(), 2);

        drop(second);
        assert_eq!(scope.len(), 1);
        assert_eq!(active.load(Ordering::SeqCst), 1);

        assert_eq!(scope.close(), 1);
        assert!(!first.is_active());
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}

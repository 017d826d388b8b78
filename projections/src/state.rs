//! The projected read model.

use cafe_orders_core::change_feed::ChangeEvent;
use cafe_orders_core::ids::{ItemId, OrderId, UserId};
use cafe_orders_core::item::Item;
use cafe_orders_core::order::Order;
use std::collections::HashMap;

/// Items and orders as last seen on the change feed.
///
/// Applying a change is an upsert keyed by id. A change whose `version` is
/// lower than the record already held is dropped, so redelivered or reordered
/// changes never move a record backwards. Versions are bumped by the store on
/// every write, so writer clock skew has no effect here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionState {
    items: HashMap<ItemId, Item>,
    orders: HashMap<OrderId, Order>,
}

/// One customer's orders, as shown on their order history page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerOrders {
    /// Orders not yet completed, oldest first.
    pub current: Vec<Order>,
    /// Completed orders, most recent first.
    pub past: Vec<Order>,
}

impl ProjectionState {
    /// Build a state from a full read of the store.
    #[must_use]
    pub fn hydrate(items: Vec<Item>, orders: Vec<Order>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.id.clone(), item)).collect(),
            orders: orders
                .into_iter()
                .map(|order| (order.id.clone(), order))
                .collect(),
        }
    }

    /// Apply one change. Returns `false` when it was stale.
    pub fn apply(&mut self, change: ChangeEvent) -> bool {
        match change {
            ChangeEvent::ItemChanged(item) => match self.items.get(&item.id) {
                Some(held) if held.version > item.version => false,
                _ => {
                    self.items.insert(item.id.clone(), item);
                    true
                }
            },
            ChangeEvent::OrderChanged(order) => match self.orders.get(&order.id) {
                Some(held) if held.version > order.version => false,
                _ => {
                    self.orders.insert(order.id.clone(), order);
                    true
                }
            },
        }
    }

    /// Replace this state with a fresh store read, keeping any record this
    /// state holds that is newer than the read.
    ///
    /// Records missing from the read are dropped.
    pub fn merge_hydrated(&mut self, fresh: Self) {
        let Self { items, orders } = fresh;
        let mut previous = std::mem::replace(self, Self { items, orders });
        for (_, item) in previous.items.drain() {
            if self.items.contains_key(&item.id) {
                self.apply(ChangeEvent::ItemChanged(item));
            }
        }
        for (_, order) in previous.orders.drain() {
            if self.orders.contains_key(&order.id) {
                self.apply(ChangeEvent::OrderChanged(order));
            }
        }
    }

    /// Latest record of one item.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// Latest record of one order.
    #[must_use]
    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Number of items held.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Number of orders held.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Every order that is not completed, oldest first.
    #[must_use]
    pub fn open_orders(&self) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .values()
            .filter(|order| order.status.is_open())
            .cloned()
            .collect();
        sort_oldest_first(&mut open);
        open
    }

    /// One customer's orders split on completion.
    #[must_use]
    pub fn customer_orders(&self, user_id: &UserId) -> CustomerOrders {
        let (mut current, mut past): (Vec<Order>, Vec<Order>) = self
            .orders
            .values()
            .filter(|order| &order.user_id == user_id)
            .cloned()
            .partition(|order| order.status.is_open());
        sort_oldest_first(&mut current);
        sort_oldest_first(&mut past);
        past.reverse();
        CustomerOrders { current, past }
    }
}

fn sort_oldest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cafe_orders_core::money::Money;
    use cafe_orders_core::order::{OrderLine, OrderStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).single().unwrap_or_default()
            + Duration::minutes(minutes)
    }

    fn item(stock: u32, version: u64) -> Item {
        Item {
            id: ItemId::new("item-latte"),
            name: "Latte".into(),
            unit_price: Money::from_cents(450),
            stock,
            description: None,
            category: None,
            img: None,
            created_at: at(0),
            updated_at: at(0),
            version,
        }
    }

    fn order(id: &str, user: &str, status: OrderStatus, created: i64) -> Order {
        Order {
            id: OrderId::new(id),
            user_id: UserId::new(user),
            email: format!("{user}@example.com"),
            status,
            taxes: Money::ZERO,
            total: Money::from_cents(450),
            items: vec![OrderLine {
                item_id: ItemId::new("item-latte"),
                name: "Latte".into(),
                quantity: 1,
                unit_price: Money::from_cents(450),
            }],
            created_at: at(created),
            updated_at: at(created),
            version: 1,
        }
    }

    #[test]
    fn stale_changes_are_ignored() {
        let mut state = ProjectionState::default();
        assert!(state.apply(ChangeEvent::ItemChanged(item(2, 5))));
        assert!(!state.apply(ChangeEvent::ItemChanged(item(5, 1))));
        assert_eq!(state.item(&ItemId::new("item-latte")).map(|i| i.stock), Some(2));

        // Redelivery of the same change is harmless
        assert!(state.apply(ChangeEvent::ItemChanged(item(2, 5))));
        assert_eq!(state.item_count(), 1);
    }

    #[test]
    fn later_version_wins_even_with_an_older_timestamp() {
        let mut state = ProjectionState::hydrate(
            vec![],
            vec![order("order-1", "ada", OrderStatus::Received, 10)],
        );

        let mut preparing = order("order-1", "ada", OrderStatus::Preparing, 10);
        preparing.updated_at = at(9);
        preparing.version = 2;

        assert!(state.apply(ChangeEvent::OrderChanged(preparing)));
        assert_eq!(
            state.order(&OrderId::new("order-1")).map(|o| o.status),
            Some(OrderStatus::Preparing)
        );
    }

    #[test]
    fn open_orders_are_oldest_first_without_completed() {
        let state = ProjectionState::hydrate(
            vec![],
            vec![
                order("order-b", "ada", OrderStatus::Ready, 2),
                order("order-a", "grace", OrderStatus::Received, 1),
                order("order-c", "ada", OrderStatus::Completed, 0),
            ],
        );

        let open = state.open_orders();
        let ids: Vec<&str> = open.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["order-a", "order-b"]);
    }

    #[test]
    fn customer_orders_split_on_completion() {
        let state = ProjectionState::hydrate(
            vec![],
            vec![
                order("order-1", "ada", OrderStatus::Completed, 0),
                order("order-2", "ada", OrderStatus::Completed, 1),
                order("order-3", "ada", OrderStatus::Preparing, 2),
                order("order-4", "grace", OrderStatus::Received, 3),
            ],
        );

        let orders = state.customer_orders(&UserId::new("ada"));
        let current: Vec<&str> = orders.current.iter().map(|o| o.id.as_str()).collect();
        let past: Vec<&str> = orders.past.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(current, vec!["order-3"]);
        assert_eq!(past, vec!["order-2", "order-1"]);
    }

    #[test]
    fn merge_keeps_newer_local_records() {
        let mut state = ProjectionState::default();
        state.apply(ChangeEvent::ItemChanged(item(1, 9)));

        state.merge_hydrated(ProjectionState::hydrate(vec![item(4, 3)], vec![]));
        assert_eq!(state.item(&ItemId::new("item-latte")).map(|i| i.stock), Some(1));

        state.merge_hydrated(ProjectionState::hydrate(vec![item(7, 12)], vec![]));
        assert_eq!(state.item(&ItemId::new("item-latte")).map(|i| i.stock), Some(7));

        state.merge_hydrated(ProjectionState::default());
        assert_eq!(state.item_count(), 0);
    }
}

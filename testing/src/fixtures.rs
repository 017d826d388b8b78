//! Catalog and principal fixtures.
//!
//! Every fixture is stamped with the [`test_clock`](crate::test_clock) time so
//! results are reproducible.

use crate::mocks::test_clock;
use cafe_orders_core::environment::Clock;
use cafe_orders_core::identity::Principal;
use cafe_orders_core::ids::ItemId;
use cafe_orders_core::item::Item;
use cafe_orders_core::money::Money;

/// An item with the given id, name, price and stock.
#[must_use]
pub fn item(id: &str, name: &str, unit_price_cents: i64, stock: u32) -> Item {
    let now = test_clock().now();
    Item {
        id: ItemId::new(id),
        name: name.to_string(),
        unit_price: Money::from_cents(unit_price_cents),
        stock,
        description: None,
        category: None,
        img: None,
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

/// Item `item-{index}` named `Item {index}`, matching the ids produced by
/// [`properties::cart_lines`](crate::properties::cart_lines).
#[must_use]
pub fn numbered_item(index: usize, unit_price_cents: i64, stock: u32) -> Item {
    item(
        &format!("item-{index}"),
        &format!("Item {index}"),
        unit_price_cents,
        stock,
    )
}

/// Id of the [`latte`] fixture.
#[must_use]
pub fn latte_id() -> ItemId {
    ItemId::new("item-latte")
}

/// A $4.50 latte in the drinks category.
#[must_use]
pub fn latte(stock: u32) -> Item {
    let mut latte = item("item-latte", "Latte", 450, stock);
    latte.category = Some("drinks".to_string());
    latte
}

/// Id of the [`muffin`] fixture.
#[must_use]
pub fn muffin_id() -> ItemId {
    ItemId::new("item-muffin")
}

/// A $3.25 blueberry muffin in the pastries category.
#[must_use]
pub fn muffin(stock: u32) -> Item {
    let mut muffin = item("item-muffin", "Muffin", 325, stock);
    muffin.category = Some("pastries".to_string());
    muffin.description = Some("Blueberry".to_string());
    muffin
}

/// Id of the [`scone`] fixture.
#[must_use]
pub fn scone_id() -> ItemId {
    ItemId::new("item-scone")
}

/// A $3.00 scone in the pastries category.
#[must_use]
pub fn scone(stock: u32) -> Item {
    let mut scone = item("item-scone", "Scone", 300, stock);
    scone.category = Some("pastries".to_string());
    scone
}

/// A signed-in customer.
#[must_use]
pub fn customer() -> Principal {
    Principal::customer("user-ada", "ada@example.com")
}

/// A second customer, for concurrency scenarios.
#[must_use]
pub fn other_customer() -> Principal {
    Principal::customer("user-grace", "grace@example.com")
}

/// A store administrator.
#[must_use]
pub fn admin() -> Principal {
    Principal::admin("user-barista", "barista@example.com")
}

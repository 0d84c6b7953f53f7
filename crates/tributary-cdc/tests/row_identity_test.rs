//! Row key stability

mod common;

use common::{col, order_row, orders_fixture, pk};
use tributary_cdc::row_identity::{field_alias, RowKeyer, TableKeyer};
use tributary_rdbc::schema::{CanonicalType, TableDescriptor};
use tributary_rdbc::types::Row;
use tributary_rdbc::Value;

fn order_lines() -> TableDescriptor {
    TableDescriptor::new("order_lines", "1")
        .with_column(pk("order_id"))
        .with_column(pk("line_no"))
        .with_column(col("sku", CanonicalType::Text))
}

fn events() -> TableDescriptor {
    TableDescriptor::new("events", "1")
        .with_column(col("kind", CanonicalType::Text))
        .with_column(col("payload", CanonicalType::Text))
}

#[test]
fn test_composite_primary_key_ignores_ordinal() {
    let keyer = TableKeyer::new(&order_lines());
    let a = Row::from_pairs([
        ("order_id", Value::from(7i64)),
        ("line_no", Value::from(2i64)),
        ("sku", Value::from("A-1")),
    ]);
    let b = Row::from_pairs([
        ("order_id", Value::from(7i64)),
        ("line_no", Value::from(2i64)),
        ("sku", Value::from("B-9")),
    ]);
    assert_eq!(keyer.key(&a, 1), keyer.key(&b, 4000));

    let other = Row::from_pairs([("order_id", Value::from(7i64)), ("line_no", Value::from(3i64))]);
    assert_ne!(keyer.key(&a, 1), keyer.key(&other, 1));
}

#[test]
fn test_no_primary_key_uses_ordinal() {
    let keyer = TableKeyer::new(&events());
    assert!(!keyer.has_primary_key());
    let row = Row::from_pairs([("kind", "click"), ("payload", "{}")]);
    assert_ne!(keyer.key(&row, 1), keyer.key(&row, 2));
    assert_eq!(keyer.key(&row, 2), keyer.key(&row, 2));
}

#[test]
fn test_aliased_and_plain_keys_agree() {
    let tables = orders_fixture();
    let aliased = RowKeyer::for_tables(&tables[..1]);
    let plain = RowKeyer::plain(&tables[0]);

    let extracted = order_row(42, 10.5);
    let captured = Row::from_pairs([
        ("id", Value::from(42i64)),
        ("customer_id", Value::from(1i64)),
        ("total", Value::from(99.0)),
    ]);
    assert_eq!(aliased.key(&extracted, 1), plain.key(&captured, 17));
}

#[test]
fn test_join_key_covers_every_table() {
    let tables = orders_fixture();
    let keyer = RowKeyer::for_tables(&tables);
    let row = |customer: i64| {
        Row::from_pairs([
            (field_alias("orders", "id"), Value::from(1i64)),
            (field_alias("orders", "customer_id"), Value::from(customer)),
            (field_alias("customers", "id"), Value::from(customer)),
            (field_alias("customers", "name"), Value::from("acme")),
        ])
    };
    assert_ne!(keyer.key(&row(1), 1), keyer.key(&row(2), 1));
    assert_eq!(keyer.key(&row(1), 1).as_str().len(), 64);
}

#[test]
fn test_null_and_missing_hash_alike() {
    let keyer = TableKeyer::new(&order_lines());
    let null = Row::from_pairs([("order_id", Value::from(1i64)), ("line_no", Value::Null)]);
    let missing = Row::from_pairs([("order_id", Value::from(1i64))]);
    assert_eq!(keyer.key(&null, 1), keyer.key(&missing, 1));
}

mod common;

use common::{edit, replica, store_json};
use serde_json::json;
use tablecrdt_core::{FieldUpdate, ListSplice, MemoryHub, TextSplice};

#[test]
fn removal_arriving_before_insertion_keeps_element_removed() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "tags", FieldUpdate::list(vec![ListSplice::insert(0, vec![json!(1), json!(2), json!(3)])]));
    edit(&mut a, "todo", "t", "tags", FieldUpdate::list(vec![ListSplice::remove(1, 1)]));
    let sent = hub.drain();
    assert_eq!(sent.len(), 2);

    b.apply_remote(sent[1].clone()).unwrap();
    b.apply_remote(sent[0].clone()).unwrap();
    assert_eq!(
        b.table("todo").unwrap().get("t").unwrap().list("tags"),
        Some(&[json!(1), json!(3)][..])
    );
    assert_eq!(store_json(&a), store_json(&b));
}

#[test]
fn duplicate_delivery_is_ignored() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(0, "abc")]));
    let sent = hub.drain();
    assert!(b.apply_remote(sent[0].clone()).unwrap());
    assert!(!b.apply_remote(sent[0].clone()).unwrap());
    assert!(!a.apply_remote(sent[0].clone()).unwrap());
    assert_eq!(
        b.table("todo").unwrap().get("t").unwrap().text("title"),
        Some("abc")
    );
    assert_eq!(b.history().transactions.len(), 1);
}

#[test]
fn concurrent_removals_of_the_same_element() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(0, "xyz")]));
    let base = hub.drain();
    b.apply_remote(base[0].clone()).unwrap();

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::remove(1, 1)]));
    edit(&mut b, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::remove(1, 2)]));
    for transaction in hub.drain() {
        a.apply_remote(transaction.clone()).unwrap();
        b.apply_remote(transaction).unwrap();
    }
    for store in [&a, &b] {
        assert_eq!(
            store.table("todo").unwrap().get("t").unwrap().text("title"),
            Some("x")
        );
    }
}

#[test]
fn late_register_write_does_not_override() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "counter", "c", "n", FieldUpdate::register(1));
    edit(&mut a, "counter", "c", "n", FieldUpdate::register(2));
    let sent = hub.drain();
    b.apply_remote(sent[1].clone()).unwrap();
    b.apply_remote(sent[0].clone()).unwrap();
    assert_eq!(
        b.table("counter").unwrap().get("c").unwrap().register("n"),
        Some(&json!(2))
    );
}

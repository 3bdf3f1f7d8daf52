mod common;

use common::{deliver, edit, permutations, record_json, replica, store_json};
use serde_json::json;
use tablecrdt_core::{
    Datastore, DatastoreConfig, FieldUpdate, LamportClock, ListSplice, MemoryHub, NoopAdapter,
    TextSplice,
};

#[test]
fn concurrent_text_edits_converge() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(0, "hello")]));
    deliver(&hub, &mut [&mut a, &mut b]);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(5, " world")]));
    edit(&mut b, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::new(0, 1, "J")]));
    deliver(&hub, &mut [&mut a, &mut b]);

    assert_eq!(record_json(&a, "todo", "t"), record_json(&b, "todo", "t"));
    assert_eq!(
        a.table("todo").unwrap().get("t").unwrap().text("title"),
        Some("Jello world")
    );
}

#[test]
fn concurrent_inserts_at_the_same_position_converge() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "tags", FieldUpdate::list(vec![ListSplice::insert(0, vec![json!("x")])]));
    deliver(&hub, &mut [&mut a, &mut b]);

    edit(&mut a, "todo", "t", "tags", FieldUpdate::list(vec![ListSplice::insert(1, vec![json!("a1"), json!("a2")])]));
    edit(&mut b, "todo", "t", "tags", FieldUpdate::list(vec![ListSplice::insert(1, vec![json!("b1")])]));
    deliver(&hub, &mut [&mut a, &mut b]);

    let tags_a = a.table("todo").unwrap().get("t").unwrap().list("tags").unwrap().to_vec();
    let tags_b = b.table("todo").unwrap().get("t").unwrap().list("tags").unwrap().to_vec();
    assert_eq!(tags_a, tags_b);
    assert_eq!(tags_a.len(), 4);
    assert_eq!(tags_a[0], json!("x"));
    let a1 = tags_a.iter().position(|v| v == "a1").unwrap();
    let a2 = tags_a.iter().position(|v| v == "a2").unwrap();
    assert!(a1 < a2);
}

#[test]
fn concurrent_map_writes_converge_per_key() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);

    edit(&mut a, "todo", "t", "props", FieldUpdate::map([("color".to_owned(), Some(json!("red")))].into()));
    edit(&mut b, "todo", "t", "props", FieldUpdate::map([
        ("color".to_owned(), Some(json!("blue"))),
        ("size".to_owned(), Some(json!(3))),
    ].into()));
    deliver(&hub, &mut [&mut a, &mut b]);

    assert_eq!(record_json(&a, "todo", "t"), record_json(&b, "todo", "t"));
    let props = a.table("todo").unwrap().get("t").unwrap().map("props").unwrap().clone();
    // Same version; the higher store id (b) wins.
    assert_eq!(props["color"], json!("blue"));
    assert_eq!(props["size"], json!(3));
}

#[test]
fn removals_and_inserts_from_three_replicas_converge_in_any_order() {
    let hub = MemoryHub::new();
    let mut a = replica(&hub);
    let mut b = replica(&hub);
    let mut c = replica(&hub);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(0, "abcdef")]));
    let mut transactions = deliver(&hub, &mut [&mut a, &mut b, &mut c]);

    edit(&mut a, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::remove(1, 2)]));
    edit(&mut b, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::insert(2, "XY")]));
    edit(&mut c, "todo", "t", "title", FieldUpdate::text(vec![TextSplice::new(4, 2, "!")]));
    edit(&mut c, "todo", "t", "done", FieldUpdate::register(true));
    transactions.extend(deliver(&hub, &mut [&mut a, &mut b, &mut c]));

    let expected = store_json(&a);
    assert_eq!(store_json(&b), expected);
    assert_eq!(store_json(&c), expected);

    for order in permutations(&transactions) {
        let mut fresh = Datastore::new(
            DatastoreConfig::new(vec![common::todo_schema(), common::counter_schema()])
                .with_store_id(99),
            NoopAdapter,
            LamportClock::default(),
        )
        .unwrap();
        for transaction in order {
            fresh.apply_remote(transaction).unwrap();
        }
        assert_eq!(store_json(&fresh), expected);
    }
}

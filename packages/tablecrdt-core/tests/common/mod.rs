#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tablecrdt_core::{
    Datastore, DatastoreConfig, FieldDescriptor, FieldUpdate, LamportClock, MemoryAdapter,
    MemoryHub, RecordUpdate, Schema, StoreEvent, TableUpdate, Transaction,
};

pub type Replica = Datastore<MemoryAdapter>;

pub fn todo_schema() -> Schema {
    Schema::new("todo")
        .with_field("title", FieldDescriptor::text())
        .with_field("tags", FieldDescriptor::list())
        .with_field("done", FieldDescriptor::register(false))
        .with_field("props", FieldDescriptor::map())
}

pub fn counter_schema() -> Schema {
    Schema::new("counter").with_field("n", FieldDescriptor::register(0))
}

pub fn replica(hub: &MemoryHub) -> Replica {
    Datastore::new(
        DatastoreConfig::new(vec![todo_schema(), counter_schema()]),
        hub.adapter(),
        LamportClock::default(),
    )
    .unwrap()
}

/// Single-field update for one record.
pub fn one(record: &str, field: &str, update: FieldUpdate) -> TableUpdate {
    let fields: RecordUpdate = [(field.to_owned(), update)].into();
    [(record.to_owned(), fields)].into()
}

/// Run one single-field edit as its own transaction.
pub fn edit(store: &mut Replica, schema: &str, record: &str, field: &str, update: FieldUpdate) {
    let updates = one(record, field, update);
    store
        .mutate("edit", |s| s.update(schema, updates))
        .unwrap();
}

/// Drain the hub and hand every transaction to every replica, returning what was sent.
pub fn deliver(hub: &MemoryHub, replicas: &mut [&mut Replica]) -> Vec<Transaction> {
    let transactions = hub.drain();
    for replica in replicas.iter_mut() {
        for transaction in &transactions {
            replica.apply_remote(transaction.clone()).unwrap();
        }
    }
    transactions
}

pub fn record_json(store: &Replica, schema: &str, record: &str) -> Value {
    store
        .table(schema)
        .unwrap()
        .get(record)
        .map(|r| r.to_json())
        .unwrap_or(Value::Null)
}

/// Every table rendered as JSON, for whole-store comparisons.
pub fn store_json<A, C>(store: &Datastore<A, C>) -> Value
where
    A: tablecrdt_core::Adapter,
    C: tablecrdt_core::Clock,
{
    let mut tables = serde_json::Map::new();
    for table in store.tables() {
        let records: Vec<Value> = table.iter().map(|r| r.to_json()).collect();
        tables.insert(table.schema().id.clone(), Value::Array(records));
    }
    Value::Object(tables)
}

/// Collect every event a store emits.
pub fn record_events<A, C>(store: &mut Datastore<A, C>) -> Rc<RefCell<Vec<StoreEvent>>>
where
    A: tablecrdt_core::Adapter,
    C: tablecrdt_core::Clock,
{
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    store.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

/// All orderings of `items` (Heap's algorithm).
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    fn heap_permute<T: Clone>(k: usize, items: &mut [T], res: &mut Vec<Vec<T>>) {
        if k <= 1 {
            res.push(items.to_vec());
            return;
        }
        heap_permute(k - 1, items, res);
        for i in 0..(k - 1) {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap_permute(k - 1, items, res);
        }
    }
    let mut res = Vec::new();
    heap_permute(items.len(), &mut items.to_vec(), &mut res);
    res
}

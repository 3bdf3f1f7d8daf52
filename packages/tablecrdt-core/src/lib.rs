#![forbid(unsafe_code)]
//! Collaborative datastore: schema-typed tables whose records are made of conflict-free
//! fields (text, list, register, map). Replicas edit locally inside transactions and
//! exchange identifier-addressed patches through a pluggable transport adapter; every
//! field merges concurrent edits so replicas converge regardless of delivery order.

pub mod config;
pub mod context;
pub mod datastore;
pub mod error;
pub mod fields;
pub mod ids;
pub mod order_key;
pub mod record;
pub mod schema;
pub mod table;
pub mod traits;
pub mod transaction;

pub use config::{DatastoreConfig, DEFAULT_UNDO_LIMIT};
pub use context::{Context, TransactionKind};
pub use datastore::{Datastore, Snapshot, SnapshotTable, StoreEvent, SubscriptionId};
pub use error::{Error, Result};
pub use fields::{
    clear_update, Field, FieldChange, FieldDescriptor, FieldKind, FieldMetadata, FieldPatch,
    FieldUpdate, FieldValue, ListField, ListSplice, MapField, RegisterField, TextField, TextSplice,
};
pub use ids::{ElementId, PatchId, RecordId, SchemaId, Stamp, StoreId, Version, MAX_VERSION};
pub use record::Record;
pub use schema::Schema;
pub use table::{RecordUpdate, Table, TableUpdate};
pub use traits::{Adapter, Clock, LamportClock, MemoryAdapter, MemoryHub, NoopAdapter};
pub use transaction::{
    ChangeContent, ChangedArgs, History, HistoryMessage, Message, PatchContent,
    RemoteTransactionMessage, Transaction, TransactionLog,
};

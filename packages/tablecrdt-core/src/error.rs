use thiserror::Error;

use crate::ids::StoreId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot mutate a table outside of a transaction")]
    OutsideTransaction,
    #[error("a transaction is already in progress")]
    RecursiveMutate,
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("a table already exists for schema: {0}")]
    DuplicateTable(String),
    #[error("unknown field `{field}` in schema `{schema}`")]
    UnknownField { schema: String, field: String },
    #[error("field `{field}` expects a {expected} update")]
    FieldTypeMismatch { field: String, expected: &'static str },
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("store id {0} is outside of [1, 0xFFFFFFFF]")]
    InvalidStoreId(StoreId),
    #[error("logical clock exhausted")]
    VersionOverflow,
    #[error("malformed patch: {0}")]
    MalformedPatch(String),
    #[error("adapter error: {0}")]
    Adapter(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("datastore has been disposed")]
    Disposed,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

//! Key-value store client contract.
//!
//! # Responsibility
//! - Describe items, keys, write operations and preconditions independently
//!   of the storage engine.
//! - Define the client seam (`KeyValueStore`) repositories are written
//!   against.
//!
//! # Invariants
//! - `transact` applies all operations or none of them.
//! - A failed precondition is reported as `StoreError::ConstraintViolation`
//!   naming the failing operation, never as a transport error.
//! - Absence on `get_item` is `Ok(None)`, not an error.

use crate::db::DbError;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_store;

pub use sqlite_store::SqliteKvStore;

/// Maximum number of operations accepted by one `transact` call.
pub const MAX_TRANSACTION_OPS: usize = 100;

/// Value of a single item attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

/// Attribute map of one stored item, including its key attribute.
pub type Item = BTreeMap<String, AttributeValue>;

/// Primary key of one item: key attribute name plus its string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub attribute: String,
    pub value: String,
}

impl Key {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// Predicate evaluated against the current state of the target item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The item must currently exist.
    Exists,
    /// The item must not currently exist.
    NotExists,
    /// The item must exist and carry exactly this attribute value.
    AttributeEquals(String, AttributeValue),
    /// The item must not carry the attribute (a missing item satisfies this).
    AttributeAbsent(String),
    /// Every nested condition must hold.
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluates the condition against `current`, the item as stored now.
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::AttributeEquals(name, expected) => {
                current.and_then(|item| item.get(name)) == Some(expected)
            }
            Self::AttributeAbsent(name) => current.map_or(true, |item| !item.contains_key(name)),
            Self::All(conditions) => conditions.iter().all(|condition| condition.holds(current)),
        }
    }
}

/// One field-level mutation inside an update operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Set(String, AttributeValue),
    Remove(String),
}

impl UpdateAction {
    pub fn attribute(&self) -> &str {
        match self {
            Self::Set(name, _) | Self::Remove(name) => name,
        }
    }
}

/// One operation of a multi-item transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Replaces the whole item. The key attribute is always written from `key`.
    Put {
        table: String,
        key: Key,
        item: Item,
        condition: Option<Condition>,
    },
    /// Applies attribute actions, creating the item when it does not exist.
    Update {
        table: String,
        key: Key,
        actions: Vec<UpdateAction>,
        condition: Option<Condition>,
    },
    Delete {
        table: String,
        key: Key,
        condition: Option<Condition>,
    },
}

impl WriteOp {
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Self::Put { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Put { condition, .. }
            | Self::Update { condition, .. }
            | Self::Delete { condition, .. } => condition.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by key-value store clients.
#[derive(Debug)]
pub enum StoreError {
    /// Precondition of operation `index` failed; nothing was applied.
    ConstraintViolation { index: usize, table: String },
    /// The request was malformed and never reached storage.
    InvalidRequest(String),
    /// A stored item could not be decoded.
    InvalidItem(String),
    /// A batched read page stayed throttled for every allowed attempt.
    Throttled { attempts: u32 },
    /// Backing storage lacks a table the client depends on.
    MissingRequiredTable(&'static str),
    Db(DbError),
}

impl StoreError {
    /// Index of the operation whose precondition failed, if that is the cause.
    pub fn violated_operation(&self) -> Option<usize> {
        match self {
            Self::ConstraintViolation { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConstraintViolation { index, table } => write!(
                f,
                "transaction precondition failed at operation {index} on table `{table}`"
            ),
            Self::InvalidRequest(message) => write!(f, "invalid store request: {message}"),
            Self::InvalidItem(message) => write!(f, "invalid stored item: {message}"),
            Self::Throttled { attempts } => {
                write!(f, "store throttled the request after {attempts} attempts")
            }
            Self::MissingRequiredTable(table) => {
                write!(f, "store database is missing required table `{table}`")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Client for a store with per-item atomicity plus multi-item transactions.
pub trait KeyValueStore {
    /// Loads one item by key. Absence is `Ok(None)`.
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>>;

    /// Loads many items by key, paging internally.
    ///
    /// Missing keys are simply absent from the result, and the result order
    /// is unspecified; callers re-key items by identity.
    fn batch_get_items(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>>;

    /// Applies all operations atomically or fails without side effects.
    fn transact(&self, ops: &[WriteOp]) -> StoreResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>> {
        (**self).get_item(table, key)
    }

    fn batch_get_items(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>> {
        (**self).batch_get_items(table, keys)
    }

    fn transact(&self, ops: &[WriteOp]) -> StoreResult<()> {
        (**self).transact(ops)
    }
}

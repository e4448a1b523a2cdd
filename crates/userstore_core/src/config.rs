//! Immutable store configuration.
//!
//! # Responsibility
//! - Name the two record sets (users, email projection).
//! - Bound batched reads (page size, retry attempts, backoff).
//!
//! # Invariants
//! - Values are resolved once at process start and passed to constructors;
//!   nothing in the crate reads configuration lazily or mutates it.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const ENV_USER_TABLE: &str = "USERSTORE_USER_TABLE";
pub const ENV_EMAIL_USER_TABLE: &str = "USERSTORE_EMAIL_USER_TABLE";
pub const ENV_BATCH_PAGE_SIZE: &str = "USERSTORE_BATCH_PAGE_SIZE";
pub const ENV_BATCH_MAX_ATTEMPTS: &str = "USERSTORE_BATCH_MAX_ATTEMPTS";

const DEFAULT_USER_TABLE: &str = "users";
const DEFAULT_EMAIL_USER_TABLE: &str = "email_users";
/// Largest page a batched read may request in one round trip.
pub const MAX_BATCH_PAGE_SIZE: usize = 100;

const DEFAULT_BATCH_PAGE_SIZE: usize = MAX_BATCH_PAGE_SIZE;
const DEFAULT_BATCH_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BATCH_BACKOFF: Duration = Duration::from_millis(20);

/// Configuration value that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Blank(&'static str),
    InvalidNumber { name: &'static str, value: String },
    OutOfRange { name: &'static str, value: String },
    SameTable(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank(name) => write!(f, "{name} cannot be blank"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer, got `{value}`")
            }
            Self::OutOfRange { name, value } => write!(f, "{name} is out of range: `{value}`"),
            Self::SameTable(name) => {
                write!(f, "user and email projection tables must differ, both are `{name}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Table names for the primary records and the email projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub users: String,
    pub email_users: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: DEFAULT_USER_TABLE.to_string(),
            email_users: DEFAULT_EMAIL_USER_TABLE.to_string(),
        }
    }
}

/// Paging and retry bounds for batched reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchGetOptions {
    /// Maximum keys per store round trip, at most `MAX_BATCH_PAGE_SIZE`.
    pub page_size: usize,
    /// Attempts per page before giving up on a throttled page.
    pub max_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub backoff: Duration,
}

impl Default for BatchGetOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_BATCH_PAGE_SIZE,
            max_attempts: DEFAULT_BATCH_MAX_ATTEMPTS,
            backoff: DEFAULT_BATCH_BACKOFF,
        }
    }
}

/// Everything the store and repository need to be constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub tables: TableNames,
    pub batch: BatchGetOptions,
}

impl StoreConfig {
    /// Reads configuration from process environment, falling back to
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tables = TableNames {
            users: table_name(&lookup, ENV_USER_TABLE)?.unwrap_or(defaults.tables.users),
            email_users: table_name(&lookup, ENV_EMAIL_USER_TABLE)?
                .unwrap_or(defaults.tables.email_users),
        };
        if tables.users == tables.email_users {
            return Err(ConfigError::SameTable(tables.users));
        }

        let page_size = match positive_number(&lookup, ENV_BATCH_PAGE_SIZE)? {
            Some(value) => usize::try_from(value)
                .ok()
                .filter(|size| *size <= MAX_BATCH_PAGE_SIZE)
                .ok_or_else(|| ConfigError::OutOfRange {
                    name: ENV_BATCH_PAGE_SIZE,
                    value: value.to_string(),
                })?,
            None => defaults.batch.page_size,
        };
        let max_attempts = match positive_number(&lookup, ENV_BATCH_MAX_ATTEMPTS)? {
            Some(value) => u32::try_from(value).map_err(|_| ConfigError::OutOfRange {
                name: ENV_BATCH_MAX_ATTEMPTS,
                value: value.to_string(),
            })?,
            None => defaults.batch.max_attempts,
        };

        Ok(Self {
            tables,
            batch: BatchGetOptions {
                page_size,
                max_attempts,
                backoff: defaults.batch.backoff,
            },
        })
    }
}

fn table_name(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<String>, ConfigError> {
    match lookup(name) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Blank(name)),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

fn positive_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidNumber { name, value: raw }),
        Ok(value) => Ok(Some(value)),
    }
}

//! Core of the user store.
//! Enforces unique usernames and emails over a key-value store that only
//! guarantees per-item atomicity plus all-or-nothing multi-item transactions.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{BatchGetOptions, ConfigError, StoreConfig, TableNames, MAX_BATCH_PAGE_SIZE};
pub use logging::{default_log_level, init_logging, logging_status, LogConfig, LoggingError};
pub use model::input_error::{InputError, InputErrorKind};
pub use model::user::{EmailUser, ItemDecodeError, User};
pub use repo::email_projection::EmailProjection;
pub use repo::user_diff::{diff_users, FieldChange, FieldValue, UserDiff, UserField};
pub use repo::user_repo::{KvUserRepository, RepoError, RepoResult, UpdateOutcome, UserRepository};
pub use service::collaborators::{AuthError, Authenticator, HashError, PasswordHasher, Session};
pub use service::user_service::{
    NewUserRequest, ServiceError, UpdateUserRequest, UserProfile, UserService,
};
pub use store::{
    AttributeValue, Condition, Item, Key, KeyValueStore, SqliteKvStore, StoreError, StoreResult,
    UpdateAction, WriteOp,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

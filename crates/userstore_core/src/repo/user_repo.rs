//! User repository contract and key-value store implementation.
//!
//! # Responsibility
//! - Create users while reserving their email in the same transaction.
//! - Fetch users by username, by email, or in batches.
//! - Apply partial updates computed by the diff engine, swapping the email
//!   link atomically with the field update.
//!
//! # Invariants
//! - Write paths validate before building any store operation.
//! - An update with no differences issues no store call at all.
//! - A projection pointing at a missing user is reported as
//!   `RepoError::DanglingReference`, never as not-found.
//! - Updates carry the snapshot values of every changed field as
//!   preconditions, so a concurrent write makes them fail instead of being
//!   overwritten.

use crate::config::TableNames;
use crate::model::input_error::InputError;
use crate::model::user::{User, FIELD_EMAIL, FIELD_USERNAME};
use crate::repo::email_projection::EmailProjection;
use crate::repo::user_diff::{diff_users, FieldChange, FieldValue, UserDiff, UserField};
use crate::store::{
    AttributeValue, Condition, Item, KeyValueStore, StoreError, UpdateAction, WriteOp,
};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CREATE_USER_OP: usize = 0;
const UPDATE_RESERVE_EMAIL_OP: usize = 0;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from user repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Validation failure, lookup miss or uniqueness conflict on one field.
    Input(InputError),
    /// The stored user no longer matches the snapshot an update was computed
    /// from. Re-read and retry.
    StaleSnapshot,
    /// The email projection names a user that does not exist.
    DanglingReference { email: String, username: String },
    /// Stored data does not decode into a record.
    InvalidData(String),
    Store(StoreError),
}

impl RepoError {
    /// Field-scoped view of the error, when it is the caller's to fix.
    pub fn input_error(&self) -> Option<&InputError> {
        match self {
            Self::Input(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleSnapshot)
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input(err) => write!(f, "{err}"),
            Self::StaleSnapshot => write!(f, "user changed since it was read; re-read and retry"),
            Self::DanglingReference { email, username } => write!(
                f,
                "email projection `{email}` points to missing user `{username}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Input(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::StaleSnapshot | Self::DanglingReference { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<InputError> for RepoError {
    fn from(value: InputError) -> Self {
        Self::Input(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// What an update actually wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No field differed; the store was not contacted.
    Unchanged,
    Applied {
        changed_fields: Vec<UserField>,
        email_relinked: bool,
    },
}

/// Repository interface for user records.
pub trait UserRepository {
    /// Creates a user and reserves its email atomically.
    fn create_user(&self, user: &User) -> RepoResult<()>;
    fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    /// Resolves the email through the projection, then loads the user.
    fn get_user_by_email(&self, email: &str) -> RepoResult<User>;
    /// Returns one entry per input username, in input order; misses are
    /// `User::default()`.
    fn get_users_by_usernames(&self, usernames: &[String]) -> RepoResult<Vec<User>>;
    /// Applies the difference between `old` (a snapshot) and `new`.
    fn update_user(&self, old: &User, new: &User) -> RepoResult<UpdateOutcome>;
}

/// User repository over any `KeyValueStore`.
pub struct KvUserRepository<S: KeyValueStore> {
    store: S,
    tables: TableNames,
}

impl<S: KeyValueStore> KvUserRepository<S> {
    pub fn new(store: S, tables: TableNames) -> Self {
        Self { store, tables }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    fn projection(&self) -> EmailProjection<'_> {
        EmailProjection::new(&self.tables.email_users)
    }

    fn load_user(&self, username: &str) -> RepoResult<Option<User>> {
        self.store
            .get_item(&self.tables.users, &User::key(username))?
            .map(|item| decode_user(&item))
            .transpose()
    }
}

impl<S: KeyValueStore> UserRepository for KvUserRepository<S> {
    fn create_user(&self, user: &User) -> RepoResult<()> {
        user.validate_for_create()?;

        // The conflicting field is derived from the failing operation index.
        let ops = [
            WriteOp::Put {
                table: self.tables.users.clone(),
                key: User::key(&user.username),
                item: user.to_item(),
                condition: Some(Condition::NotExists),
            },
            self.projection().reserve(&user.email, &user.username),
        ];

        match self.store.transact(&ops) {
            Ok(()) => {
                info!("event=user_create module=repo status=ok");
                Ok(())
            }
            Err(StoreError::ConstraintViolation { index, .. }) => {
                let field = if index == CREATE_USER_OP {
                    FIELD_USERNAME
                } else {
                    FIELD_EMAIL
                };
                warn!("event=user_create module=repo status=conflict field={field}");
                Err(InputError::taken(field).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        if username.trim().is_empty() {
            return Err(InputError::blank(FIELD_USERNAME).into());
        }
        self.load_user(username)?
            .ok_or_else(|| InputError::not_found(FIELD_USERNAME).into())
    }

    fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
        if email.trim().is_empty() {
            return Err(InputError::blank(FIELD_EMAIL).into());
        }
        let username = self.projection().lookup(&self.store, email)?;
        match self.load_user(&username)? {
            Some(user) => Ok(user),
            None => {
                error!(
                    "event=user_get_by_email module=repo status=error error_code=dangling_projection"
                );
                Err(RepoError::DanglingReference {
                    email: email.to_string(),
                    username,
                })
            }
        }
    }

    fn get_users_by_usernames(&self, usernames: &[String]) -> RepoResult<Vec<User>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(usernames.len());
        let keys: Vec<_> = usernames
            .iter()
            .filter(|username| seen.insert(username.as_str()))
            .map(|username| User::key(username))
            .collect();

        let items = self.store.batch_get_items(&self.tables.users, &keys)?;
        let mut by_username = HashMap::with_capacity(items.len());
        for item in &items {
            let user = decode_user(item)?;
            by_username.insert(user.username.clone(), user);
        }

        debug!(
            "event=user_batch_get module=repo status=ok requested={} unique={} found={}",
            usernames.len(),
            keys.len(),
            by_username.len()
        );
        Ok(usernames
            .iter()
            .map(|username| by_username.get(username).cloned().unwrap_or_default())
            .collect())
    }

    fn update_user(&self, old: &User, new: &User) -> RepoResult<UpdateOutcome> {
        if new.username != old.username {
            return Err(InputError::invalid(FIELD_USERNAME, "can't be changed").into());
        }
        new.validate()?;

        let changes = match diff_users(old, new) {
            UserDiff::Unchanged => {
                debug!("event=user_update module=repo status=noop");
                return Ok(UpdateOutcome::Unchanged);
            }
            UserDiff::Changed(changes) => changes,
        };

        let email_relinked = old.email != new.email;
        let mut ops = Vec::with_capacity(3);
        if email_relinked {
            let projection = self.projection();
            ops.push(projection.reserve(&new.email, &new.username));
            ops.push(projection.release(&old.email));
        }
        ops.push(WriteOp::Update {
            table: self.tables.users.clone(),
            key: User::key(&old.username),
            actions: changes.iter().map(update_action).collect(),
            condition: Some(snapshot_condition(old, &changes)),
        });

        match self.store.transact(&ops) {
            Ok(()) => {
                info!(
                    "event=user_update module=repo status=ok fields={} email_relinked={email_relinked}",
                    changes.len()
                );
                Ok(UpdateOutcome::Applied {
                    changed_fields: changes.iter().map(FieldChange::field).collect(),
                    email_relinked,
                })
            }
            Err(StoreError::ConstraintViolation { index, .. })
                if email_relinked && index == UPDATE_RESERVE_EMAIL_OP =>
            {
                warn!("event=user_update module=repo status=conflict field={FIELD_EMAIL}");
                Err(InputError::taken(FIELD_EMAIL).into())
            }
            Err(StoreError::ConstraintViolation { index, .. }) => {
                warn!("event=user_update module=repo status=stale_snapshot index={index}");
                Err(RepoError::StaleSnapshot)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Translates a diff instruction into the store's update action.
fn update_action(change: &FieldChange) -> UpdateAction {
    match change {
        FieldChange::Set(field, value) => {
            UpdateAction::Set(field.attribute().to_string(), attribute_value(value))
        }
        FieldChange::Remove(field) => UpdateAction::Remove(field.attribute().to_string()),
    }
}

fn attribute_value(value: &FieldValue) -> AttributeValue {
    match value {
        FieldValue::Text(text) => AttributeValue::Text(text.clone()),
        FieldValue::Bytes(bytes) => AttributeValue::Bytes(bytes.clone()),
    }
}

/// Requires the user to exist and every changed field to still hold its
/// snapshot value.
fn snapshot_condition(old: &User, changes: &[FieldChange]) -> Condition {
    let mut conditions = vec![Condition::Exists];
    for change in changes {
        let field = change.field();
        let attribute = field.attribute().to_string();
        let snapshot = match field {
            UserField::Email => Some(AttributeValue::Text(old.email.clone())),
            UserField::PasswordHash => Some(old.password_hash.clone())
                .filter(|hash| !hash.is_empty())
                .map(AttributeValue::Bytes),
            UserField::Image => old.image().map(|image| AttributeValue::Text(image.to_string())),
            UserField::Bio => old.bio().map(|bio| AttributeValue::Text(bio.to_string())),
        };
        conditions.push(match snapshot {
            Some(value) => Condition::AttributeEquals(attribute, value),
            None => Condition::AttributeAbsent(attribute),
        });
    }
    Condition::All(conditions)
}

fn decode_user(item: &Item) -> RepoResult<User> {
    User::from_item(item).map_err(|err| RepoError::InvalidData(format!("user record: {err}")))
}

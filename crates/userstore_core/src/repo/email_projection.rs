//! Email → username projection kept beside the user records.
//!
//! # Responsibility
//! - Turn "reserve email for user" and "release email" into conditional
//!   store writes that make duplicate reservations impossible.
//! - Resolve an email to the username that currently owns it.
//!
//! # Invariants
//! - Reservations carry `NotExists`; releases carry `Exists`.
//! - Writes are only ever issued inside the same transaction as the user
//!   record change they back.

use crate::model::input_error::InputError;
use crate::model::user::{EmailUser, FIELD_EMAIL};
use crate::repo::user_repo::{RepoError, RepoResult};
use crate::store::{Condition, KeyValueStore, WriteOp};

/// Projection writer/reader bound to one table.
#[derive(Debug, Clone, Copy)]
pub struct EmailProjection<'t> {
    table: &'t str,
}

impl<'t> EmailProjection<'t> {
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Put that links `email` to `username`, failing if the email is taken.
    pub fn reserve(&self, email: &str, username: &str) -> WriteOp {
        WriteOp::Put {
            table: self.table.to_string(),
            key: EmailUser::key(email),
            item: EmailUser::new(email, username).to_item(),
            condition: Some(Condition::NotExists),
        }
    }

    /// Delete that unlinks `email`, failing if no link exists.
    pub fn release(&self, email: &str) -> WriteOp {
        WriteOp::Delete {
            table: self.table.to_string(),
            key: EmailUser::key(email),
            condition: Some(Condition::Exists),
        }
    }

    /// Returns the username owning `email`.
    ///
    /// An unknown email is `InputError(email, "not found")`.
    pub fn lookup<S: KeyValueStore + ?Sized>(&self, store: &S, email: &str) -> RepoResult<String> {
        let item = store
            .get_item(self.table, &EmailUser::key(email))?
            .ok_or_else(|| InputError::not_found(FIELD_EMAIL))?;
        let link = EmailUser::from_item(&item).map_err(|err| {
            RepoError::InvalidData(format!("email projection record: {err}"))
        })?;
        Ok(link.username)
    }
}

//! Field-level diff between two versions of a user record.
//!
//! # Responsibility
//! - Decide which mutable fields an update must set or remove.
//! - Stay independent of any store's update syntax; repositories translate
//!   the returned instructions themselves.
//!
//! # Invariants
//! - `username` is never part of a diff.
//! - A password hash is only ever set, never removed, and only when the new
//!   hash is non-empty and differs byte-wise from the old one.
//! - An email change always yields a `Set` for the email field.
//! - Instructions come out in field order: email, password, image, bio.

use crate::model::user::{
    User, ATTR_BIO, ATTR_EMAIL, ATTR_IMAGE, ATTR_PASSWORD_HASH, FIELD_BIO, FIELD_EMAIL,
    FIELD_IMAGE, FIELD_PASSWORD,
};

/// Mutable user fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    Email,
    PasswordHash,
    Image,
    Bio,
}

impl UserField {
    /// Caller-facing field name, as used in `InputError::field`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Email => FIELD_EMAIL,
            Self::PasswordHash => FIELD_PASSWORD,
            Self::Image => FIELD_IMAGE,
            Self::Bio => FIELD_BIO,
        }
    }

    /// Store attribute holding the field.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Email => ATTR_EMAIL,
            Self::PasswordHash => ATTR_PASSWORD_HASH,
            Self::Image => ATTR_IMAGE,
            Self::Bio => ATTR_BIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bytes(Vec<u8>),
}

/// One diff instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Set(UserField, FieldValue),
    Remove(UserField),
}

impl FieldChange {
    pub fn field(&self) -> UserField {
        match self {
            Self::Set(field, _) | Self::Remove(field) => *field,
        }
    }
}

/// Result of comparing two user versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDiff {
    /// Nothing to write.
    Unchanged,
    /// At least one instruction; never an empty list.
    Changed(Vec<FieldChange>),
}

impl UserDiff {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    pub fn changes(&self) -> &[FieldChange] {
        match self {
            Self::Unchanged => &[],
            Self::Changed(changes) => changes,
        }
    }
}

/// Computes the instructions that turn `old` into `new`.
pub fn diff_users(old: &User, new: &User) -> UserDiff {
    let mut changes = Vec::new();

    if old.email != new.email {
        changes.push(FieldChange::Set(
            UserField::Email,
            FieldValue::Text(new.email.clone()),
        ));
    }

    if !new.password_hash.is_empty() && old.password_hash != new.password_hash {
        changes.push(FieldChange::Set(
            UserField::PasswordHash,
            FieldValue::Bytes(new.password_hash.clone()),
        ));
    }

    changes.extend(optional_text_change(UserField::Image, old.image(), new.image()));
    changes.extend(optional_text_change(UserField::Bio, old.bio(), new.bio()));

    if changes.is_empty() {
        UserDiff::Unchanged
    } else {
        UserDiff::Changed(changes)
    }
}

fn optional_text_change(
    field: UserField,
    old: Option<&str>,
    new: Option<&str>,
) -> Option<FieldChange> {
    if old == new {
        return None;
    }
    Some(match new {
        Some(value) => FieldChange::Set(field, FieldValue::Text(value.to_string())),
        None => FieldChange::Remove(field),
    })
}

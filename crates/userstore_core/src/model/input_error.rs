//! Field-scoped caller errors.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub const MSG_BLANK: &str = "can't be blank";
pub const MSG_INVALID: &str = "is invalid";
pub const MSG_NOT_FOUND: &str = "not found";
pub const MSG_TAKEN: &str = "has already been taken";

/// Category of an `InputError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputErrorKind {
    /// Value failed a validator.
    Invalid,
    /// Lookup by this field found nothing.
    NotFound,
    /// Value collides with another record's unique field.
    Taken,
}

/// Error the caller can fix by changing one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError {
    pub field: &'static str,
    pub message: String,
    pub kind: InputErrorKind,
}

impl InputError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
            kind: InputErrorKind::Invalid,
        }
    }

    pub fn blank(field: &'static str) -> Self {
        Self::invalid(field, MSG_BLANK)
    }

    pub fn not_found(field: &'static str) -> Self {
        Self {
            field,
            message: MSG_NOT_FOUND.to_string(),
            kind: InputErrorKind::NotFound,
        }
    }

    pub fn taken(field: &'static str) -> Self {
        Self {
            field,
            message: MSG_TAKEN.to_string(),
            kind: InputErrorKind::Taken,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == InputErrorKind::NotFound
    }

    pub fn is_taken(&self) -> bool {
        self.kind == InputErrorKind::Taken
    }
}

impl Display for InputError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

impl Error for InputError {}

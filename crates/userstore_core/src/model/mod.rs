//! Domain records and field-level validation.
//!
//! # Responsibility
//! - Define the user record and its email projection record.
//! - Map records to and from store items with explicit per-field code.
//! - Report validation problems as field-scoped `InputError`s.
//!
//! # Invariants
//! - `username` never changes once a user exists.
//! - An empty optional field is the same as an absent one.

pub mod input_error;
pub mod user;

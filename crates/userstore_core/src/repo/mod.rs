//! Repository layer over the key-value store.
//!
//! # Responsibility
//! - Keep user records and the email projection consistent by writing them
//!   in shared transactions.
//! - Separate the data-first update diff from its store translation.
//!
//! # Invariants
//! - The user repository is the only writer of both record sets.
//! - Repository APIs return field-scoped `InputError`s for caller mistakes
//!   and pass store transport errors through unchanged.

pub mod email_projection;
pub mod user_diff;
pub mod user_repo;

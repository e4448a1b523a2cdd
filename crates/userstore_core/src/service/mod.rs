//! Use-case services over the user repository.
//!
//! # Responsibility
//! - Combine authentication, password hashing and repository calls into
//!   caller-level operations.
//! - Keep transport layers (HTTP handlers, CLIs) away from storage details.

pub mod collaborators;
pub mod user_service;

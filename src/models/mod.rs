//! Core data models for the vault service.
//!
//! These entities form the three metadata indices: chunks, files and
//! ownership. They map to database rows via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod chunk;
pub mod file;
pub mod user;

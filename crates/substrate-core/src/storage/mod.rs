//! Storage engine.
//!
//! Opens the database file, configures it for safe multi-process concurrent access, applies
//! migrations in order, and exposes the single connection handle repositories are built on top
//! of.

mod connection;
pub mod migrations;

pub use connection::Storage;

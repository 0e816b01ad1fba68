//! Storage subsystem
//!
//! This module provides the durable event log every capture endpoint appends
//! to and the exporter drains.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining the append/scan/delete contract.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `memory_storage`: in-process implementation for tests and throwaway runs.
//! - `db_entities`: SeaORM entity model for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::{EntryStream, Storage};
pub use types::LogEntry;

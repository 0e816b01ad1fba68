//! Storage Trait
//!
//! This module defines the `Storage` trait, the access contract of the
//! append-only event log shared by the capture endpoints and the exporter.
//!
//! Implementors of this trait are responsible for:
//! - Durably appending serialized events and assigning their row ids
//! - Streaming rows in ascending id order without materialising the result set
//! - Deleting exported rows below a high-water mark
//!
//! All methods return a `Result` to handle potential storage errors.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error_handling::types::StorageError;
use crate::storage::types::LogEntry;

/// Forward-only cursor over the event log, in ascending id order.
pub type EntryStream = BoxStream<'static, Result<LogEntry, StorageError>>;

/// The `Storage` trait defines the interface of event log backends.
///
/// Row ids are strictly increasing in insertion order and never reused, even
/// after deletion, so they can serve as an export cursor.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Appends one serialized event and returns the id assigned to it.
    async fn append(&self, entry: &[u8]) -> Result<i64, StorageError>;

    /// Streams every row with `id > after_id`, ascending.
    ///
    /// The stream covers the rows present when it is first polled. Rows
    /// appended afterwards may be left out, but no row is yielded twice and
    /// none that existed at the start is skipped.
    fn scan_from(&self, after_id: i64) -> EntryStream;

    /// Removes every row with `id < id` and returns how many were deleted.
    ///
    /// No-op when `id <= 0` or the log is empty.
    async fn delete_up_to(&self, id: i64) -> Result<u64, StorageError>;

    /// Number of rows currently held.
    async fn count(&self) -> Result<u64, StorageError>;
}

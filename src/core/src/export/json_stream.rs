//! Lazy JSON array over the event log.
//!
//! [`export`] wraps a live [`Storage::scan_from`] cursor in a [`JsonArrayStream`]
//! that yields the array one row at a time as the consumer pulls:
//!
//! ```text
//! rows:    {"a":1}   {"b":2}   {"c":3}   <end>
//! chunks:  [{"a":1}  ,{"b":2}  ,{"c":3}  ]
//! ```
//!
//! An empty log yields the single chunk `[]`. Rows are embedded verbatim since
//! each one is already a serialized JSON object. Nothing beyond the current row
//! is held in memory, so the outbound request body applies backpressure all the
//! way down to the store's read batches.
//!
//! The paired [`ExportProgress`] records the id of the last row handed out,
//! which is the exact prune boundary for the run.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{ready, Stream, StreamExt};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{EntryStream, Storage};

/// Shared view of how far one export stream has progressed.
#[derive(Debug, Default)]
pub struct ExportProgress {
    high_water_mark: AtomicI64,
    rows_sent: AtomicU64,
    complete: AtomicBool,
}

impl ExportProgress {
    /// Id of the last row yielded, 0 when none was.
    pub fn high_water_mark(&self) -> i64 {
        self.high_water_mark.load(Ordering::Acquire)
    }

    pub fn rows_sent(&self) -> u64 {
        self.rows_sent.load(Ordering::Acquire)
    }

    /// True once the closing bracket was yielded.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

pub struct JsonArrayStream {
    rows: EntryStream,
    progress: Arc<ExportProgress>,
    opened: bool,
    finished: bool,
}

/// Starts a new export over every row currently in `storage`.
pub fn export(storage: &dyn Storage) -> (JsonArrayStream, Arc<ExportProgress>) {
    JsonArrayStream::new(storage.scan_from(0))
}

impl JsonArrayStream {
    pub fn new(rows: EntryStream) -> (Self, Arc<ExportProgress>) {
        let progress = Arc::new(ExportProgress::default());
        let stream = Self {
            rows,
            progress: Arc::clone(&progress),
            opened: false,
            finished: false,
        };
        (stream, progress)
    }
}

impl Stream for JsonArrayStream {
    type Item = Result<Bytes, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.rows.poll_next_unpin(cx)) {
            Some(Ok(row)) => {
                let mut chunk = BytesMut::with_capacity(row.entry.len() + 1);
                chunk.put_u8(if this.opened { b',' } else { b'[' });
                chunk.extend_from_slice(&row.entry);
                this.opened = true;
                this.progress.high_water_mark.store(row.id, Ordering::Release);
                this.progress.rows_sent.fetch_add(1, Ordering::AcqRel);
                Poll::Ready(Some(Ok(chunk.freeze())))
            }
            Some(Err(e)) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.finished = true;
                this.progress.complete.store(true, Ordering::Release);
                let tail: &'static [u8] = if this.opened { b"]" } else { b"[]" };
                Poll::Ready(Some(Ok(Bytes::from_static(tail))))
            }
        }
    }
}

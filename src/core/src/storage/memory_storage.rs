use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use log::{debug, error};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{EntryStream, Storage};
use crate::storage::types::LogEntry;

#[derive(Debug, Default)]
struct MemoryLog {
    rows: BTreeMap<i64, Vec<u8>>,
    last_id: i64,
}

/// Event log held in process memory.
///
/// Honors the same id and scan guarantees as [`DatabaseStorage`](super::DatabaseStorage)
/// but loses everything on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryLog>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized entries currently held, ascending by id.
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.inner.lock() {
            Ok(log) => log
                .rows
                .iter()
                .map(|(id, entry)| LogEntry {
                    id: *id,
                    entry: entry.clone(),
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append(&self, entry: &[u8]) -> Result<i64, StorageError> {
        let mut log = self.inner.lock().map_err(|_| {
            error!("Memory log lock poisoned");
            StorageError::WriteFailed
        })?;
        log.last_id += 1;
        let id = log.last_id;
        log.rows.insert(id, entry.to_vec());
        debug!("Appended memory log row {}", id);
        Ok(id)
    }

    fn scan_from(&self, after_id: i64) -> EntryStream {
        let inner = Arc::clone(&self.inner);
        // (cursor, upper bound fixed on first poll)
        stream::unfold((after_id, None::<i64>), move |(cursor, upper)| {
            let inner = Arc::clone(&inner);
            async move {
                if upper.is_some_and(|upper| cursor >= upper) {
                    return None;
                }
                let log = match inner.lock() {
                    Ok(log) => log,
                    Err(_) => return Some((Err(StorageError::ReadFailed), (i64::MAX, Some(0)))),
                };
                let upper = upper.unwrap_or(log.last_id);
                if cursor >= upper {
                    return None;
                }
                let (id, entry) = log.rows.range((Excluded(cursor), Included(upper))).next()?;
                let row = LogEntry {
                    id: *id,
                    entry: entry.clone(),
                };
                Some((Ok(row), (*id, Some(upper))))
            }
        })
        .boxed()
    }

    async fn delete_up_to(&self, id: i64) -> Result<u64, StorageError> {
        if id <= 0 {
            return Ok(0);
        }
        let mut log = self.inner.lock().map_err(|_| StorageError::WriteFailed)?;
        let kept = log.rows.split_off(&id);
        let removed = log.rows.len() as u64;
        log.rows = kept;
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let log = self.inner.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(log.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn ids_survive_deletion() {
        let storage = MemoryStorage::new();
        storage.append(b"a").await.unwrap();
        let b = storage.append(b"b").await.unwrap();
        assert_eq!(storage.delete_up_to(b + 1).await.unwrap(), 2);
        assert_eq!(storage.count().await.unwrap(), 0);
        assert_eq!(storage.append(b"c").await.unwrap(), b + 1);
    }

    #[tokio::test]
    async fn scan_is_bounded_at_first_poll() {
        let storage = MemoryStorage::new();
        storage.append(b"1").await.unwrap();
        storage.append(b"2").await.unwrap();

        let mut scan = storage.scan_from(0);
        let first = scan.try_next().await.unwrap().unwrap();
        storage.append(b"3").await.unwrap();
        let rest: Vec<LogEntry> = scan.try_collect().await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn delete_keeps_bound_row() {
        let storage = MemoryStorage::new();
        for e in [b"a", b"b", b"c"] {
            storage.append(e).await.unwrap();
        }
        assert_eq!(storage.delete_up_to(3).await.unwrap(), 2);
        assert_eq!(storage.delete_up_to(3).await.unwrap(), 0);
        assert_eq!(storage.entries()[0].id, 3);
        assert_eq!(storage.delete_up_to(0).await.unwrap(), 0);
    }
}

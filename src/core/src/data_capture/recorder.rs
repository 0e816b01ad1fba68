//! Event recording for the capture endpoints.
//!
//! `EventRecorder` turns a [`CapturedEvent`] into its JSON form and appends it
//! as one row of the injected [`Storage`]. Capture is best effort: the
//! endpoints call [`EventRecorder::capture`], which logs failures and returns
//! nothing, so a broken or stalled store never changes what the attacker sees.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};

use crate::data_capture::types::CapturedEvent;
use crate::error_handling::types::RecordError;
use crate::storage::storage_trait::Storage;

pub struct EventRecorder {
    storage: Arc<dyn Storage>,
    /// Upper bound on a single append; past it the event is dropped.
    append_timeout: Duration,
}

impl EventRecorder {
    pub fn new(storage: Arc<dyn Storage>, append_timeout: Duration) -> Self {
        Self {
            storage,
            append_timeout,
        }
    }

    /// Serializes `event` and appends it, returning the assigned row id.
    pub async fn record(&self, event: &CapturedEvent) -> Result<i64, RecordError> {
        let bytes =
            serde_json::to_vec(event).map_err(|e| RecordError::Serialization(e.to_string()))?;

        match tokio::time::timeout(self.append_timeout, self.storage.append(&bytes)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(RecordError::Timeout),
        }
    }

    /// Records `event`, logging and swallowing any failure.
    pub async fn capture(&self, event: CapturedEvent) {
        match self.record(&event).await {
            Ok(id) => debug!(
                "[{}] recorded {} event as row {}",
                event.address(),
                event.source(),
                id
            ),
            Err(e) => error!(
                "[{}] dropping {} event captured at {}: {}",
                event.address(),
                event.source(),
                event.time(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::SshAuthCapture;
    use crate::error_handling::types::StorageError;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::EntryStream;
    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};

    struct BrokenStorage;

    #[async_trait]
    impl Storage for BrokenStorage {
        async fn append(&self, _entry: &[u8]) -> Result<i64, StorageError> {
            Err(StorageError::WriteFailed)
        }
        fn scan_from(&self, _after_id: i64) -> EntryStream {
            stream::empty().boxed()
        }
        async fn delete_up_to(&self, _id: i64) -> Result<u64, StorageError> {
            Err(StorageError::WriteFailed)
        }
        async fn count(&self) -> Result<u64, StorageError> {
            Err(StorageError::ReadFailed)
        }
    }

    struct StalledStorage;

    #[async_trait]
    impl Storage for StalledStorage {
        async fn append(&self, _entry: &[u8]) -> Result<i64, StorageError> {
            std::future::pending().await
        }
        fn scan_from(&self, _after_id: i64) -> EntryStream {
            stream::empty().boxed()
        }
        async fn delete_up_to(&self, _id: i64) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn count(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn attempt() -> CapturedEvent {
        CapturedEvent::Ssh(SshAuthCapture {
            address: "192.0.2.1".into(),
            time: 1,
            user: "admin".into(),
            pass: "admin".into(),
            client_ver: "SSH-2.0-Go".into(),
        })
    }

    #[tokio::test]
    async fn record_appends_serialized_event() {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = MemoryStorage::new();
        let recorder = EventRecorder::new(Arc::new(storage.clone()), Duration::from_secs(1));

        let id = recorder.record(&attempt()).await.unwrap();

        let rows = storage.entries();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        let stored: CapturedEvent = serde_json::from_slice(&rows[0].entry).unwrap();
        assert_eq!(stored, attempt());
    }

    #[tokio::test]
    async fn storage_failure_is_reported_but_capture_swallows_it() {
        let recorder = EventRecorder::new(Arc::new(BrokenStorage), Duration::from_secs(1));
        assert!(matches!(
            recorder.record(&attempt()).await,
            Err(RecordError::Storage(StorageError::WriteFailed))
        ));
        recorder.capture(attempt()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_storage_times_out() {
        let recorder = EventRecorder::new(Arc::new(StalledStorage), Duration::from_secs(2));
        assert!(matches!(
            recorder.record(&attempt()).await,
            Err(RecordError::Timeout)
        ));
    }
}

use serde::{Deserialize, Serialize};

/// One persisted row of the event log.
///
/// `id` is assigned by the store on append, strictly increasing and never
/// reused. `entry` holds the serialized event exactly as it was appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub entry: Vec<u8>,
}

impl From<crate::storage::db_entities::Model> for LogEntry {
    fn from(model: crate::storage::db_entities::Model) -> Self {
        Self {
            id: model.id,
            entry: model.entry,
        }
    }
}

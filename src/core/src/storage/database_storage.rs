use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::{debug, error, info};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{ActiveModel, Column, Entity};
use crate::storage::storage_trait::{EntryStream, Storage};
use crate::storage::types::LogEntry;

const CREATE_LOG_TABLE: &str = "CREATE TABLE IF NOT EXISTS log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry BLOB NOT NULL
);";

/// SQLite-backed event log.
///
/// `AUTOINCREMENT` keeps ids monotonic across deletions, which the exporter
/// relies on for its high-water mark.
pub struct DatabaseStorage {
    db: DatabaseConnection,
    batch_size: u64,
}

impl DatabaseStorage {
    /// Rows fetched per round trip while scanning
    pub const DEFAULT_BATCH_SIZE: u64 = 256;

    /// Create or open the database file, creating the `log` table if absent
    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed
                })?;
            }
        }

        let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path_ref.display()));
        opts.max_connections(5).sqlx_logging(false);
        let db = Database::connect(opts).await.map_err(|e| {
            error!("Failed to open database {}: {}", path_ref.display(), e);
            StorageError::ConnectionFailed
        })?;

        db.execute_unprepared(CREATE_LOG_TABLE).await.map_err(|e| {
            error!("Failed to create log table: {}", e);
            StorageError::WriteFailed
        })?;

        info!("DatabaseStorage initialized at {}", path_ref.display());
        Ok(Self {
            db,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        })
    }

    /// Overrides the number of rows fetched per scan round trip.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Keyset cursor carried between scan pages.
struct ScanCursor {
    db: DatabaseConnection,
    after: i64,
    // Highest id at the time of the first page; rows above it are left for the next scan.
    upper: Option<i64>,
    batch_size: u64,
}

async fn next_page(
    mut cursor: ScanCursor,
) -> Result<Option<(Vec<LogEntry>, ScanCursor)>, StorageError> {
    let upper = match cursor.upper {
        Some(upper) => upper,
        None => {
            let newest: Option<i64> = Entity::find()
                .select_only()
                .column(Column::Id)
                .order_by_desc(Column::Id)
                .into_tuple()
                .one(&cursor.db)
                .await
                .map_err(|e| {
                    error!("Failed to read newest log id: {}", e);
                    StorageError::ReadFailed
                })?;
            match newest {
                Some(id) => {
                    cursor.upper = Some(id);
                    id
                }
                None => return Ok(None),
            }
        }
    };

    if cursor.after >= upper {
        return Ok(None);
    }

    let rows = Entity::find()
        .filter(Column::Id.gt(cursor.after))
        .filter(Column::Id.lte(upper))
        .order_by_asc(Column::Id)
        .limit(cursor.batch_size)
        .all(&cursor.db)
        .await
        .map_err(|e| {
            error!("Failed to read log page after id {}: {}", cursor.after, e);
            StorageError::ReadFailed
        })?;

    match rows.last() {
        Some(last) => cursor.after = last.id,
        None => return Ok(None),
    }
    debug!("Scanned {} log rows up to id {}", rows.len(), cursor.after);

    Ok(Some((rows.into_iter().map(LogEntry::from).collect(), cursor)))
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn append(&self, entry: &[u8]) -> Result<i64, StorageError> {
        let row = ActiveModel {
            id: NotSet,
            entry: Set(entry.to_vec()),
        };
        let res = Entity::insert(row).exec(&self.db).await.map_err(|e| {
            error!("Failed to append log entry: {}", e);
            StorageError::WriteFailed
        })?;
        Ok(res.last_insert_id)
    }

    fn scan_from(&self, after_id: i64) -> EntryStream {
        let cursor = ScanCursor {
            db: self.db.clone(),
            after: after_id,
            upper: None,
            batch_size: self.batch_size,
        };
        stream::try_unfold(cursor, next_page)
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten()
            .boxed()
    }

    async fn delete_up_to(&self, id: i64) -> Result<u64, StorageError> {
        if id <= 0 {
            return Ok(0);
        }
        let res = Entity::delete_many()
            .filter(Column::Id.lt(id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to delete log rows below {}: {}", id, e);
                StorageError::WriteFailed
            })?;
        Ok(res.rows_affected)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Entity::find().count(&self.db).await.map_err(|e| {
            error!("Failed to count log rows: {}", e);
            StorageError::ReadFailed
        })
    }
}

//! SeaORM entity model used by the database storage backend.
//!
//! Maps the `log` table created by `database_storage`: one row per captured
//! event, keyed by an autoincrement id.

use sea_orm::entity::prelude::*;

/// Log table entity model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "log")]
pub struct Model {
    /// Autoincrement row id, never reused
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Serialized event, stored as raw JSON bytes
    pub entry: Vec<u8>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

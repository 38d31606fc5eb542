// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Metadata store interface.
//!
//! Every mutating call is a single transaction: it either commits entirely
//! or leaves nothing behind.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::records::{ContentCategory, ShareGrant, StoredFile, TextRecord};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record already exists: {0}")]
    Duplicate(Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

impl MetadataError {
    /// Failures that may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MetadataError::Unavailable(_)
                | MetadataError::Io(_)
                | MetadataError::RedbStorage(redb::StorageError::Io(_))
                | MetadataError::RedbTransaction(_)
        )
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Persistence for file records, text records, share grants and quotas.
pub trait MetadataStore: Send + Sync {
    // ========== Stored files ==========

    /// Insert a new record. Fails with `Duplicate` if the id is taken.
    fn insert_file(&self, file: &StoredFile) -> MetadataResult<()>;

    fn get_file(&self, id: &Uuid) -> MetadataResult<Option<StoredFile>>;

    /// Remove a record together with its share grants.
    ///
    /// Returns `false` if no record existed.
    fn delete_file(&self, id: &Uuid) -> MetadataResult<bool>;

    /// Set retention fields. Returns the updated record, or `None` if absent.
    fn update_retention(
        &self,
        id: &Uuid,
        delete_after_days: Option<u32>,
        scheduled_delete_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<Option<StoredFile>>;

    /// Switch an inline record to a filesystem location.
    ///
    /// With `keep_inline` the old ciphertext moves to `retained_inline`.
    /// Returns `false` if the record is missing or no longer inline.
    fn relocate_to_filesystem(
        &self,
        id: &Uuid,
        path: &str,
        iv: &[u8],
        keep_inline: bool,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<bool>;

    /// Drop a retained legacy ciphertext. Returns `false` if there was none.
    fn clear_retained_inline(&self, id: &Uuid, updated_at: DateTime<Utc>) -> MetadataResult<bool>;

    /// Ids whose `scheduled_delete_at` is at or before `now`, oldest first.
    fn list_expired(&self, now: DateTime<Utc>) -> MetadataResult<Vec<Uuid>>;

    /// Ids of records still in inline mode.
    fn list_inline(&self) -> MetadataResult<Vec<Uuid>>;

    /// Ids of records carrying a retained legacy ciphertext.
    fn list_retained_inline(&self) -> MetadataResult<Vec<Uuid>>;

    /// Sum of plaintext sizes for one owner and category.
    fn sum_sizes(&self, owner_id: &str, category: ContentCategory) -> MetadataResult<u64>;

    // ========== Text records ==========

    fn insert_text(&self, record: &TextRecord) -> MetadataResult<()>;

    fn get_text(&self, id: &Uuid) -> MetadataResult<Option<TextRecord>>;

    fn delete_text(&self, id: &Uuid) -> MetadataResult<bool>;

    // ========== Sharing ==========

    /// Record a grant. Fails with `NotFound` if the file does not exist.
    fn grant_share(&self, grant: &ShareGrant) -> MetadataResult<()>;

    fn list_shares(&self, file_id: &Uuid) -> MetadataResult<Vec<ShareGrant>>;

    // ========== Quotas ==========

    fn get_quota(&self, owner_id: &str) -> MetadataResult<Option<u64>>;

    fn set_quota(&self, owner_id: &str, quota_bytes: u64) -> MetadataResult<()>;

    /// Cheap read probe used by readiness checks.
    fn health_check(&self) -> MetadataResult<()>;
}

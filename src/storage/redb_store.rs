// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Metadata store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `files`: file_id → serialized StoredFile
//! - `content_sizes`: composite key (owner|category|id) → plaintext size
//! - `expiry_index`: (scheduled_delete_at_be ‖ file_id) → ()
//! - `shares`: composite key (file_id|grantee) → serialized ShareGrant
//! - `texts`: text_id → serialized TextRecord
//! - `quotas`: owner_id → quota bytes

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use uuid::Uuid;

use super::metadata::{MetadataError, MetadataResult, MetadataStore};
use super::records::{
    ContentCategory, RetainedInline, ShareGrant, StorageLocation, StoredFile, TextRecord,
};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: file_id → serialized StoredFile (JSON bytes).
const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Index: `owner|category|id` → plaintext size, for per-owner usage sums.
const CONTENT_SIZES: TableDefinition<&str, u64> = TableDefinition::new("content_sizes");

/// Index: order-preserving timestamp bytes followed by the file id.
const EXPIRY: TableDefinition<&[u8], ()> = TableDefinition::new("expiry_index");

/// Grants: `file_id|grantee` → serialized ShareGrant.
const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

const TEXTS: TableDefinition<&str, &[u8]> = TableDefinition::new("texts");

const QUOTAS: TableDefinition<&str, u64> = TableDefinition::new("quotas");

// =============================================================================
// Index Key Helpers
// =============================================================================

/// `owner|category|id`. Owner ids never contain `|`.
fn content_key(owner_id: &str, category: ContentCategory, id: &Uuid) -> String {
    format!("{owner_id}|{}|{id}", category.as_str())
}

/// Half-open range covering every `content_key` of one owner and category.
///
/// `}` sorts directly after `|`, so `prefix}` bounds all keys under `prefix|`.
fn content_range(owner_id: &str, category: ContentCategory) -> (String, String) {
    let prefix = format!("{owner_id}|{}", category.as_str());
    (format!("{prefix}|"), format!("{prefix}}}"))
}

fn share_key(file_id: &Uuid, grantee_id: &str) -> String {
    format!("{file_id}|{grantee_id}")
}

fn share_range(file_id: &Uuid) -> (String, String) {
    (format!("{file_id}|"), format!("{file_id}}}"))
}

/// Timestamp with the sign bit flipped so big-endian bytes sort chronologically.
fn timestamp_bytes(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
}

fn expiry_key(at: DateTime<Utc>, id: &Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&timestamp_bytes(at));
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn id_from_expiry_key(key: &[u8]) -> Option<Uuid> {
    let bytes: [u8; 16] = key.get(8..24)?.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

// =============================================================================
// RedbMetadataStore
// =============================================================================

/// Embedded ACID metadata store.
pub struct RedbMetadataStore {
    db: Database,
}

impl RedbMetadataStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> MetadataResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(CONTENT_SIZES)?;
            let _ = write_txn.open_table(EXPIRY)?;
            let _ = write_txn.open_table(SHARES)?;
            let _ = write_txn.open_table(TEXTS)?;
            let _ = write_txn.open_table(QUOTAS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Read a file record inside a write transaction.
    fn load_file(write_txn: &WriteTransaction, id: &str) -> MetadataResult<Option<StoredFile>> {
        let files = write_txn.open_table(FILES)?;
        let bytes = match files.get(id)? {
            Some(value) => value.value().to_vec(),
            None => return Ok(None),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn store_file(write_txn: &WriteTransaction, file: &StoredFile) -> MetadataResult<()> {
        let json = serde_json::to_vec(file)?;
        let mut files = write_txn.open_table(FILES)?;
        files.insert(file.id.to_string().as_str(), json.as_slice())?;
        Ok(())
    }

    /// Collect ids of file records matching `predicate`.
    fn scan_files(&self, predicate: impl Fn(&StoredFile) -> bool) -> MetadataResult<Vec<Uuid>> {
        let read_txn = self.db.begin_read()?;
        let files = read_txn.open_table(FILES)?;
        let mut ids = Vec::new();
        for entry in files.iter()? {
            let (_, value) = entry?;
            let file: StoredFile = serde_json::from_slice(value.value())?;
            if predicate(&file) {
                ids.push(file.id);
            }
        }
        Ok(ids)
    }
}

impl MetadataStore for RedbMetadataStore {
    // =========================================================================
    // Stored files
    // =========================================================================

    fn insert_file(&self, file: &StoredFile) -> MetadataResult<()> {
        let json = serde_json::to_vec(file)?;
        let id = file.id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut files = write_txn.open_table(FILES)?;
            if files.get(id.as_str())?.is_some() {
                return Err(MetadataError::Duplicate(file.id));
            }
            files.insert(id.as_str(), json.as_slice())?;

            let mut sizes = write_txn.open_table(CONTENT_SIZES)?;
            let key = content_key(&file.owner_id, ContentCategory::Audio, &file.id);
            sizes.insert(key.as_str(), file.size_bytes)?;

            if let Some(at) = file.scheduled_delete_at {
                let mut expiry = write_txn.open_table(EXPIRY)?;
                expiry.insert(expiry_key(at, &file.id).as_slice(), ())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_file(&self, id: &Uuid) -> MetadataResult<Option<StoredFile>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        match table.get(id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn delete_file(&self, id: &Uuid) -> MetadataResult<bool> {
        let id_str = id.to_string();
        let write_txn = self.db.begin_write()?;
        let existed = {
            match Self::load_file(&write_txn, &id_str)? {
                None => false,
                Some(file) => {
                    let mut files = write_txn.open_table(FILES)?;
                    files.remove(id_str.as_str())?;

                    let mut sizes = write_txn.open_table(CONTENT_SIZES)?;
                    let key = content_key(&file.owner_id, ContentCategory::Audio, id);
                    sizes.remove(key.as_str())?;

                    if let Some(at) = file.scheduled_delete_at {
                        let mut expiry = write_txn.open_table(EXPIRY)?;
                        expiry.remove(expiry_key(at, id).as_slice())?;
                    }

                    let mut shares = write_txn.open_table(SHARES)?;
                    let (start, end) = share_range(id);
                    let keys = shares
                        .range(start.as_str()..end.as_str())?
                        .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for key in keys {
                        shares.remove(key.as_str())?;
                    }
                    true
                }
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn update_retention(
        &self,
        id: &Uuid,
        delete_after_days: Option<u32>,
        scheduled_delete_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<Option<StoredFile>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            match Self::load_file(&write_txn, &id.to_string())? {
                None => None,
                Some(mut file) => {
                    let mut expiry = write_txn.open_table(EXPIRY)?;
                    if let Some(old) = file.scheduled_delete_at {
                        expiry.remove(expiry_key(old, id).as_slice())?;
                    }
                    if let Some(new) = scheduled_delete_at {
                        expiry.insert(expiry_key(new, id).as_slice(), ())?;
                    }

                    file.delete_after_days = delete_after_days;
                    file.scheduled_delete_at = scheduled_delete_at;
                    file.updated_at = updated_at;
                    Self::store_file(&write_txn, &file)?;
                    Some(file)
                }
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn relocate_to_filesystem(
        &self,
        id: &Uuid,
        path: &str,
        iv: &[u8],
        keep_inline: bool,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<bool> {
        let write_txn = self.db.begin_write()?;
        let relocated = {
            match Self::load_file(&write_txn, &id.to_string())? {
                Some(mut file) => match std::mem::replace(
                    &mut file.location,
                    StorageLocation::Filesystem {
                        path: path.to_string(),
                        iv: iv.to_vec(),
                    },
                ) {
                    StorageLocation::Inline { ciphertext, iv } => {
                        file.retained_inline =
                            keep_inline.then_some(RetainedInline { ciphertext, iv });
                        file.updated_at = updated_at;
                        Self::store_file(&write_txn, &file)?;
                        true
                    }
                    StorageLocation::Filesystem { .. } => false,
                },
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(relocated)
    }

    fn clear_retained_inline(&self, id: &Uuid, updated_at: DateTime<Utc>) -> MetadataResult<bool> {
        let write_txn = self.db.begin_write()?;
        let cleared = {
            match Self::load_file(&write_txn, &id.to_string())? {
                Some(mut file) if file.retained_inline.is_some() => {
                    file.retained_inline = None;
                    file.updated_at = updated_at;
                    Self::store_file(&write_txn, &file)?;
                    true
                }
                _ => false,
            }
        };
        write_txn.commit()?;
        Ok(cleared)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> MetadataResult<Vec<Uuid>> {
        let mut upper = [0xFFu8; 24];
        upper[..8].copy_from_slice(&timestamp_bytes(now));

        let read_txn = self.db.begin_read()?;
        let expiry = read_txn.open_table(EXPIRY)?;
        let mut ids = Vec::new();
        for entry in expiry.range(..=upper.as_slice())? {
            let (key, _) = entry?;
            if let Some(id) = id_from_expiry_key(key.value()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn list_inline(&self) -> MetadataResult<Vec<Uuid>> {
        self.scan_files(|file| matches!(file.location, StorageLocation::Inline { .. }))
    }

    fn list_retained_inline(&self) -> MetadataResult<Vec<Uuid>> {
        self.scan_files(|file| file.retained_inline.is_some())
    }

    fn sum_sizes(&self, owner_id: &str, category: ContentCategory) -> MetadataResult<u64> {
        let (start, end) = content_range(owner_id, category);
        let read_txn = self.db.begin_read()?;
        let sizes = read_txn.open_table(CONTENT_SIZES)?;
        let mut total = 0u64;
        for entry in sizes.range(start.as_str()..end.as_str())? {
            let (_, size) = entry?;
            total = total.saturating_add(size.value());
        }
        Ok(total)
    }

    // =========================================================================
    // Text records
    // =========================================================================

    fn insert_text(&self, record: &TextRecord) -> MetadataResult<()> {
        let json = serde_json::to_vec(record)?;
        let id = record.id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut texts = write_txn.open_table(TEXTS)?;
            if texts.get(id.as_str())?.is_some() {
                return Err(MetadataError::Duplicate(record.id));
            }
            texts.insert(id.as_str(), json.as_slice())?;

            let mut sizes = write_txn.open_table(CONTENT_SIZES)?;
            let key = content_key(&record.owner_id, ContentCategory::Text, &record.id);
            sizes.insert(key.as_str(), record.size_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_text(&self, id: &Uuid) -> MetadataResult<Option<TextRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TEXTS)?;
        match table.get(id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn delete_text(&self, id: &Uuid) -> MetadataResult<bool> {
        let id_str = id.to_string();
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut texts = write_txn.open_table(TEXTS)?;
            let removed = texts
                .remove(id_str.as_str())?
                .map(|value| value.value().to_vec());
            match removed {
                Some(bytes) => {
                    let record: TextRecord = serde_json::from_slice(&bytes)?;
                    let mut sizes = write_txn.open_table(CONTENT_SIZES)?;
                    let key = content_key(&record.owner_id, ContentCategory::Text, id);
                    sizes.remove(key.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    // =========================================================================
    // Sharing
    // =========================================================================

    fn grant_share(&self, grant: &ShareGrant) -> MetadataResult<()> {
        let json = serde_json::to_vec(grant)?;
        let write_txn = self.db.begin_write()?;
        {
            let files = write_txn.open_table(FILES)?;
            if files.get(grant.file_id.to_string().as_str())?.is_none() {
                return Err(MetadataError::NotFound(format!("file {}", grant.file_id)));
            }
            let mut shares = write_txn.open_table(SHARES)?;
            let key = share_key(&grant.file_id, &grant.grantee_id);
            shares.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_shares(&self, file_id: &Uuid) -> MetadataResult<Vec<ShareGrant>> {
        let (start, end) = share_range(file_id);
        let read_txn = self.db.begin_read()?;
        let shares = read_txn.open_table(SHARES)?;
        let mut grants = Vec::new();
        for entry in shares.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            grants.push(serde_json::from_slice(value.value())?);
        }
        Ok(grants)
    }

    // =========================================================================
    // Quotas
    // =========================================================================

    fn get_quota(&self, owner_id: &str) -> MetadataResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(QUOTAS)?;
        Ok(table.get(owner_id)?.map(|v| v.value()))
    }

    fn set_quota(&self, owner_id: &str, quota_bytes: u64) -> MetadataResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(QUOTAS)?;
            table.insert(owner_id, quota_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn health_check(&self) -> MetadataResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(FILES)?;
        Ok(())
    }
}

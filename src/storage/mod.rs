// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Encrypted Content Storage
//!
//! Recordings and text content are stored as authenticated envelopes (see
//! [`crate::crypto`]); their metadata lives in an embedded redb database.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/
//!   audio/{owner_id}/
//!     {file_id}.enc     # SALT || IV || AUTH_TAG || CIPHERTEXT
//!   metadata.redb       # file/text records, indexes, shares, quotas
//! ```
//!
//! Legacy records keep their ciphertext inline in the metadata record
//! instead of on disk. Both modes are readable; new saves always go to disk
//! and [`migration`] moves old records over.

pub mod audio;
pub mod metadata;
pub mod migration;
pub mod paths;
pub mod quota;
pub mod records;
pub mod redb_store;
pub mod retention;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{AudioBuffer, AudioReader, AudioStorageService, SaveRequest};
pub use metadata::{MetadataError, MetadataResult, MetadataStore};
pub use migration::{MigrationOptions, MigrationReport, MigrationTool};
pub use paths::{PathError, StoragePaths};
pub use quota::{QuotaAccountant, QuotaDecision, QuotaDenial, QuotaUsage, StorageQuota};
pub use records::{
    ContentCategory, RetainedInline, ShareGrant, StorageLocation, StorageMode, StoredFile,
    TextRecord,
};
pub use redb_store::RedbMetadataStore;
pub use retention::{effective_retention, RetentionPolicy, StaticRetentionPolicy};
pub use text::TextContentService;

use std::io;

use uuid::Uuid;

use crate::crypto::CryptoError;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Ciphertext is structurally invalid (short header, bad inline blob).
    #[error("malformed ciphertext: {0}")]
    Format(String),

    /// Authentication failed: content was altered or the key is wrong.
    #[error("integrity check failed")]
    Integrity,

    #[error("key derivation unavailable: {0}")]
    KeyDerivation(String),

    #[error("record not found: {0}")]
    RecordNotFound(Uuid),

    /// Metadata exists but the ciphertext file does not.
    #[error("content missing for record {0}")]
    ContentMissing(Uuid),

    #[error(
        "quota exceeded for {owner_id}: {used_bytes} used + {incoming_bytes} incoming > {quota_bytes}"
    )]
    QuotaExceeded {
        owner_id: String,
        used_bytes: u64,
        incoming_bytes: u64,
        quota_bytes: u64,
    },

    #[error("invalid retention: {0}")]
    InvalidRetention(String),

    #[error("invalid owner id: {0:?}")]
    InvalidOwnerId(String),

    #[error("I/O error: {0}")]
    TransientIo(#[from] io::Error),

    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Whether the same call may succeed later without any change.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::TransientIo(_) => true,
            StorageError::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<CryptoError> for StorageError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Format(msg) => StorageError::Format(msg),
            CryptoError::Integrity => StorageError::Integrity,
            CryptoError::KeyDerivation(msg) => StorageError::KeyDerivation(msg),
            CryptoError::Io(e) => StorageError::TransientIo(e),
        }
    }
}

impl From<PathError> for StorageError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidOwnerId(owner) => StorageError::InvalidOwnerId(owner),
            PathError::Io(e) => StorageError::TransientIo(e),
        }
    }
}

/// Longest accepted retention period: 100 years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Reject retention periods that would expire content at creation time or
/// lie beyond [`MAX_RETENTION_DAYS`].
pub(crate) fn validate_retention(days: Option<u32>) -> StorageResult<()> {
    match days {
        Some(0) => Err(StorageError::InvalidRetention(
            "retention must be at least one day".to_string(),
        )),
        Some(d) if d > MAX_RETENTION_DAYS => Err(StorageError::InvalidRetention(format!(
            "retention must be at most {MAX_RETENTION_DAYS} days, got {d}"
        ))),
        _ => Ok(()),
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Metadata records persisted by the metadata store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StorageError, StorageResult};

/// Where a file's ciphertext lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageLocation {
    /// Legacy mode: `SALT || AUTH_TAG || CIPHERTEXT` kept in the record.
    Inline {
        #[serde(with = "base64_bytes")]
        ciphertext: Vec<u8>,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
    },
    /// Envelope file at `path`, relative to the storage base.
    Filesystem {
        path: String,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
    },
}

/// Storage mode discriminant, mostly for logging and reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Inline,
    Filesystem,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Inline => f.write_str("inline"),
            StorageMode::Filesystem => f.write_str("filesystem"),
        }
    }
}

impl StorageLocation {
    pub fn mode(&self) -> StorageMode {
        match self {
            StorageLocation::Inline { .. } => StorageMode::Inline,
            StorageLocation::Filesystem { .. } => StorageMode::Filesystem,
        }
    }

    pub fn iv(&self) -> &[u8] {
        match self {
            StorageLocation::Inline { iv, .. } | StorageLocation::Filesystem { iv, .. } => iv,
        }
    }
}

/// Inline ciphertext kept after migration until it is explicitly purged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetainedInline {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

/// Metadata for one stored recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    pub id: Uuid,
    pub owner_id: String,
    pub filename: String,
    pub original_name: String,
    /// Plaintext length in bytes.
    pub size_bytes: u64,
    pub mime_type: String,
    pub device_id: Option<String>,
    pub location: StorageLocation,
    pub created_at: DateTime<Utc>,
    pub delete_after_days: Option<u32>,
    pub scheduled_delete_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_inline: Option<RetainedInline>,
}

impl StoredFile {
    pub fn storage_mode(&self) -> StorageMode {
        self.location.mode()
    }

    pub fn encryption_iv(&self) -> &[u8] {
        self.location.iv()
    }

    /// Whether retention has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_delete_at.is_some_and(|at| at <= now)
    }
}

/// Deletion time for a retention of `days` starting at `created_at`.
///
/// Fails with `InvalidRetention` when the result is not representable.
pub fn scheduled_delete_at(
    created_at: DateTime<Utc>,
    days: Option<u32>,
) -> StorageResult<Option<DateTime<Utc>>> {
    let Some(days) = days else {
        return Ok(None);
    };
    Duration::try_days(i64::from(days))
        .and_then(|span| created_at.checked_add_signed(span))
        .map(Some)
        .ok_or_else(|| {
            StorageError::InvalidRetention(format!("{days} days is past the representable time range"))
        })
}

/// Small encrypted text payload owned by a user (notes, transcripts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    /// Plaintext length in bytes.
    pub size_bytes: u64,
    /// Full `SALT || IV || AUTH_TAG || CIPHERTEXT` envelope.
    #[serde(with = "base64_bytes")]
    pub envelope: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Access granted to another user for one stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareGrant {
    pub file_id: Uuid,
    pub grantee_id: String,
    pub granted_at: DateTime<Utc>,
}

/// Content categories counted against a quota.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Audio,
    Text,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 2] = [ContentCategory::Audio, ContentCategory::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Audio => "audio",
            ContentCategory::Text => "text",
        }
    }
}

/// Serde helper storing byte fields as base64 strings.
mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

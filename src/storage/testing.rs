// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for storage tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::metadata::{MetadataError, MetadataResult, MetadataStore};
use super::records::{
    scheduled_delete_at, ContentCategory, ShareGrant, StorageLocation, StoredFile, TextRecord,
};
use super::quota::DEFAULT_QUOTA_BYTES;
use super::{AudioStorageService, RedbMetadataStore, StaticRetentionPolicy, StoragePaths};
use crate::clock::ManualClock;
use crate::crypto::{EnvelopeCodec, MasterSecret};
use crate::state::AppState;

pub(crate) fn test_codec() -> Arc<EnvelopeCodec> {
    Arc::new(EnvelopeCodec::new(MasterSecret::new([0x2Cu8; 32])))
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 30, 0).unwrap()
}

fn record(
    owner_id: &str,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    days: Option<u32>,
    location: impl FnOnce(&Uuid) -> StorageLocation,
) -> StoredFile {
    let id = Uuid::new_v4();
    StoredFile {
        id,
        owner_id: owner_id.to_string(),
        filename: format!("{id}.m4a"),
        original_name: "recording.m4a".to_string(),
        size_bytes,
        mime_type: "audio/mp4".to_string(),
        device_id: None,
        location: location(&id),
        created_at,
        delete_after_days: days,
        scheduled_delete_at: scheduled_delete_at(created_at, days).unwrap(),
        updated_at: created_at,
        retained_inline: None,
    }
}

/// Filesystem-mode record with no content behind it.
pub(crate) fn filesystem_record(
    owner_id: &str,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    days: Option<u32>,
) -> StoredFile {
    record(owner_id, size_bytes, created_at, days, |id| {
        StorageLocation::Filesystem {
            path: format!("{owner_id}/{id}.enc"),
            iv: vec![0; 16],
        }
    })
}

/// Inline-mode record with placeholder ciphertext.
pub(crate) fn inline_record(
    owner_id: &str,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    days: Option<u32>,
) -> StoredFile {
    record(owner_id, size_bytes, created_at, days, |_| {
        StorageLocation::Inline {
            ciphertext: vec![0x5E; 48 + size_bytes as usize],
            iv: vec![3; 16],
        }
    })
}

/// Inline-mode record holding a real envelope of `plaintext`.
pub(crate) fn encrypted_inline_record(
    codec: &EnvelopeCodec,
    owner_id: &str,
    plaintext: &[u8],
    created_at: DateTime<Utc>,
) -> StoredFile {
    let (ciphertext, iv) = codec.encrypt_buffer(plaintext).unwrap().to_inline();
    record(owner_id, plaintext.len() as u64, created_at, None, |_| {
        StorageLocation::Inline {
            ciphertext,
            iv: iv.to_vec(),
        }
    })
}

/// Metadata store wrapper that fails selected operations on demand.
pub(crate) struct FailingStore {
    inner: RedbMetadataStore,
    fail_inserts: AtomicBool,
    fail_relocations: AtomicBool,
    failing_deletes: Mutex<HashSet<Uuid>>,
}

fn injected() -> MetadataError {
    MetadataError::Unavailable("injected failure".to_string())
}

impl FailingStore {
    pub(crate) fn new(inner: RedbMetadataStore) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_relocations: AtomicBool::new(false),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail_inserts(&self, on: bool) {
        self.fail_inserts.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_relocations(&self, on: bool) {
        self.fail_relocations.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_delete_of(&self, id: Uuid) {
        self.failing_deletes.lock().unwrap().insert(id);
    }

    pub(crate) fn heal_delete_of(&self, id: &Uuid) {
        self.failing_deletes.lock().unwrap().remove(id);
    }
}

impl MetadataStore for FailingStore {
    fn insert_file(&self, file: &StoredFile) -> MetadataResult<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.insert_file(file)
    }

    fn get_file(&self, id: &Uuid) -> MetadataResult<Option<StoredFile>> {
        self.inner.get_file(id)
    }

    fn delete_file(&self, id: &Uuid) -> MetadataResult<bool> {
        if self.failing_deletes.lock().unwrap().contains(id) {
            return Err(injected());
        }
        self.inner.delete_file(id)
    }

    fn update_retention(
        &self,
        id: &Uuid,
        delete_after_days: Option<u32>,
        scheduled_delete_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<Option<StoredFile>> {
        self.inner
            .update_retention(id, delete_after_days, scheduled_delete_at, updated_at)
    }

    fn relocate_to_filesystem(
        &self,
        id: &Uuid,
        path: &str,
        iv: &[u8],
        keep_inline: bool,
        updated_at: DateTime<Utc>,
    ) -> MetadataResult<bool> {
        if self.fail_relocations.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner
            .relocate_to_filesystem(id, path, iv, keep_inline, updated_at)
    }

    fn clear_retained_inline(&self, id: &Uuid, updated_at: DateTime<Utc>) -> MetadataResult<bool> {
        self.inner.clear_retained_inline(id, updated_at)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> MetadataResult<Vec<Uuid>> {
        self.inner.list_expired(now)
    }

    fn list_inline(&self) -> MetadataResult<Vec<Uuid>> {
        self.inner.list_inline()
    }

    fn list_retained_inline(&self) -> MetadataResult<Vec<Uuid>> {
        self.inner.list_retained_inline()
    }

    fn sum_sizes(&self, owner_id: &str, category: ContentCategory) -> MetadataResult<u64> {
        self.inner.sum_sizes(owner_id, category)
    }

    fn insert_text(&self, record: &TextRecord) -> MetadataResult<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.insert_text(record)
    }

    fn get_text(&self, id: &Uuid) -> MetadataResult<Option<TextRecord>> {
        self.inner.get_text(id)
    }

    fn delete_text(&self, id: &Uuid) -> MetadataResult<bool> {
        self.inner.delete_text(id)
    }

    fn grant_share(&self, grant: &ShareGrant) -> MetadataResult<()> {
        self.inner.grant_share(grant)
    }

    fn list_shares(&self, file_id: &Uuid) -> MetadataResult<Vec<ShareGrant>> {
        self.inner.list_shares(file_id)
    }

    fn get_quota(&self, owner_id: &str) -> MetadataResult<Option<u64>> {
        self.inner.get_quota(owner_id)
    }

    fn set_quota(&self, owner_id: &str, quota_bytes: u64) -> MetadataResult<()> {
        self.inner.set_quota(owner_id, quota_bytes)
    }

    fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check()
    }
}

/// Audio service wired to a temp directory, a redb store and a manual clock.
pub(crate) struct Harness {
    pub service: Arc<AudioStorageService>,
    pub store: Arc<FailingStore>,
    pub policy: Arc<StaticRetentionPolicy>,
    pub clock: ManualClock,
    pub codec: Arc<EnvelopeCodec>,
    pub root: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_system_default(None)
    }

    pub(crate) fn with_system_default(system_default: Option<u32>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("audio");
        let paths = StoragePaths::new(&root);
        paths.ensure_root().unwrap();

        let store = Arc::new(FailingStore::new(
            RedbMetadataStore::open(&dir.path().join("metadata.redb")).unwrap(),
        ));
        let policy = Arc::new(StaticRetentionPolicy::new(system_default));
        let clock = ManualClock::new(epoch());
        let codec = test_codec();

        let service = Arc::new(AudioStorageService::new(
            Arc::clone(&codec),
            paths,
            store.clone(),
            policy.clone(),
            Arc::new(clock.clone()),
        ));

        Self {
            service,
            store,
            policy,
            clock,
            codec,
            root,
            _dir: dir,
        }
    }

    /// Application state over the same store, policy and clock.
    pub(crate) fn app_state(&self) -> AppState {
        AppState::new(
            self.codec.clone(),
            StoragePaths::new(&self.root),
            self.store.clone(),
            self.policy.clone(),
            Arc::new(self.clock.clone()),
            DEFAULT_QUOTA_BYTES,
        )
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-shot conversion of inline recordings to filesystem storage.
//!
//! Each inline record is decrypted, re-encrypted to its owner's directory
//! (staging file, fsync, rename) and only then switched to filesystem mode.
//! The legacy ciphertext is dropped in that same record update when
//! clearing is requested, otherwise it is kept aside in `retained_inline`
//! until a later run with clearing. Re-running is safe: records already on
//! disk are not candidates.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::audio::AudioStorageService;
use super::records::StorageLocation;
use super::StorageResult;
use crate::crypto::Envelope;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Report candidates without changing anything.
    pub dry_run: bool,
    /// Drop legacy inline ciphertext once its file is in place.
    pub clear_inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Inline records found.
    pub candidates: usize,
    /// Records moved to filesystem storage.
    pub migrated: usize,
    /// Legacy ciphertexts dropped (during the move or from earlier runs).
    pub cleared: usize,
    pub failed: usize,
}

pub struct MigrationTool {
    storage: Arc<AudioStorageService>,
}

impl MigrationTool {
    pub fn new(storage: Arc<AudioStorageService>) -> Self {
        Self { storage }
    }

    pub fn run(&self, options: MigrationOptions) -> StorageResult<MigrationReport> {
        let candidates = self.storage.inline_records()?;
        let mut report = MigrationReport {
            candidates: candidates.len(),
            ..MigrationReport::default()
        };

        info!(
            candidates = report.candidates,
            dry_run = options.dry_run,
            clear_inline = options.clear_inline,
            "Starting inline → filesystem migration"
        );

        if options.dry_run {
            for id in &candidates {
                info!(file_id = %id, "Would migrate inline record");
            }
            return Ok(report);
        }

        for id in &candidates {
            match self.migrate_one(id, options.clear_inline) {
                Ok(true) => {
                    report.migrated += 1;
                    if options.clear_inline {
                        report.cleared += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(file_id = %id, error = %e, "Failed to migrate record");
                }
            }
        }

        if options.clear_inline {
            report.cleared += self.purge_retained()?;
        }

        info!(
            migrated = report.migrated,
            cleared = report.cleared,
            failed = report.failed,
            "Inline → filesystem migration complete"
        );
        Ok(report)
    }

    /// Move one record to disk. `Ok(false)` if it was no longer inline.
    fn migrate_one(&self, id: &Uuid, clear_inline: bool) -> StorageResult<bool> {
        let file = self.storage.get(id)?;
        let StorageLocation::Inline { ciphertext, iv } = &file.location else {
            return Ok(false);
        };

        let envelope = Envelope::from_inline(ciphertext, iv)?;
        let plaintext = Zeroizing::new(self.storage.codec().decrypt_buffer(&envelope)?);
        let (relative, summary) =
            self.storage
                .write_content_file(&file.owner_id, &file.id, plaintext.as_slice())?;

        if summary.plaintext_len != file.size_bytes {
            warn!(
                file_id = %id,
                recorded = file.size_bytes,
                actual = summary.plaintext_len,
                "Inline record size differs from decrypted length"
            );
        }

        let metadata = self.storage.metadata();
        match metadata.relocate_to_filesystem(
            id,
            &relative,
            &summary.iv,
            !clear_inline,
            self.storage.now(),
        ) {
            Ok(true) => {
                info!(file_id = %id, owner_id = %file.owner_id, "Migrated record to filesystem");
                Ok(true)
            }
            Ok(false) => {
                // Deleted meanwhile: the file has no record to belong to.
                if metadata.get_file(id)?.is_none() {
                    self.storage.remove_content_file(id, &relative);
                }
                Ok(false)
            }
            Err(e) => {
                self.storage.remove_content_file(id, &relative);
                Err(e.into())
            }
        }
    }

    /// Drop legacy ciphertexts kept by earlier runs without clearing.
    fn purge_retained(&self) -> StorageResult<usize> {
        let metadata = self.storage.metadata();
        let mut cleared = 0;
        for id in metadata.list_retained_inline()? {
            match metadata.clear_retained_inline(&id, self.storage.now()) {
                Ok(true) => cleared += 1,
                Ok(false) => {}
                Err(e) => warn!(file_id = %id, error = %e, "Failed to clear retained ciphertext"),
            }
        }
        Ok(cleared)
    }
}

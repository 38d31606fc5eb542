// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audio recording storage.
//!
//! A recording's ciphertext lives either on disk (`Filesystem`) or, for
//! legacy records, inside its metadata record (`Inline`). Reads go through
//! [`AudioStorageService::open_location`], the only place that branches on
//! the storage mode.
//!
//! A save writes the envelope to a staging file, syncs it, renames it into
//! place and only then inserts the metadata record. If the insert fails the
//! file is removed again, so a record never points at a missing file because
//! of a half-finished save, and no file outlives a failed save.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::metadata::{MetadataError, MetadataStore};
use super::paths::{validate_owner_id, StoragePaths};
use super::records::{scheduled_delete_at, ShareGrant, StorageLocation, StoredFile};
use super::retention::{effective_retention, RetentionPolicy};
use super::{validate_retention, StorageError, StorageResult};
use crate::clock::Clock;
use crate::crypto::{CryptoError, Envelope, EnvelopeCodec, StreamSummary};

/// Input for [`AudioStorageService::save`].
pub struct SaveRequest<R> {
    pub owner_id: String,
    /// Plaintext source, typically the fully received upload file.
    pub source: R,
    pub filename: String,
    pub original_name: Option<String>,
    pub mime_type: String,
    /// Size announced by the uploader. The stored size is always the
    /// number of plaintext bytes actually read.
    pub size_bytes: Option<u64>,
    pub device_id: Option<String>,
    /// Explicit retention override in days.
    pub delete_after_days: Option<u32>,
}

impl<R: Read> SaveRequest<R> {
    pub fn new(
        owner_id: impl Into<String>,
        source: R,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            source,
            filename: filename.into(),
            original_name: None,
            mime_type: mime_type.into(),
            size_bytes: None,
            device_id: None,
            delete_after_days: None,
        }
    }
}

impl SaveRequest<BufReader<File>> {
    /// Request for an upload already received into a local plaintext file.
    pub fn from_path(
        owner_id: impl Into<String>,
        path: &Path,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let mut request = Self::new(owner_id, BufReader::new(file), filename, mime_type);
        request.size_bytes = Some(size);
        Ok(request)
    }
}

/// Streaming plaintext of one recording.
///
/// End-of-stream is only reported once the content authenticated; a read
/// error of kind `InvalidData` means it did not. See
/// [`crate::crypto::EnvelopeCodec::decrypt_stream`].
pub struct AudioReader {
    pub id: Uuid,
    pub reader: Box<dyn Read + Send>,
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: u64,
}

impl Read for AudioReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for AudioReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioReader")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Fully decrypted and authenticated recording.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub id: Uuid,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: u64,
}

/// Stores, reads and deletes encrypted recordings.
pub struct AudioStorageService {
    codec: Arc<EnvelopeCodec>,
    paths: StoragePaths,
    metadata: Arc<dyn MetadataStore>,
    retention: Arc<dyn RetentionPolicy>,
    clock: Arc<dyn Clock>,
}

impl AudioStorageService {
    pub fn new(
        codec: Arc<EnvelopeCodec>,
        paths: StoragePaths,
        metadata: Arc<dyn MetadataStore>,
        retention: Arc<dyn RetentionPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            paths,
            metadata,
            retention,
            clock,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Encrypt a recording to disk and record it. Returns the new file id.
    pub fn save<R: Read>(&self, request: SaveRequest<R>) -> StorageResult<Uuid> {
        let SaveRequest {
            owner_id,
            source,
            filename,
            original_name,
            mime_type,
            size_bytes: declared_size,
            device_id,
            delete_after_days,
        } = request;

        validate_owner_id(&owner_id)?;
        validate_retention(delete_after_days)?;
        let retention_days = effective_retention(
            delete_after_days,
            || self.retention.owner_default(&owner_id),
            || self.retention.system_default(),
        );
        validate_retention(retention_days)?;
        let now = self.clock.now();
        let delete_at = scheduled_delete_at(now, retention_days)?;

        let id = Uuid::new_v4();
        let (relative, summary) = self.write_content_file(&owner_id, &id, source)?;

        if declared_size.is_some_and(|declared| declared != summary.plaintext_len) {
            warn!(
                file_id = %id,
                owner_id = %owner_id,
                declared = ?declared_size,
                actual = summary.plaintext_len,
                "Declared upload size differs from bytes received"
            );
        }

        let record = StoredFile {
            id,
            owner_id,
            original_name: original_name.unwrap_or_else(|| filename.clone()),
            filename,
            size_bytes: summary.plaintext_len,
            mime_type,
            device_id,
            location: StorageLocation::Filesystem {
                path: relative.clone(),
                iv: summary.iv.to_vec(),
            },
            created_at: now,
            delete_after_days: retention_days,
            scheduled_delete_at: delete_at,
            updated_at: now,
            retained_inline: None,
        };

        if let Err(e) = self.metadata.insert_file(&record) {
            self.remove_content_file(&id, &relative);
            return Err(e.into());
        }

        info!(
            file_id = %id,
            owner_id = %record.owner_id,
            size_bytes = record.size_bytes,
            retention_days = ?retention_days,
            "Stored recording"
        );
        Ok(id)
    }

    /// Stream-encrypt `source` to the owner's path for `id`.
    ///
    /// Returns the relative path and byte counts. On failure no file is left
    /// at either the staging or the final path.
    pub(crate) fn write_content_file<R: Read>(
        &self,
        owner_id: &str,
        id: &Uuid,
        source: R,
    ) -> StorageResult<(String, StreamSummary)> {
        let relative = self.paths.resolve(owner_id, id)?;
        let owner_dir = self.paths.ensure_owner_directory(owner_id)?;
        let staging = self.paths.staging_path(owner_id, id)?;
        let final_path = self.paths.absolute(&relative);

        let written = self
            .encrypt_to(&staging, source)
            .and_then(|summary| {
                fs::rename(&staging, &final_path)?;
                Ok(summary)
            });
        let summary = match written {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&staging) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(file_id = %id, error = %cleanup, "Failed to remove staging file");
                    }
                }
                return Err(e);
            }
        };
        sync_directory(&owner_dir);

        Ok((relative.to_string_lossy().into_owned(), summary))
    }

    fn encrypt_to<R: Read>(&self, staging: &Path, source: R) -> StorageResult<StreamSummary> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(staging)?;
        let summary = self
            .codec
            .encrypt_stream(source, &mut file)
            .map_err(reader_error)?;
        file.sync_all()?;
        Ok(summary)
    }

    /// Best-effort unlink of a content file. Absence is not an error.
    pub(crate) fn remove_content_file(&self, id: &Uuid, relative: &str) {
        match fs::remove_file(self.paths.absolute(relative)) {
            Ok(()) => debug!(file_id = %id, "Removed content file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file_id = %id, error = %e, "Failed to remove content file"),
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Open a recording for streaming.
    ///
    /// Bytes are released before authentication completes; only a reader
    /// that reached end-of-stream delivered authentic content. Use
    /// [`read_stream_verified`](Self::read_stream_verified) when nothing may
    /// be released before the whole file checked out.
    pub fn read_stream(&self, id: &Uuid) -> StorageResult<AudioReader> {
        let file = self.get(id)?;
        let reader = self.open_location(&file, false)?;
        Ok(audio_reader(file, reader))
    }

    /// Authenticate the whole recording first, then open it for streaming.
    pub fn read_stream_verified(&self, id: &Uuid) -> StorageResult<AudioReader> {
        let file = self.get(id)?;
        let reader = self.open_location(&file, true)?;
        Ok(audio_reader(file, reader))
    }

    /// Decrypt a whole recording into memory.
    pub fn read_buffer(&self, id: &Uuid) -> StorageResult<AudioBuffer> {
        let file = self.get(id)?;
        let mut reader = self.open_location(&file, false)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(reader_error)?;
        Ok(AudioBuffer {
            id: file.id,
            data,
            mime_type: file.mime_type,
            filename: file.filename,
            size_bytes: file.size_bytes,
        })
    }

    /// Plaintext reader over whichever location the record uses.
    fn open_location(
        &self,
        file: &StoredFile,
        verify_first: bool,
    ) -> StorageResult<Box<dyn Read + Send>> {
        match &file.location {
            StorageLocation::Filesystem { path, .. } => {
                let absolute = self.paths.absolute(path);
                if verify_first {
                    let source = open_content(&absolute, &file.id)?;
                    self.codec.verify_stream(BufReader::new(source))?;
                }
                let source = open_content(&absolute, &file.id)?;
                let reader = self.codec.decrypt_stream(BufReader::new(source))?;
                Ok(Box::new(reader))
            }
            StorageLocation::Inline { ciphertext, iv } => {
                let envelope = Envelope::from_inline(ciphertext, iv)?;
                let plaintext = self.codec.decrypt_buffer(&envelope)?;
                Ok(Box::new(Cursor::new(plaintext)))
            }
        }
    }

    // =========================================================================
    // Delete / inspect
    // =========================================================================

    /// Delete a recording and its share grants.
    ///
    /// Returns `false` if no such record existed. A missing or undeletable
    /// content file never blocks the metadata cleanup.
    pub fn delete(&self, id: &Uuid) -> StorageResult<bool> {
        let Some(file) = self.metadata.get_file(id)? else {
            return Ok(false);
        };
        if let StorageLocation::Filesystem { path, .. } = &file.location {
            self.remove_content_file(id, path);
        }
        let removed = self.metadata.delete_file(id)?;
        if removed {
            info!(file_id = %id, owner_id = %file.owner_id, "Deleted recording");
        }
        Ok(removed)
    }

    /// Whether the record exists and its content is present.
    pub fn exists(&self, id: &Uuid) -> StorageResult<bool> {
        match self.metadata.get_file(id)? {
            None => Ok(false),
            Some(file) => match &file.location {
                StorageLocation::Filesystem { path, .. } => {
                    Ok(self.paths.absolute(path).is_file())
                }
                StorageLocation::Inline { .. } => Ok(true),
            },
        }
    }

    /// Bytes occupied by the stored ciphertext.
    pub fn size_on_disk(&self, id: &Uuid) -> StorageResult<u64> {
        let file = self.get(id)?;
        match &file.location {
            StorageLocation::Filesystem { path, .. } => {
                match fs::metadata(self.paths.absolute(path)) {
                    Ok(meta) => Ok(meta.len()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        Err(StorageError::ContentMissing(file.id))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            StorageLocation::Inline { ciphertext, .. } => Ok(ciphertext.len() as u64),
        }
    }

    // =========================================================================
    // Metadata operations
    // =========================================================================

    pub fn get(&self, id: &Uuid) -> StorageResult<StoredFile> {
        self.metadata
            .get_file(id)?
            .ok_or(StorageError::RecordNotFound(*id))
    }

    /// Change a recording's retention. `None` keeps it forever.
    ///
    /// The deletion time is recomputed from the creation time.
    pub fn update_retention(&self, id: &Uuid, days: Option<u32>) -> StorageResult<StoredFile> {
        validate_retention(days)?;
        let file = self.get(id)?;
        let scheduled = scheduled_delete_at(file.created_at, days)?;
        self.metadata
            .update_retention(id, days, scheduled, self.clock.now())?
            .ok_or(StorageError::RecordNotFound(*id))
    }

    /// Give another user access to a recording.
    pub fn grant_share(&self, id: &Uuid, grantee_id: &str) -> StorageResult<()> {
        validate_owner_id(grantee_id)?;
        let grant = ShareGrant {
            file_id: *id,
            grantee_id: grantee_id.to_string(),
            granted_at: self.clock.now(),
        };
        match self.metadata.grant_share(&grant) {
            Ok(()) => Ok(()),
            Err(MetadataError::NotFound(_)) => Err(StorageError::RecordNotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn shares(&self, id: &Uuid) -> StorageResult<Vec<ShareGrant>> {
        Ok(self.metadata.list_shares(id)?)
    }

    /// Ids whose retention elapsed at `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> StorageResult<Vec<Uuid>> {
        Ok(self.metadata.list_expired(now)?)
    }

    /// Ids of records still stored inline.
    pub fn inline_records(&self) -> StorageResult<Vec<Uuid>> {
        Ok(self.metadata.list_inline()?)
    }
}

fn audio_reader(file: StoredFile, reader: Box<dyn Read + Send>) -> AudioReader {
    AudioReader {
        id: file.id,
        reader,
        mime_type: file.mime_type,
        filename: file.filename,
        size_bytes: file.size_bytes,
    }
}

fn open_content(path: &Path, id: &Uuid) -> StorageResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StorageError::ContentMissing(*id),
        _ => StorageError::TransientIo(e),
    })
}

/// Map an error that may carry a codec failure through `io::Error`.
fn reader_error(err: impl Into<CryptoError>) -> StorageError {
    match err.into() {
        CryptoError::Io(e) => StorageError::from(CryptoError::from_io(e)),
        other => other.into(),
    }
}

/// Persist a rename by syncing its directory. Best-effort.
fn sync_directory(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), error = %e, "Directory sync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout for ciphertext files.
//!
//! ```text
//! <base>/
//!   <owner_id>/              # mode 0700
//!     <file_id>.enc          # SALT || IV || AUTH_TAG || CIPHERTEXT
//!     <file_id>.enc.partial  # only while a stream-encrypt is in flight
//! ```
//!
//! Purely structural: nothing here knows about encryption or metadata.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Default ciphertext base directory.
pub const DEFAULT_AUDIO_ROOT: &str = "/data/audio";

/// Extension of finished ciphertext files.
pub const ENCRYPTED_EXTENSION: &str = "enc";

const PARTIAL_SUFFIX: &str = "partial";
const MAX_OWNER_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("invalid owner id: {0:?}")]
    InvalidOwnerId(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type PathResult<T> = Result<T, PathError>;

/// Reject owner ids that are unsafe as a directory name or index-key segment.
pub fn validate_owner_id(owner_id: &str) -> PathResult<()> {
    let valid = !owner_id.is_empty()
        && owner_id.len() <= MAX_OWNER_ID_LEN
        && !owner_id.starts_with('.')
        && !owner_id.ends_with('.')
        && owner_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PathError::InvalidOwnerId(owner_id.to_string()))
    }
}

/// Deterministic owner/file to path mapping under a configurable base.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Base directory for all ciphertext files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of a file's ciphertext: `<owner>/<file_id>.enc`.
    pub fn resolve(&self, owner_id: &str, file_id: &Uuid) -> PathResult<PathBuf> {
        validate_owner_id(owner_id)?;
        Ok(PathBuf::from(owner_id).join(format!("{file_id}.{ENCRYPTED_EXTENSION}")))
    }

    /// Join a relative path from [`resolve`](Self::resolve) onto the base.
    pub fn absolute(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Directory holding one owner's files.
    pub fn owner_dir(&self, owner_id: &str) -> PathResult<PathBuf> {
        validate_owner_id(owner_id)?;
        Ok(self.root.join(owner_id))
    }

    /// Absolute path a stream-encrypt writes to before it is renamed into place.
    pub fn staging_path(&self, owner_id: &str, file_id: &Uuid) -> PathResult<PathBuf> {
        validate_owner_id(owner_id)?;
        Ok(self.root.join(owner_id).join(format!(
            "{file_id}.{ENCRYPTED_EXTENSION}.{PARTIAL_SUFFIX}"
        )))
    }

    /// Create the base directory if needed.
    pub fn ensure_root(&self) -> PathResult<()> {
        private_dir_builder().create(&self.root)?;
        Ok(())
    }

    /// Create an owner's directory with owner-only permissions.
    ///
    /// Idempotent; a concurrent caller creating the same directory is not an
    /// error for either side.
    pub fn ensure_owner_directory(&self, owner_id: &str) -> PathResult<PathBuf> {
        let dir = self.owner_dir(owner_id)?;
        match private_dir_builder().create(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(dir),
            Err(e) => Err(e.into()),
        }
    }

    /// Check the base directory is writable with a write-read-delete probe.
    ///
    /// Each call uses its own probe file, so concurrent checks never race.
    pub fn health_check(&self) -> PathResult<()> {
        let probe = self.root.join(format!(".health_check-{}", Uuid::new_v4()));
        let data = b"health_check_data";

        fs::write(&probe, data)?;
        let read_back = fs::read(&probe);
        fs::remove_file(&probe)?;

        if read_back? != data {
            return Err(PathError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "health check data mismatch",
            )));
        }
        Ok(())
    }
}

fn private_dir_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn id() -> Uuid {
        Uuid::parse_str("7a1c2e4f-0b9d-4c3e-8f21-6d5a4b3c2e10").unwrap()
    }

    #[test]
    fn default_paths_use_audio_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("/data/audio"));
    }

    #[test]
    fn resolve_is_relative_and_deterministic() {
        let paths = StoragePaths::new("/tmp/test-data");
        let rel = paths.resolve("owner-1", &id()).unwrap();
        assert_eq!(
            rel,
            PathBuf::from("owner-1/7a1c2e4f-0b9d-4c3e-8f21-6d5a4b3c2e10.enc")
        );
        assert_eq!(rel, paths.resolve("owner-1", &id()).unwrap());
        assert_eq!(
            paths.absolute(&rel),
            PathBuf::from("/tmp/test-data/owner-1/7a1c2e4f-0b9d-4c3e-8f21-6d5a4b3c2e10.enc")
        );
    }

    #[test]
    fn staging_path_sits_beside_final_path() {
        let paths = StoragePaths::new("/tmp/test-data");
        assert_eq!(
            paths.staging_path("u", &id()).unwrap(),
            PathBuf::from("/tmp/test-data/u/7a1c2e4f-0b9d-4c3e-8f21-6d5a4b3c2e10.enc.partial")
        );
    }

    #[test]
    fn unsafe_owner_ids_are_rejected() {
        let paths = StoragePaths::new("/tmp/test-data");
        for bad in ["", "..", "../etc", "a/b", "a\\b", ".hidden", "x|y", "trailing."] {
            assert!(
                matches!(paths.resolve(bad, &id()), Err(PathError::InvalidOwnerId(_))),
                "accepted {bad:?}"
            );
        }
        assert!(paths.resolve(&"a".repeat(129), &id()).is_err());
        assert!(paths.resolve("user_42.backup-2", &id()).is_ok());
    }

    #[test]
    fn ensure_owner_directory_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(temp.path().join("audio"));
        let first = paths.ensure_owner_directory("owner-1").unwrap();
        let second = paths.ensure_owner_directory("owner-1").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn owner_directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(temp.path());
        let dir = paths.ensure_owner_directory("owner-1").unwrap();
        let mode = fs::metadata(dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn concurrent_directory_creation_does_not_fail() {
        let temp = tempfile::tempdir().unwrap();
        let paths = Arc::new(StoragePaths::new(temp.path().join("audio")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let paths = Arc::clone(&paths);
                thread::spawn(move || paths.ensure_owner_directory("shared-owner"))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[test]
    fn health_check_works() {
        let temp = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(temp.path());
        paths.health_check().expect("Health check should pass");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_health_checks_all_pass() {
        let temp = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(temp.path());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let paths = paths.clone();
                thread::spawn(move || (0..20).try_for_each(|_| paths.health_check()))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}

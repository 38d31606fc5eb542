// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::crypto::{CryptoError, EnvelopeCodec};
use crate::storage::{
    AudioStorageService, MetadataError, MetadataStore, PathError, QuotaAccountant,
    RedbMetadataStore, RetentionPolicy, StaticRetentionPolicy, StoragePaths, TextContentService,
};

/// Fatal errors while opening storage at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("encryption setup failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage directory unavailable: {0}")]
    Paths(#[from] PathError),

    #[error("metadata store unavailable: {0}")]
    Metadata(#[from] MetadataError),
}

#[derive(Clone)]
pub struct AppState {
    pub audio: Arc<AudioStorageService>,
    pub text: Arc<TextContentService>,
    pub quotas: Arc<QuotaAccountant>,
    pub metadata: Arc<dyn MetadataStore>,
    pub paths: StoragePaths,
}

impl AppState {
    pub fn new(
        codec: Arc<EnvelopeCodec>,
        paths: StoragePaths,
        metadata: Arc<dyn MetadataStore>,
        retention: Arc<dyn RetentionPolicy>,
        clock: Arc<dyn Clock>,
        default_quota_bytes: u64,
    ) -> Self {
        let audio = Arc::new(AudioStorageService::new(
            codec.clone(),
            paths.clone(),
            metadata.clone(),
            retention,
            clock.clone(),
        ));
        let text = Arc::new(TextContentService::new(codec, metadata.clone(), clock));
        let quotas = Arc::new(QuotaAccountant::new(metadata.clone(), default_quota_bytes));
        Self {
            audio,
            text,
            quotas,
            metadata,
            paths,
        }
    }

    /// Open storage as configured: codec, ciphertext root and metadata store.
    pub fn open(config: &AppConfig) -> Result<Self, StartupError> {
        let codec = Arc::new(EnvelopeCodec::with_iterations(
            config.master_secret.clone(),
            config.pbkdf2_iterations,
        )?);

        let paths = StoragePaths::new(&config.audio_dir);
        paths.ensure_root()?;

        let metadata = Arc::new(RedbMetadataStore::open(&config.metadata_db_path)?);
        info!(
            audio_dir = %config.audio_dir.display(),
            metadata_db = %config.metadata_db_path.display(),
            "Storage opened"
        );

        Ok(Self::new(
            codec,
            paths,
            metadata,
            Arc::new(StaticRetentionPolicy::new(config.default_retention_days)),
            Arc::new(SystemClock),
            config.default_quota_bytes,
        ))
    }
}

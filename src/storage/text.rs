// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Small text payloads (notes, transcripts) stored as whole-buffer envelopes
//! inside their metadata record.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::metadata::MetadataStore;
use super::paths::validate_owner_id;
use super::records::TextRecord;
use super::{StorageError, StorageResult};
use crate::clock::Clock;
use crate::crypto::EnvelopeCodec;

pub struct TextContentService {
    codec: Arc<EnvelopeCodec>,
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
}

impl TextContentService {
    pub fn new(
        codec: Arc<EnvelopeCodec>,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            metadata,
            clock,
        }
    }

    pub fn save_text(&self, owner_id: &str, title: &str, text: &str) -> StorageResult<Uuid> {
        validate_owner_id(owner_id)?;
        let envelope = self.codec.encrypt_buffer(text.as_bytes())?;
        let record = TextRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            size_bytes: text.len() as u64,
            envelope: envelope.to_bytes(),
            created_at: self.clock.now(),
        };
        self.metadata.insert_text(&record)?;
        info!(text_id = %record.id, owner_id = %owner_id, size_bytes = record.size_bytes, "Stored text");
        Ok(record.id)
    }

    pub fn read_text(&self, id: &Uuid) -> StorageResult<String> {
        let record = self
            .metadata
            .get_text(id)?
            .ok_or(StorageError::RecordNotFound(*id))?;
        let plaintext = self.codec.decrypt_bytes(&record.envelope)?;
        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Format(format!("text {id} is not valid UTF-8")))
    }

    /// Returns `false` if no such record existed.
    pub fn delete_text(&self, id: &Uuid) -> StorageResult<bool> {
        Ok(self.metadata.delete_text(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::Harness;

    fn service(h: &Harness) -> TextContentService {
        TextContentService::new(h.codec.clone(), h.store.clone(), Arc::new(h.clock.clone()))
    }

    #[test]
    fn text_round_trip_and_delete() {
        let h = Harness::new();
        let texts = service(&h);
        let id = texts.save_text("owner-1", "Transcript", "héllo wörld").unwrap();

        assert_eq!(texts.read_text(&id).unwrap(), "héllo wörld");
        assert!(texts.delete_text(&id).unwrap());
        assert!(!texts.delete_text(&id).unwrap());
        assert!(matches!(texts.read_text(&id), Err(StorageError::RecordNotFound(_))));
    }

    #[test]
    fn stored_text_is_encrypted() {
        let h = Harness::new();
        let texts = service(&h);
        let id = texts.save_text("owner-1", "secret", "attack at dawn").unwrap();
        let record = h.store.get_text(&id).unwrap().unwrap();
        assert_eq!(record.size_bytes, 14);
        assert_eq!(record.envelope.len(), 64 + 14);
        assert!(!record
            .envelope
            .windows(6)
            .any(|w| w == b"attack"));
    }

    #[test]
    fn failed_insert_surfaces_metadata_error() {
        let h = Harness::new();
        h.store.fail_inserts(true);
        assert!(matches!(
            service(&h).save_text("owner-1", "t", "x"),
            Err(StorageError::Metadata(_))
        ));
    }
}

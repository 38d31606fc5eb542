// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-owner storage quotas.
//!
//! Usage is summed on demand from the metadata indexes (plaintext sizes,
//! never on-disk ciphertext sizes). The capacity check is advisory: nothing
//! is reserved, so two uploads checked at the same time can together exceed
//! the quota.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::metadata::MetadataStore;
use super::paths::validate_owner_id;
use super::records::ContentCategory;
use super::{StorageError, StorageResult};

/// Default per-owner quota: 1 GiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

/// An owner's quota together with current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageQuota {
    pub owner_id: String,
    pub quota_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub owner_id: String,
    pub total_bytes: u64,
    pub per_category: BTreeMap<ContentCategory, u64>,
}

/// Why an upload would not fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    pub owner_id: String,
    pub used_bytes: u64,
    pub incoming_bytes: u64,
    pub quota_bytes: u64,
}

impl QuotaDenial {
    pub fn into_error(self) -> StorageError {
        StorageError::QuotaExceeded {
            owner_id: self.owner_id,
            used_bytes: self.used_bytes,
            incoming_bytes: self.incoming_bytes,
            quota_bytes: self.quota_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny(QuotaDenial),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }

    /// `Ok` for Allow, `QuotaExceeded` for Deny.
    pub fn into_result(self) -> StorageResult<()> {
        match self {
            QuotaDecision::Allow => Ok(()),
            QuotaDecision::Deny(denial) => Err(denial.into_error()),
        }
    }
}

pub struct QuotaAccountant {
    metadata: Arc<dyn MetadataStore>,
    default_quota: u64,
}

impl QuotaAccountant {
    pub fn new(metadata: Arc<dyn MetadataStore>, default_quota: u64) -> Self {
        Self {
            metadata,
            default_quota,
        }
    }

    /// Plaintext bytes stored by `owner_id`, in total and per category.
    pub fn usage(&self, owner_id: &str) -> StorageResult<QuotaUsage> {
        let mut per_category = BTreeMap::new();
        let mut total_bytes = 0u64;
        for category in ContentCategory::ALL {
            let bytes = self.metadata.sum_sizes(owner_id, category)?;
            total_bytes = total_bytes.saturating_add(bytes);
            per_category.insert(category, bytes);
        }
        Ok(QuotaUsage {
            owner_id: owner_id.to_string(),
            total_bytes,
            per_category,
        })
    }

    /// Effective quota for an owner (explicit or default) and current usage.
    pub fn quota(&self, owner_id: &str) -> StorageResult<StorageQuota> {
        let quota_bytes = self
            .metadata
            .get_quota(owner_id)?
            .unwrap_or(self.default_quota);
        Ok(StorageQuota {
            owner_id: owner_id.to_string(),
            quota_bytes,
            used_bytes: self.usage(owner_id)?.total_bytes,
        })
    }

    /// Check whether `incoming_bytes` more would fit. Reserves nothing.
    pub fn check_and_reserve(
        &self,
        owner_id: &str,
        incoming_bytes: u64,
    ) -> StorageResult<QuotaDecision> {
        let quota = self.quota(owner_id)?;
        if quota.used_bytes.saturating_add(incoming_bytes) > quota.quota_bytes {
            return Ok(QuotaDecision::Deny(QuotaDenial {
                owner_id: quota.owner_id,
                used_bytes: quota.used_bytes,
                incoming_bytes,
                quota_bytes: quota.quota_bytes,
            }));
        }
        Ok(QuotaDecision::Allow)
    }

    /// Set an owner's quota.
    pub fn set_quota(&self, owner_id: &str, quota_bytes: u64) -> StorageResult<()> {
        validate_owner_id(owner_id)?;
        self.metadata.set_quota(owner_id, quota_bytes)?;
        info!(owner_id = %owner_id, quota_bytes, "Quota updated");
        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retention policy lookup and priority resolution.

use std::collections::HashMap;
use std::sync::RwLock;

/// Source of owner-level and system-level retention defaults, in days.
pub trait RetentionPolicy: Send + Sync {
    fn owner_default(&self, owner_id: &str) -> Option<u32>;

    fn system_default(&self) -> Option<u32>;
}

/// Resolve retention: explicit override, then owner default, then system
/// default, otherwise never delete.
///
/// Lookups are closures so lower-priority sources are only consulted when
/// every higher one is absent.
pub fn effective_retention(
    override_days: Option<u32>,
    owner_default: impl FnOnce() -> Option<u32>,
    system_default: impl FnOnce() -> Option<u32>,
) -> Option<u32> {
    override_days
        .or_else(owner_default)
        .or_else(system_default)
}

/// Configuration-backed policy with per-owner overrides held in memory.
#[derive(Debug, Default)]
pub struct StaticRetentionPolicy {
    system_default: Option<u32>,
    owners: RwLock<HashMap<String, u32>>,
}

impl StaticRetentionPolicy {
    pub fn new(system_default: Option<u32>) -> Self {
        Self {
            system_default,
            owners: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_owner_default(&self, owner_id: &str, days: Option<u32>) {
        let mut owners = match self.owners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match days {
            Some(days) => owners.insert(owner_id.to_string(), days),
            None => owners.remove(owner_id),
        };
    }
}

impl RetentionPolicy for StaticRetentionPolicy {
    fn owner_default(&self, owner_id: &str) -> Option<u32> {
        let owners = match self.owners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        owners.get(owner_id).copied()
    }

    fn system_default(&self) -> Option<u32> {
        self.system_default
    }
}

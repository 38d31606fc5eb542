// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audio Vault - Encrypted Recording Storage
//!
//! Stores voice recordings and text notes as authenticated, per-file
//! encrypted envelopes, with retention-based deletion and per-owner quotas.
//!
//! ## Modules
//!
//! - `crypto` - Envelope codec (PBKDF2 + AES-256-GCM, buffered and streaming)
//! - `storage` - Content storage, metadata store, quotas, retention, migration
//! - `retention_scheduler` - Background deletion of expired recordings
//! - `api` - Health and readiness probes (Axum)

pub mod api;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod retention_scheduler;
pub mod state;
pub mod storage;

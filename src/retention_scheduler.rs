// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retention Scheduler
//!
//! Background task that deletes recordings whose retention has elapsed.
//!
//! ## Strategy
//!
//! Every `interval` (default 1 h) the scheduler:
//! 1. Lists records with `scheduled_delete_at <= now`.
//! 2. Deletes each through [`AudioStorageService::delete`], on a blocking
//!    thread since storage I/O is synchronous.
//! 3. Logs and counts per-record failures without stopping; a record that
//!    failed simply matches again on the next scan.
//!
//! A scan that would start while another is still running is skipped.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::{AudioStorageService, StorageResult};

/// Default interval between retention scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was still running.
    Skipped,
    Completed(ScanReport),
}

/// Periodic deleter of expired recordings.
#[derive(Clone)]
pub struct RetentionScheduler {
    storage: Arc<AudioStorageService>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

/// Marks a scan as in progress for as long as it is alive.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionScheduler {
    pub fn new(storage: Arc<AudioStorageService>) -> Self {
        Self {
            storage,
            interval: DEFAULT_SCAN_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the scan loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(scheduler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Retention scheduler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Retention scheduler shutting down");
                return;
            }

            let scheduler = self.clone();
            match tokio::task::spawn_blocking(move || scheduler.scan_once()).await {
                Ok(Ok(ScanOutcome::Completed(report))) if report.matched > 0 => {
                    info!(
                        matched = report.matched,
                        deleted = report.deleted,
                        failed = report.failed,
                        "Retention scan complete"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Retention scan could not list expired records"),
                Err(e) => warn!(error = %e, "Retention scan task failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Retention scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one scan. Blocking.
    pub fn scan_once(&self) -> StorageResult<ScanOutcome> {
        let Some(_guard) = ScanGuard::acquire(&self.running) else {
            debug!("Previous retention scan still running, skipping");
            return Ok(ScanOutcome::Skipped);
        };

        let expired = self.storage.expired_ids(self.storage.now())?;
        let mut report = ScanReport {
            matched: expired.len(),
            ..ScanReport::default()
        };

        for id in &expired {
            match self.storage.delete(id) {
                Ok(true) => {
                    report.deleted += 1;
                    debug!(file_id = %id, "Deleted expired recording");
                }
                // Removed by someone else since the listing.
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        file_id = %id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to delete expired recording"
                    );
                }
            }
        }

        Ok(ScanOutcome::Completed(report))
    }
}

// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of APSchool Bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use crate::traits::AccountDataSource;
use apschool_client::{AccountSnapshot, ApSchoolError, ErrorKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::error::Error as _;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_INTERVAL_MINUTES: u64 = 60;
pub const MIN_SCAN_INTERVAL_MINUTES: u64 = 10;
/// One week
pub const MAX_SCAN_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Polling interval for a configured number of minutes, clamped to the allowed range
pub fn scan_interval(minutes: u64) -> Duration {
    let minutes = minutes.clamp(MIN_SCAN_INTERVAL_MINUTES, MAX_SCAN_INTERVAL_MINUTES);
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Latest complete snapshot set; replaced wholesale, never merged
pub type SnapshotSet = Arc<Vec<AccountSnapshot>>;

/// What one refresh did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new snapshot set was published
    Published { accounts: usize },
    /// Transient failure; the previous set stays published until the next tick
    UpdateFailed { reason: String },
    /// Credentials rejected; polling must stop until they are re-entered
    ReauthRequired { reason: String },
    /// Another cycle was still in flight
    Skipped,
}

/// Why the polling loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorExit {
    Shutdown,
    ReauthRequired,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStatus {
    pub last_update_success: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub requires_reauth: bool,
    pub consecutive_failures: u32,
}

/// Polls an [`AccountDataSource`] on a fixed interval and republishes its snapshots.
///
/// Only this type decides between retrying on the next tick and giving up.
pub struct AccountDataCoordinator {
    source: Arc<dyn AccountDataSource>,
    update_interval: Duration,
    status: RwLock<CoordinatorStatus>,
    publisher: watch::Sender<SnapshotSet>,
    cycle_lock: Mutex<()>,
}

impl fmt::Debug for AccountDataCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountDataCoordinator")
            .field("source", &self.source.name())
            .field("update_interval", &self.update_interval)
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl AccountDataCoordinator {
    /// `update_interval` is capped at [`MAX_SCAN_INTERVAL_MINUTES`]
    pub fn new(source: Arc<dyn AccountDataSource>, update_interval: Duration) -> Self {
        let (publisher, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            source,
            update_interval: update_interval.min(scan_interval(MAX_SCAN_INTERVAL_MINUTES)),
            status: RwLock::new(CoordinatorStatus::default()),
            publisher,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Receiver that sees every newly published snapshot set
    pub fn subscribe(&self) -> watch::Receiver<SnapshotSet> {
        self.publisher.subscribe()
    }

    /// Last-known-good snapshot set (empty before the first success)
    pub fn data(&self) -> SnapshotSet {
        self.publisher.borrow().clone()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.read().clone()
    }

    /// Run one fetch cycle now, unless one is already running
    pub async fn refresh(&self) -> UpdateOutcome {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            debug!("Fetch cycle already in flight, skipping refresh");
            return UpdateOutcome::Skipped;
        };

        let started_at = Utc::now();
        debug!("🔄 Refreshing account data from {}", self.source.name());

        match self.source.fetch_all_account_data().await {
            Ok(snapshots) => {
                let accounts = snapshots.len();
                {
                    let mut status = self.status.write();
                    status.last_update_success = true;
                    status.last_attempt_at = Some(started_at);
                    status.last_success_at = Some(started_at);
                    status.last_error = None;
                    status.requires_reauth = false;
                    status.consecutive_failures = 0;
                }
                self.publisher.send_replace(Arc::new(snapshots));

                info!("✅ Published {} account snapshot(s)", accounts);
                UpdateOutcome::Published { accounts }
            }
            Err(err) => self.record_failure(&err, started_at),
        }
    }

    fn record_failure(&self, err: &ApSchoolError, attempted_at: DateTime<Utc>) -> UpdateOutcome {
        let reason = error_chain(err);
        let requires_reauth = err.kind() == ErrorKind::Authentication;

        {
            let mut status = self.status.write();
            status.last_update_success = false;
            status.last_attempt_at = Some(attempted_at);
            status.last_error = Some(reason.clone());
            status.requires_reauth = requires_reauth;
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        }

        match err.kind() {
            ErrorKind::Authentication => {
                error!("🔐 Credentials rejected, reconfiguration required: {reason}");
                UpdateOutcome::ReauthRequired { reason }
            }
            ErrorKind::Communication => {
                warn!("⚠️ Fetch failed, will retry next interval: {reason}");
                UpdateOutcome::UpdateFailed { reason }
            }
            ErrorKind::Other => {
                error!("❌ Unexpected error while fetching account data: {reason}");
                UpdateOutcome::UpdateFailed { reason }
            }
        }
    }

    /// Poll every `update_interval` until `shutdown` resolves or credentials are rejected.
    ///
    /// The first tick comes one interval from now; callers do the initial
    /// refresh themselves. Shutdown drops any cycle in flight.
    pub async fn run<F>(&self, shutdown: F) -> CoordinatorExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let now = Instant::now();
        let first_tick = now.checked_add(self.update_interval).unwrap_or(now);
        let mut ticker = tokio::time::interval_at(first_tick, self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "⏱️ Account data polling every {}s",
            self.update_interval.as_secs()
        );

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Polling stopped");
                    return CoordinatorExit::Shutdown;
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                () = &mut shutdown => {
                    info!("Polling stopped, in-flight fetch cycle dropped");
                    return CoordinatorExit::Shutdown;
                }
                outcome = self.refresh() => outcome,
            };

            if let UpdateOutcome::ReauthRequired { .. } = outcome {
                return CoordinatorExit::ReauthRequired;
            }
        }
    }
}

/// Render an error with all of its causes, outermost first
fn error_chain(err: &ApSchoolError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

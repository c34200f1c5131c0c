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

use anyhow::{Context, Result};
use apschool_client::AccountSnapshot;
use apschool_core::{AccountSensor, SensorBoard, SensorChanges, SnapshotSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Document written to the state file after every publish
#[derive(Debug, Serialize)]
struct StateDocument<'a> {
    updated_at: DateTime<Utc>,
    sensors: &'a [AccountSensor],
}

/// Turns published snapshot sets into sensor states
#[derive(Debug, Default)]
pub struct SensorPublisher {
    board: SensorBoard,
    state_file: Option<PathBuf>,
}

impl SensorPublisher {
    pub fn new(state_file: Option<PathBuf>) -> Self {
        Self {
            board: SensorBoard::new(),
            state_file,
        }
    }

    #[cfg(test)]
    pub fn board(&self) -> &SensorBoard {
        &self.board
    }

    /// Follow the coordinator until its sender is dropped
    pub async fn run(mut self, mut updates: watch::Receiver<SnapshotSet>) {
        while updates.changed().await.is_ok() {
            let snapshots = updates.borrow_and_update().clone();
            if let Err(e) = self.publish(&snapshots).await {
                error!("❌ Failed to publish sensor states: {e:#}");
            }
        }
        debug!("Sensor publisher stopped");
    }

    pub async fn publish(&mut self, snapshots: &[AccountSnapshot]) -> Result<SensorChanges> {
        let changes = self.board.apply(snapshots);

        for id in &changes.added {
            info!("➕ [SENSOR] Registered account {id}");
        }
        for id in &changes.unavailable {
            warn!("⚠️ [SENSOR] Account {id} no longer linked, marked unavailable");
        }
        for sensor in self.board.sensors() {
            if changes.added.contains(&sensor.unique_id) || changes.updated.contains(&sensor.unique_id)
            {
                info!(
                    "📊 [SENSOR] {}: {:.2} {} ({} unread, {:.2} due)",
                    sensor.name,
                    sensor.native_value,
                    sensor.unit_of_measurement,
                    sensor.attributes.unread_messages,
                    sensor.attributes.due_amount
                );
            }
        }

        if changes.is_empty() {
            debug!("No sensor changes in this cycle");
        }

        self.write_state().await?;
        Ok(changes)
    }

    async fn write_state(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let document = StateDocument {
            updated_at: Utc::now(),
            sensors: self.board.sensors(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!("State written to {}", path.display());
        Ok(())
    }
}

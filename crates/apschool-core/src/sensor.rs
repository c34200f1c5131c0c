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

use apschool_client::AccountSnapshot;
use serde::Serialize;

pub const ATTRIBUTION: &str = "Data provided by https://plateforme.apschool.be/";
pub const SENSOR_ICON: &str = "mdi:account-school";
pub const CURRENCY_EURO: &str = "€";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAttributes {
    pub attribution: &'static str,
    pub firstname: String,
    pub lastname: String,
    pub school_class: String,
    pub balance: f64,
    pub due_amount: f64,
    /// Count only; an absent list counts as zero
    pub unread_messages: usize,
}

/// Balance sensor of one linked account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSensor {
    pub unique_id: String,
    pub name: String,
    pub icon: &'static str,
    pub unit_of_measurement: &'static str,
    pub native_value: f64,
    pub available: bool,
    pub attributes: SensorAttributes,
}

impl AccountSensor {
    pub fn from_snapshot(snapshot: &AccountSnapshot) -> Self {
        Self {
            unique_id: snapshot.account_id.to_string(),
            name: snapshot.full_name(),
            icon: SENSOR_ICON,
            unit_of_measurement: CURRENCY_EURO,
            native_value: snapshot.balance,
            available: true,
            attributes: SensorAttributes {
                attribution: ATTRIBUTION,
                firstname: snapshot.firstname.clone(),
                lastname: snapshot.lastname.clone(),
                school_class: snapshot.school_class.clone(),
                balance: snapshot.balance,
                due_amount: snapshot.due_amount,
                unread_messages: snapshot.unread_count(),
            },
        }
    }
}

/// Sensor ids touched by one [`SensorBoard::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorChanges {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unavailable: Vec<String>,
}

impl SensorChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.unavailable.is_empty()
    }
}

/// Registered sensors, joined to incoming snapshots by account id.
///
/// Sensors are never removed: an account missing from a snapshot set keeps
/// its last values and is flagged unavailable.
#[derive(Debug, Clone, Default)]
pub struct SensorBoard {
    sensors: Vec<AccountSensor>,
}

impl SensorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensors(&self) -> &[AccountSensor] {
        &self.sensors
    }

    pub fn get(&self, unique_id: &str) -> Option<&AccountSensor> {
        self.sensors.iter().find(|s| s.unique_id == unique_id)
    }

    pub fn apply(&mut self, snapshots: &[AccountSnapshot]) -> SensorChanges {
        let mut changes = SensorChanges::default();

        for snapshot in snapshots {
            let fresh = AccountSensor::from_snapshot(snapshot);
            match self
                .sensors
                .iter_mut()
                .find(|s| s.unique_id == fresh.unique_id)
            {
                Some(existing) => {
                    if *existing != fresh {
                        changes.updated.push(fresh.unique_id.clone());
                        *existing = fresh;
                    }
                }
                None => {
                    changes.added.push(fresh.unique_id.clone());
                    self.sensors.push(fresh);
                }
            }
        }

        for sensor in &mut self.sensors {
            let present = snapshots
                .iter()
                .any(|s| s.account_id.to_string() == sensor.unique_id);
            if !present && sensor.available {
                sensor.available = false;
                changes.unavailable.push(sensor.unique_id.clone());
            }
        }

        changes
    }
}

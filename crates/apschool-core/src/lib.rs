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

pub mod coordinator;
pub mod sensor;
pub mod setup;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{
    AccountDataCoordinator, CoordinatorExit, CoordinatorStatus, DEFAULT_SCAN_INTERVAL_MINUTES,
    MAX_SCAN_INTERVAL_MINUTES, MIN_SCAN_INTERVAL_MINUTES, SnapshotSet, UpdateOutcome,
    scan_interval,
};
pub use sensor::{AccountSensor, SensorAttributes, SensorBoard, SensorChanges};
pub use setup::{SetupError, check_credentials};
pub use traits::AccountDataSource;

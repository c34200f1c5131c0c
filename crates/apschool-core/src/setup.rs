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
use thiserror::Error;
use tracing::{error, info, warn};

/// Why entered credentials cannot be accepted
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid credentials")]
    InvalidAuth(#[source] ApSchoolError),

    #[error("Cannot connect to APSchool")]
    CannotConnect(#[source] ApSchoolError),

    #[error("Unexpected error while checking credentials")]
    Unknown(#[source] ApSchoolError),
}

impl SetupError {
    /// Error key shown next to the credentials form
    pub fn form_key(&self) -> &'static str {
        match self {
            Self::InvalidAuth(_) => "auth",
            Self::CannotConnect(_) => "connection",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<ApSchoolError> for SetupError {
    fn from(err: ApSchoolError) -> Self {
        match err.kind() {
            ErrorKind::Authentication => Self::InvalidAuth(err),
            ErrorKind::Communication => Self::CannotConnect(err),
            ErrorKind::Other => Self::Unknown(err),
        }
    }
}

/// Validate credentials by running one complete fetch cycle
pub async fn check_credentials(
    source: &dyn AccountDataSource,
) -> Result<Vec<AccountSnapshot>, SetupError> {
    match source.fetch_all_account_data().await {
        Ok(snapshots) => {
            info!(
                "✅ Credentials accepted, {} linked account(s)",
                snapshots.len()
            );
            Ok(snapshots)
        }
        Err(err) => {
            let setup_error = SetupError::from(err);
            match &setup_error {
                SetupError::InvalidAuth(cause) => warn!("{setup_error}: {cause}"),
                SetupError::CannotConnect(cause) => error!("{setup_error}: {cause}"),
                SetupError::Unknown(cause) => error!("{setup_error}: {cause:?}"),
            }
            Err(setup_error)
        }
    }
}

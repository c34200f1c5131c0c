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

use apschool_client::{AccountSnapshot, ApSchoolClient, ApSchoolResult};
use async_trait::async_trait;

/// Account data source trait
/// Abstracts where snapshots come from so the coordinator can be driven by fakes
#[async_trait]
pub trait AccountDataSource: Send + Sync {
    /// Run one full fetch cycle; all accounts or an error, never a partial set
    async fn fetch_all_account_data(&self) -> ApSchoolResult<Vec<AccountSnapshot>>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl AccountDataSource for ApSchoolClient {
    async fn fetch_all_account_data(&self) -> ApSchoolResult<Vec<AccountSnapshot>> {
        ApSchoolClient::fetch_all_account_data(self).await
    }

    fn name(&self) -> &str {
        "apschool"
    }
}

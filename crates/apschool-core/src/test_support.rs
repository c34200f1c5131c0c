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
use apschool_client::{
    AccountSnapshot, ApSchoolError, ApSchoolResult, ClientError, CommunicationError,
    UnreadMessage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

pub fn snapshot(account_id: i64, firstname: &str, balance: f64) -> AccountSnapshot {
    AccountSnapshot {
        account_id,
        firstname: firstname.to_string(),
        lastname: "Martin".to_string(),
        school_class: "3B".to_string(),
        balance,
        unread_messages: None,
        due_amount: 0.0,
    }
}

pub fn unread(id: i64) -> UnreadMessage {
    UnreadMessage {
        id,
        title: format!("Message {id}"),
        created_at: "2025-03-01T08:00:00".to_string(),
    }
}

pub fn auth_error() -> ApSchoolError {
    ApSchoolError::Authentication { status: 401 }
}

pub fn communication_error() -> ApSchoolError {
    CommunicationError::Status {
        status: 503,
        message: "maintenance".to_string(),
    }
    .into()
}

pub fn other_error() -> ApSchoolError {
    ClientError::InvalidResponse("no token".to_string()).into()
}

/// Replays queued results, one per cycle; an empty queue yields an empty set
#[derive(Default)]
pub struct ScriptedSource {
    results: Mutex<VecDeque<ApSchoolResult<Vec<AccountSnapshot>>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(results: Vec<ApSchoolResult<Vec<AccountSnapshot>>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountDataSource for ScriptedSource {
    async fn fetch_all_account_data(&self) -> ApSchoolResult<Vec<AccountSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Blocks every cycle until released, to observe a cycle in flight
#[derive(Default)]
pub struct GatedSource {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl AccountDataSource for GatedSource {
    async fn fetch_all_account_data(&self) -> ApSchoolResult<Vec<AccountSnapshot>> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(vec![snapshot(2, "Alice", 1.0)])
    }

    fn name(&self) -> &str {
        "gated"
    }
}

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

use crate::types::{LinkDto, MessageDto};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Login credential for the APSchool portal, fixed at setup time
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One account reachable from the authenticated credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source_account_id: i64,
    pub target_account_id: i64,
}

impl From<LinkDto> for Link {
    fn from(dto: LinkDto) -> Self {
        Self {
            source_account_id: dto.user_id,
            target_account_id: dto.target_id,
        }
    }
}

/// Result of the initial login: the credential-wide token and every link it grants
#[derive(Clone)]
pub struct AuthSession {
    pub token: String,
    pub links: Vec<Link>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("token", &"<redacted>")
            .field("links", &self.links)
            .finish()
    }
}

/// Token scoped to exactly one account, produced by a context switch.
///
/// Only the fetch calls of the iteration that created it should use it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountContext {
    token: String,
    account_id: i64,
}

impl AccountContext {
    pub fn new(token: impl Into<String>, account_id: i64) -> Self {
        Self {
            token: token.into(),
            account_id,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }
}

impl fmt::Debug for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountContext")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Profile of the account the active context points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub firstname: String,
    pub lastname: String,
    pub school_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadMessage {
    pub id: i64,
    pub title: String,
    /// Creation date as provided by the portal
    pub created_at: String,
}

impl From<MessageDto> for UnreadMessage {
    fn from(dto: MessageDto) -> Self {
        Self {
            id: dto.id,
            title: dto.title.unwrap_or_default(),
            created_at: dto.created_at.unwrap_or_default(),
        }
    }
}

/// Complete per-account data bundle produced by one fetch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Stable across cycles; consumers join on it
    pub account_id: i64,
    pub firstname: String,
    pub lastname: String,
    pub school_class: String,
    pub balance: f64,
    /// `None` when the account has no unread message
    pub unread_messages: Option<Vec<UnreadMessage>>,
    pub due_amount: f64,
}

impl AccountSnapshot {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }

    /// Unread count, with an absent list counted as zero
    pub fn unread_count(&self) -> usize {
        self.unread_messages.as_ref().map_or(0, Vec::len)
    }
}

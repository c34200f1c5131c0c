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

//! Wire types of the APSchool REST API (French field names as sent by the portal)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account-type discriminator of the main/checking account
pub const MAIN_ACCOUNT_TYPE: i64 = 0;

#[derive(Serialize)]
pub struct AuthRequest<'a> {
    #[serde(rename = "identite")]
    pub identity: &'a str,
    #[serde(rename = "motDePasse")]
    pub password: &'a str,
}

impl fmt::Debug for AuthRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response of `POST authentification`
#[derive(Clone, Deserialize)]
pub struct AuthResponse {
    pub token: Option<String>,
    #[serde(default, rename = "liaisons")]
    pub links: Vec<LinkDto>,
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("links", &self.links)
            .finish()
    }
}

/// Response of `POST authentification/{from}/liaisons/{to}`
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub token: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDto {
    #[serde(rename = "utilisateurId")]
    pub user_id: i64,
    #[serde(rename = "identifiantCible")]
    pub target_id: i64,
}

/// Response of `GET /session`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    #[serde(rename = "prenom")]
    pub firstname: String,
    #[serde(rename = "nom")]
    pub lastname: String,
    #[serde(rename = "classe")]
    pub school_class: SchoolClassDto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchoolClassDto {
    #[serde(rename = "libelle")]
    pub label: String,
}

/// Every list endpoint wraps its rows in `items`
#[derive(Debug, Clone, Deserialize)]
pub struct ItemsPage<T> {
    pub items: Vec<T>,
}

/// Only the main account's balance is read; the others may carry none
#[derive(Debug, Clone, Deserialize)]
pub struct FinancialAccountDto {
    #[serde(rename = "typeCompte")]
    pub account_type: i64,
    #[serde(default, rename = "solde")]
    pub balance: Option<f64>,
}

/// Title and date are only read on unread messages
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDto {
    pub id: i64,
    #[serde(default, rename = "titre")]
    pub title: Option<String>,
    #[serde(default, rename = "dateCreation")]
    pub created_at: Option<String>,
    #[serde(rename = "ouvert")]
    pub opened: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnpaidEventDto {
    /// Sent either as a JSON number or as a numeric string
    #[serde(rename = "totalAPayer")]
    pub amount_payable: serde_json::Value,
}

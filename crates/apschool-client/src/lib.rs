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

pub mod client;
pub mod errors;
pub mod models;
pub mod types;

pub use client::{ApSchoolClient, BASE_URL, REQUEST_TIMEOUT};
pub use errors::{ApSchoolError, ApSchoolResult, ClientError, CommunicationError, ErrorKind};
pub use models::{
    AccountContext, AccountSnapshot, AuthSession, Credential, Link, SessionInfo, UnreadMessage,
};

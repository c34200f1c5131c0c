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

use thiserror::Error;

/// APSchool API error types
///
/// Every failure falls into exactly one of three kinds, so callers can
/// match exhaustively on what to do next.
#[derive(Error, Debug)]
pub enum ApSchoolError {
    /// Credentials rejected or token expired (HTTP 400/401/403)
    #[error("Invalid credentials (status {status})")]
    Authentication { status: u16 },

    /// Network, timeout or transport failure
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),

    /// Anything else unexpected (malformed response, client misconfiguration)
    #[error("Unexpected client error: {0}")]
    Other(#[from] ClientError),
}

#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error("Timeout error fetching information")]
    Timeout(#[source] reqwest::Error),

    #[error("Error fetching information: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("APSchool API returned error status {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of an [`ApSchoolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Communication,
    Other,
}

impl ApSchoolError {
    /// Classify a transport-level reqwest failure.
    ///
    /// Timeouts, connection failures (DNS included) and broken bodies are
    /// communication problems; builder and decode failures are not.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CommunicationError::Timeout(err).into()
        } else if err.is_connect() || err.is_request() || err.is_body() {
            CommunicationError::Transport(err).into()
        } else {
            ClientError::Http(err).into()
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Communication(_) => ErrorKind::Communication,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the next scheduled cycle may succeed without human intervention
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Authentication { .. })
    }
}

impl From<serde_json::Error> for ApSchoolError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Json(err).into()
    }
}

pub type ApSchoolResult<T> = Result<T, ApSchoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let auth = ApSchoolError::Authentication { status: 401 };
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert!(!auth.is_transient());

        let status: ApSchoolError = CommunicationError::Status {
            status: 503,
            message: "maintenance".to_string(),
        }
        .into();
        assert_eq!(status.kind(), ErrorKind::Communication);
        assert!(status.is_transient());

        let other: ApSchoolError = ClientError::InvalidResponse("no token".to_string()).into();
        assert_eq!(other.kind(), ErrorKind::Other);
        assert!(other.is_transient());
    }

    #[test]
    fn test_json_error_is_other() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ApSchoolError = err.into();

        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("JSON parsing error"));
    }

    #[test]
    fn test_display_keeps_cause() {
        let err: ApSchoolError = CommunicationError::Status {
            status: 500,
            message: "boom".to_string(),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "Communication error: APSchool API returned error status 500: boom"
        );
    }
}

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

use crate::errors::{ApSchoolError, ApSchoolResult, ClientError, CommunicationError};
use crate::models::{
    AccountContext, AccountSnapshot, AuthSession, Credential, Link, SessionInfo, UnreadMessage,
};
use crate::types::{
    AuthRequest, AuthResponse, FinancialAccountDto, ItemsPage, MAIN_ACCOUNT_TYPE, MessageDto,
    SessionResponse, TokenResponse, UnpaidEventDto,
};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Public APSchool platform API
pub const BASE_URL: &str = "https://api.plateforme.apschool.be";

/// Applied to every request; a timeout fails the step and the whole cycle
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// APSchool REST API client
///
/// Holds no token state: the login token and every per-account token are
/// returned as values, so one instance can be shared freely. It never retries;
/// retrying is left to whoever schedules the fetch cycles.
#[derive(Clone)]
pub struct ApSchoolClient {
    base_url: String,
    credential: Credential,
    client: Client,
}

impl fmt::Debug for ApSchoolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApSchoolClient")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl ApSchoolClient {
    pub fn new(credential: Credential) -> ApSchoolResult<Self> {
        Self::with_timeout(credential, REQUEST_TIMEOUT)
    }

    pub(crate) fn with_timeout(credential: Credential, timeout: Duration) -> ApSchoolResult<Self> {
        let base_url = credential.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Config("Base URL is empty".to_string()).into());
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            credential,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Log in with the stored credential.
    ///
    /// Returns the credential-wide token together with every linked account, in
    /// the order the portal lists them.
    pub async fn authenticate(&self) -> ApSchoolResult<AuthSession> {
        let url = self.url("authentification");
        info!("🔐 [APSCHOOL AUTH] Authenticating against {}", self.base_url);

        let body = AuthRequest {
            identity: &self.credential.username,
            password: &self.credential.password,
        };
        let response: AuthResponse = self
            .execute(self.client.post(&url).json(&body), "authentification")
            .await?;

        let token = response
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ClientError::InvalidResponse("Authentication response carries no token".to_string())
            })?;
        let links: Vec<Link> = response.links.into_iter().map(Link::from).collect();

        info!(
            "✅ [APSCHOOL AUTH] Authenticated, {} linked account(s)",
            links.len()
        );
        debug!("   Links: {:?}", links);
        Ok(AuthSession { token, links })
    }

    /// Exchange `current_token` for a token scoped to `link.target_account_id`
    pub async fn switch_context(
        &self,
        current_token: &str,
        link: &Link,
    ) -> ApSchoolResult<AccountContext> {
        let path = format!(
            "authentification/{}/liaisons/{}",
            link.source_account_id, link.target_account_id
        );
        debug!(
            "🔀 [APSCHOOL LINK] Switching context {} -> {}",
            link.source_account_id, link.target_account_id
        );

        let response: TokenResponse = self
            .execute(
                self.client.post(self.url(&path)).bearer_auth(current_token),
                &path,
            )
            .await?;

        let token = response
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!(
                    "Context switch to {} returned no token",
                    link.target_account_id
                ))
            })?;

        Ok(AccountContext::new(token, link.target_account_id))
    }

    /// Profile (name, school class) of the account behind `context`
    pub async fn fetch_session_info(&self, context: &AccountContext) -> ApSchoolResult<SessionInfo> {
        let session: SessionResponse = self.get(context, "/session").await?;

        Ok(SessionInfo {
            firstname: session.firstname,
            lastname: session.lastname,
            school_class: session.school_class.label,
        })
    }

    /// Balance of the main account, 0 when the account has none
    pub async fn fetch_balance(&self, context: &AccountContext) -> ApSchoolResult<f64> {
        let path = format!("/mediatr-utilisateurs/{}/comptes", context.account_id());
        let page: ItemsPage<FinancialAccountDto> = self.get(context, &path).await?;

        let balance = match page
            .items
            .iter()
            .find(|account| account.account_type == MAIN_ACCOUNT_TYPE)
        {
            Some(main) => main.balance.ok_or_else(|| {
                ClientError::InvalidResponse("Main account carries no balance".to_string())
            })?,
            None => 0.0,
        };

        trace!(
            "   {} financial account(s), main balance {:.2}",
            page.items.len(),
            balance
        );
        Ok(balance)
    }

    /// Messages not opened yet, in server order.
    ///
    /// `None` when every message has been opened.
    pub async fn fetch_unread_messages(
        &self,
        context: &AccountContext,
    ) -> ApSchoolResult<Option<Vec<UnreadMessage>>> {
        let path = format!("/utilisateurs/{}/messages", context.account_id());
        let page: ItemsPage<MessageDto> = self.get(context, &path).await?;

        let unread: Vec<UnreadMessage> = page
            .items
            .into_iter()
            .filter(|message| !message.opened)
            .map(UnreadMessage::from)
            .collect();

        if unread.is_empty() {
            Ok(None)
        } else {
            Ok(Some(unread))
        }
    }

    /// Total still due across the credential's unpaid events
    pub async fn fetch_due_amount(&self, context: &AccountContext) -> ApSchoolResult<f64> {
        let page: ItemsPage<UnpaidEventDto> = self
            .get(context, "/mediatr-utilisateurs/evenements-impayes")
            .await?;

        let mut total = 0.0;
        for event in &page.items {
            total += coerce_amount(&event.amount_payable)?;
        }
        Ok(total)
    }

    /// Everything known about the account behind `context`.
    ///
    /// Calls run one after another; each uses the context's token.
    pub async fn fetch_account_snapshot(
        &self,
        context: &AccountContext,
    ) -> ApSchoolResult<AccountSnapshot> {
        let session = self.fetch_session_info(context).await?;
        let balance = self.fetch_balance(context).await?;
        let unread_messages = self.fetch_unread_messages(context).await?;
        let due_amount = self.fetch_due_amount(context).await?;

        let snapshot = AccountSnapshot {
            account_id: context.account_id(),
            firstname: session.firstname,
            lastname: session.lastname,
            school_class: session.school_class,
            balance,
            unread_messages,
            due_amount,
        };

        debug!(
            "📋 [APSCHOOL DATA] Account {}: balance={:.2}, unread={}, due={:.2}",
            snapshot.account_id,
            snapshot.balance,
            snapshot.unread_count(),
            snapshot.due_amount
        );
        Ok(snapshot)
    }

    /// Run one full fetch cycle: log in, then switch to and read every linked account.
    ///
    /// Each switch is authorised with the most recently issued token. Any failure
    /// aborts the cycle; a partial list is never returned.
    pub async fn fetch_all_account_data(&self) -> ApSchoolResult<Vec<AccountSnapshot>> {
        let session = self.authenticate().await?;

        let mut active_token = session.token;
        let mut snapshots = Vec::with_capacity(session.links.len());
        for link in &session.links {
            let context = self.switch_context(&active_token, link).await?;
            snapshots.push(self.fetch_account_snapshot(&context).await?);
            active_token = context.token().to_string();
        }

        info!(
            "✅ [APSCHOOL DATA] Retrieved {} account snapshot(s)",
            snapshots.len()
        );
        Ok(snapshots)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        context: &AccountContext,
        path: &str,
    ) -> ApSchoolResult<T> {
        let request = self.client.get(self.url(path)).bearer_auth(context.token());
        self.execute(request, path).await
    }

    /// Send a request and map the response onto the error taxonomy
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> ApSchoolResult<T> {
        debug!("🔍 [APSCHOOL QUERY] {}", endpoint);

        let response = request.send().await.map_err(|e| {
            debug!("   {} failed: {}", endpoint, e);
            ApSchoolError::from_transport(e)
        })?;

        let status = response.status();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("   Access denied on {} (status {})", endpoint, status);
                Err(ApSchoolError::Authentication {
                    status: status.as_u16(),
                })
            }
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(ApSchoolError::from_transport)?;
                trace!("   {} returned {} bytes", endpoint, body.len());
                Ok(serde_json::from_str(&body)?)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                debug!("   {} status {}: {}", endpoint, status, message);
                Err(CommunicationError::Status {
                    status: status.as_u16(),
                    message,
                }
                .into())
            }
        }
    }
}

/// Amounts come as JSON numbers or numeric strings
fn coerce_amount(value: &Value) -> Result<f64, ClientError> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| ClientError::InvalidResponse(format!("Amount out of range: {number}"))),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| ClientError::InvalidResponse(format!("Amount is not numeric: {text:?}"))),
        other => Err(ClientError::InvalidResponse(format!(
            "Unexpected amount value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client_for(server: &Server) -> ApSchoolClient {
        ApSchoolClient::new(Credential::new(server.url(), "parent", "secret")).unwrap()
    }

    fn context() -> AccountContext {
        AccountContext::new("ctx-token", 2)
    }

    #[test]
    fn test_coerce_amount() {
        assert_eq!(coerce_amount(&json!(12.5)).unwrap(), 12.5);
        assert_eq!(coerce_amount(&json!(3)).unwrap(), 3.0);
        assert_eq!(coerce_amount(&json!(" 7.25 ")).unwrap(), 7.25);
        assert!(coerce_amount(&json!("douze")).is_err());
        assert!(coerce_amount(&json!(null)).is_err());
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = ApSchoolClient::new(Credential::new("/", "parent", "secret"));

        assert!(matches!(result, Err(ApSchoolError::Other(ClientError::Config(_)))));
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification")
            .match_header("content-type", "application/json")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({
                "identite": "parent",
                "motDePasse": "secret"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "token": "auth-token",
                    "liaisons": [
                        {"utilisateurId": 1, "identifiantCible": 2},
                        {"utilisateurId": 1, "identifiantCible": 3}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let session = client_for(&server).authenticate().await.unwrap();

        assert_eq!(session.token, "auth-token");
        assert_eq!(
            session.links,
            vec![
                Link {
                    source_account_id: 1,
                    target_account_id: 2
                },
                Link {
                    source_account_id: 1,
                    target_account_id: 3
                },
            ]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification")
            .with_status(401)
            .create_async()
            .await;

        let result = client_for(&server).authenticate().await;

        assert!(matches!(
            result,
            Err(ApSchoolError::Authentication { status: 401 })
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bad_request_is_authentication_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification")
            .with_status(400)
            .with_body("{\"message\": \"identifiants invalides\"}")
            .create_async()
            .await;

        let err = client_for(&server).authenticate().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_without_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification")
            .with_status(200)
            .with_body(json!({"liaisons": []}).to_string())
            .create_async()
            .await;

        let err = client_for(&server).authenticate().await.unwrap_err();

        assert!(matches!(
            err,
            ApSchoolError::Other(ClientError::InvalidResponse(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_switch_context_uses_current_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification/1/liaisons/2")
            .match_header("authorization", "Bearer auth-token")
            .with_status(200)
            .with_body(json!({"token": "ctx-2"}).to_string())
            .create_async()
            .await;

        let link = Link {
            source_account_id: 1,
            target_account_id: 2,
        };
        let context = client_for(&server)
            .switch_context("auth-token", &link)
            .await
            .unwrap();

        assert_eq!(context.token(), "ctx-2");
        assert_eq!(context.account_id(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_switch_context_forbidden() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/authentification/1/liaisons/9")
            .with_status(403)
            .create_async()
            .await;

        let link = Link {
            source_account_id: 1,
            target_account_id: 9,
        };
        let result = client_for(&server).switch_context("stale", &link).await;

        assert!(matches!(
            result,
            Err(ApSchoolError::Authentication { status: 403 })
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_session_info() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/session")
            .match_header("authorization", "Bearer ctx-token")
            .with_status(200)
            .with_body(
                json!({"prenom": "Alice", "nom": "Martin", "classe": {"libelle": "3B"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let info = client_for(&server)
            .fetch_session_info(&context())
            .await
            .unwrap();

        assert_eq!(
            info,
            SessionInfo {
                firstname: "Alice".to_string(),
                lastname: "Martin".to_string(),
                school_class: "3B".to_string(),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_balance_picks_main_account() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .match_header("authorization", "Bearer ctx-token")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"typeCompte": 1, "solde": 99.0},
                    {"typeCompte": 0, "solde": 42.5}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let balance = client_for(&server).fetch_balance(&context()).await.unwrap();

        assert_eq!(balance, 42.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_balance_without_main_account() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .with_status(200)
            .with_body(json!({"items": [{"typeCompte": 3, "solde": 15.0}]}).to_string())
            .create_async()
            .await;

        let balance = client_for(&server).fetch_balance(&context()).await.unwrap();

        assert_eq!(balance, 0.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_balance_ignores_secondary_without_balance() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"typeCompte": 1, "solde": null},
                    {"typeCompte": 0, "solde": 42.5}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let balance = client_for(&server).fetch_balance(&context()).await.unwrap();

        assert_eq!(balance, 42.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_balance_main_account_without_balance() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .with_status(200)
            .with_body(json!({"items": [{"typeCompte": 0, "solde": null}]}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_balance(&context())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApSchoolError::Other(ClientError::InvalidResponse(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_balance_empty_list() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .with_status(200)
            .with_body(json!({"items": []}).to_string())
            .create_async()
            .await;

        let balance = client_for(&server).fetch_balance(&context()).await.unwrap();

        assert_eq!(balance, 0.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_unread_messages_keeps_server_order() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/utilisateurs/2/messages")
            .match_header("authorization", "Bearer ctx-token")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"id": 30, "titre": "Piscine", "dateCreation": "2025-03-03T09:00:00", "ouvert": false},
                    {"id": 20, "titre": "Réunion", "dateCreation": "2025-03-02T09:00:00", "ouvert": true},
                    {"id": 10, "titre": "Cantine", "dateCreation": "2025-03-01T09:00:00", "ouvert": false}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_unread_messages(&context())
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![30, 10]);
        assert_eq!(messages[0].title, "Piscine");
        assert_eq!(messages[1].created_at, "2025-03-01T09:00:00");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_unread_messages_skips_opened_with_null_fields() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/utilisateurs/2/messages")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"id": 5, "titre": null, "dateCreation": null, "ouvert": true},
                    {"id": 6, "titre": "Photo de classe", "dateCreation": "2025-03-04T10:00:00", "ouvert": false},
                    {"id": 7, "ouvert": false}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_unread_messages(&context())
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![6, 7]);
        assert_eq!(messages[0].title, "Photo de classe");
        assert_eq!(messages[1].title, "");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_unread_messages_all_opened() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/utilisateurs/2/messages")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"id": 1, "titre": "Lu", "dateCreation": "2025-03-01T09:00:00", "ouvert": true}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_unread_messages(&context())
            .await
            .unwrap();

        assert_eq!(messages, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_due_amount_sums_items() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/evenements-impayes")
            .match_header("authorization", "Bearer ctx-token")
            .with_status(200)
            .with_body(
                json!({"items": [
                    {"totalAPayer": "12.50"},
                    {"totalAPayer": 7.5},
                    {"totalAPayer": 0}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let due = client_for(&server)
            .fetch_due_amount(&context())
            .await
            .unwrap();

        assert_eq!(due, 20.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_due_amount_empty() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/evenements-impayes")
            .with_status(200)
            .with_body(json!({"items": []}).to_string())
            .create_async()
            .await;

        let due = client_for(&server)
            .fetch_due_amount(&context())
            .await
            .unwrap();

        assert_eq!(due, 0.0);
        assert!(due.is_sign_positive());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_due_amount_non_numeric() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/evenements-impayes")
            .with_status(200)
            .with_body(json!({"items": [{"totalAPayer": "n/a"}]}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_due_amount(&context())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Other);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_communication() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/session")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_session_info(&context())
            .await
            .unwrap_err();

        match err {
            ApSchoolError::Communication(CommunicationError::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_json_is_other() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/mediatr-utilisateurs/2/comptes")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_balance(&context())
            .await
            .unwrap_err();

        assert!(matches!(err, ApSchoolError::Other(ClientError::Json(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_communication() {
        let client =
            ApSchoolClient::new(Credential::new("http://127.0.0.1:1", "parent", "secret")).unwrap();

        let err = client.authenticate().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failures_stay_below_warn_level() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut server = Server::new_async().await;
        server
            .mock("POST", "/authentification")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/session")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let client = client_for(&server);

        assert!(client.authenticate().await.is_err());
        assert!(client.fetch_session_info(&context()).await.is_err());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.is_empty(), "unexpected log output: {output}");
    }

    /// Read one request off `socket` and return its "METHOD /path" part
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let body_len = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        head.lines()
            .next()
            .and_then(|line| line.rsplit_once(' '))
            .map(|(request, _version)| request.to_string())
            .unwrap_or_default()
    }

    /// HTTP server answering the listed requests and never answering anything else.
    ///
    /// Returns its URL and the log of requests it received.
    async fn stalling_server(
        routes: Vec<(&'static str, serde_json::Value)>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    log.lock().unwrap().push(request.clone());

                    let Some((_, body)) = routes.iter().find(|(route, _)| *route == request)
                    else {
                        // Hold the connection open without replying
                        std::future::pending::<()>().await;
                        return;
                    };
                    let body = body.to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (url, seen)
    }

    fn impatient_client(url: &str) -> ApSchoolClient {
        ApSchoolClient::with_timeout(
            Credential::new(url, "parent", "secret"),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (url, seen) = stalling_server(Vec::new()).await;

        let err = impatient_client(&url).authenticate().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(matches!(
            err,
            ApSchoolError::Communication(CommunicationError::Timeout(_))
        ));
        assert!(err.is_transient());
        assert_eq!(*seen.lock().unwrap(), vec!["POST /authentification"]);
    }

    #[tokio::test]
    async fn test_timeout_mid_cycle_aborts_remaining_accounts() {
        let (url, seen) = stalling_server(vec![
            (
                "POST /authentification",
                json!({
                    "token": "auth-token",
                    "liaisons": [
                        {"utilisateurId": 1, "identifiantCible": 2},
                        {"utilisateurId": 1, "identifiantCible": 3}
                    ]
                }),
            ),
            (
                "POST /authentification/1/liaisons/2",
                json!({"token": "tok-2"}),
            ),
        ])
        .await;

        let err = impatient_client(&url)
            .fetch_all_account_data()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApSchoolError::Communication(CommunicationError::Timeout(_))
        ));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "POST /authentification",
                "POST /authentification/1/liaisons/2",
                "GET /session",
            ]
        );
    }
}

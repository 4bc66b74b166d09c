use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::*;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use service::config::Config;
use session::{Session, Token};

use super::http::{HttpClient, HttpClientBuilder};
use super::NotificationApi;
use crate::error::{DomainErrorKind, Error, ExternalErrorKind, InternalErrorKind};
use crate::notification::Notification;

/// Client for the dashboard's REST backend.
#[derive(Clone)]
pub struct ApiClient {
    client: HttpClient,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Body returned by `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Lifetime in seconds, used when `expires_at` is absent.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl LoginResponse {
    /// Turn the response into a session, rejecting an empty token.
    pub fn into_session(self) -> Result<Session, Error> {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));
        let refresh_token = match self.refresh_token {
            Some(raw) if !raw.trim().is_empty() => Some(Token::new(raw)?),
            _ => None,
        };

        Ok(Session::new(Token::new(self.token)?)
            .with_refresh_token(refresh_token)
            .with_expires_at(expires_at))
    }
}

/// The backend has returned the list bare and wrapped over time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NotificationList {
    Bare(Vec<Notification>),
    Wrapped { notifications: Vec<Notification> },
    Data { data: Vec<Notification> },
}

impl From<NotificationList> for Vec<Notification> {
    fn from(list: NotificationList) -> Self {
        match list {
            NotificationList::Bare(notifications)
            | NotificationList::Wrapped { notifications }
            | NotificationList::Data {
                data: notifications,
            } => notifications,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MarkAllReadResponse {
    #[serde(default)]
    message: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = HttpClientBuilder::new()
            .with_timeout(config.request_timeout())
            .with_max_retries(config.http_max_retries)
            .build()?;

        Ok(Self::with_client(client, config.api_base_url()))
    }

    pub fn with_client(client: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange email and password for a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, Error> {
        let url = format!("{}/auth/login", self.base_url);
        let body = serde_json::to_vec(&LoginRequest { email, password }).map_err(|err| Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to serialize login request".to_string(),
            )),
        })?;

        info!("Logging in as {email}");
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Login rejected for {email}: {status}");
            return Err(Error::external(
                ExternalErrorKind::InvalidCredentials,
                "Email or password was rejected",
            ));
        }
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        Ok(response.json::<LoginResponse>().await?)
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn fetch_notifications(&self, token: &Token) -> Result<Vec<Notification>, Error> {
        let url = format!("{}/notifications", self.base_url);
        debug!("GET {url}");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        let list = response.json::<NotificationList>().await?;
        let notifications: Vec<Notification> = list.into();
        debug!("Fetched {} notifications", notifications.len());
        Ok(notifications)
    }

    async fn mark_all_read(&self, token: &Token) -> Result<String, Error> {
        let url = format!("{}/notifications", self.base_url);
        debug!("PATCH {url}");

        let response = self
            .client
            .patch(&url)
            .bearer_auth(token.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        // Some deployments answer 204 with no body.
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            MarkAllReadResponse::default()
        } else {
            serde_json::from_str::<MarkAllReadResponse>(&text).map_err(|err| Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::External(ExternalErrorKind::InvalidResponse),
            })?
        };

        Ok(body
            .message
            .unwrap_or_else(|| "All notifications marked as read".to_string()))
    }
}

/// Map a non-success status from an authenticated endpoint.
fn status_error(status: StatusCode, body: String) -> Error {
    warn!("Backend responded {status}: {body}");
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExternalErrorKind::AuthExpired,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ExternalErrorKind::NetworkUnavailable
        }
        status if status.is_server_error() => ExternalErrorKind::NetworkUnavailable,
        status => ExternalErrorKind::Other(format!("Unexpected status {status}")),
    };
    Error::external(kind, &format!("{status}: {body}"))
}

//! Clients for the REST backend.

use async_trait::async_trait;
use session::Token;

use crate::error::Error;
use crate::notification::Notification;

pub mod api_client;
pub mod http;

pub use api_client::{ApiClient, LoginResponse};
pub use http::{HttpClient, HttpClientBuilder};

/// The notification endpoints the notification channel depends on.
///
/// The token is passed per call so a request always carries the credential
/// of the session that issued it.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `GET /notifications` for the token's owner.
    async fn fetch_notifications(&self, token: &Token) -> Result<Vec<Notification>, Error>;

    /// `PATCH /notifications`, marking every notification read server-side.
    /// Returns the server's confirmation message.
    async fn mark_all_read(&self, token: &Token) -> Result<String, Error>;
}

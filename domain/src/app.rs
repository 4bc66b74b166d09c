//! The running dashboard client: session, gateway and notification channel
//! wired together.

use std::sync::{Arc, Weak};
use std::time::Duration;

use events::{EventHandler, SessionEvent};
use log::*;
use service::config::Config;
use session::storage::FileStorage;
use session::{Manager, Session, Storage};
use sse::{EventSourceTransport, Transport};
use tokio::sync::broadcast;

use crate::error::Error;
use crate::gateway::ApiClient;
use crate::notification::{Channel, ChannelConfig, WeakChannel};
use crate::oauth::CallbackParams;
use crate::signal::{Signal, SignalBus};

/// Keeps the notification channel in step with the session.
///
/// Opens the channel whenever a session starts and closes it synchronously
/// when one ends, raising the signals the UI needs to send the user back to
/// the login page. Holds only weak references so the session manager, which
/// owns this handler, does not keep the channel alive.
struct ChannelSessionHandler {
    session: Weak<Manager>,
    channel: WeakChannel,
    signals: SignalBus,
}

impl EventHandler for ChannelSessionHandler {
    fn handle(&self, event: &SessionEvent) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };

        match event {
            SessionEvent::Started => {
                let token = self
                    .session
                    .upgrade()
                    .and_then(|session| session.get_token());
                match token {
                    Some(token) => channel.open(token),
                    None => warn!("Session started without a usable token"),
                }
            }
            SessionEvent::Ended { reason } => {
                channel.close();
                if reason.is_involuntary() {
                    self.signals.send(Signal::SessionExpired(*reason));
                }
                self.signals.send(Signal::RedirectToLogin);
            }
        }
    }
}

pub struct App {
    session: Arc<Manager>,
    api: ApiClient,
    channel: Channel,
    signals: SignalBus,
    request_timeout: Duration,
}

impl App {
    /// Build the client from configuration and resume any persisted session.
    pub async fn boot(config: &Config) -> Result<Self, Error> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config.storage_path()));
        let api = ApiClient::new(config)?;
        let transport: Arc<dyn Transport> = Arc::new(EventSourceTransport::new(config.push_url()));
        info!(
            "Booting against {} (push: {})",
            api.base_url(),
            config.push_url()
        );

        let app = Self::assemble(storage, api, transport, ChannelConfig::from_config(config)).await?;
        app.resume();
        Ok(app)
    }

    /// Wire the parts together without opening the channel.
    pub async fn assemble(
        storage: Arc<dyn Storage>,
        api: ApiClient,
        transport: Arc<dyn Transport>,
        channel_config: ChannelConfig,
    ) -> Result<Self, Error> {
        let request_timeout = channel_config.request_timeout;
        let session = Arc::new(Manager::restore(storage).await?);
        let signals = SignalBus::default();
        let channel = Channel::new(
            session.clone(),
            Arc::new(api.clone()),
            transport,
            signals.clone(),
            channel_config,
        );

        session.events().subscribe(Arc::new(ChannelSessionHandler {
            session: Arc::downgrade(&session),
            channel: channel.downgrade(),
            signals: signals.clone(),
        }));

        Ok(Self {
            session,
            api,
            channel,
            signals,
            request_timeout,
        })
    }

    /// Open the channel when a session was restored from storage.
    pub fn resume(&self) {
        match self.session.get_token() {
            Some(token) => {
                info!("Resuming persisted session");
                self.channel.open(token);
            }
            None => debug!("No session to resume"),
        }
    }

    /// Log in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), Error> {
        let response = tokio::time::timeout(self.request_timeout, self.api.login(email, password))
            .await??;
        self.start(response.into_session()?).await
    }

    /// Complete an OAuth login from the provider's redirect URL.
    pub async fn complete_oauth(&self, redirect_url: &str) -> Result<(), Error> {
        let params = CallbackParams::from_redirect(redirect_url)?;
        self.start(params.into_session()?).await
    }

    pub async fn logout(&self) -> Result<(), Error> {
        Ok(self.session.logout().await?)
    }

    /// Close the channel without ending the session, for process exit.
    pub fn shutdown(&self) {
        self.channel.close();
    }

    pub fn session(&self) -> &Arc<Manager> {
        &self.session
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    async fn start(&self, session: Session) -> Result<(), Error> {
        self.session.start_session(session).await?;
        info!("Logged in");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, ExternalErrorKind};
    use crate::gateway::HttpClientBuilder;
    use futures_util::stream;
    use mockito::{Server, ServerGuard};
    use serde_json::json;
    use session::storage::{MemoryStorage, TOKEN_KEY};
    use session::AuthState;
    use sse::{Error as TransportError, PushStream};

    /// Transport whose connections stay open and silent.
    struct IdleTransport;

    impl Transport for IdleTransport {
        fn connect(&self, _token: &str) -> Result<PushStream, TransportError> {
            Ok(Box::pin(stream::pending()))
        }
    }

    async fn assemble(server: &ServerGuard, storage: Arc<MemoryStorage>) -> App {
        let http = HttpClientBuilder::new().with_max_retries(0).build().unwrap();
        App::assemble(
            storage,
            ApiClient::with_client(http, server.url()),
            Arc::new(IdleTransport),
            ChannelConfig::default(),
        )
        .await
        .unwrap()
    }

    async fn next_signal(signals: &mut broadcast::Receiver<Signal>) -> Signal {
        tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("no signal")
            .expect("signal bus closed")
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_auth_failure_logs_out_and_redirects() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/notifications")
            .match_header("authorization", "Bearer tok1")
            .with_status(401)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        storage.set(TOKEN_KEY, "tok1").await.unwrap();
        storage.set("cached_report", "{}").await.unwrap();

        let app = assemble(&server, storage.clone()).await;
        assert_eq!(app.session().state(), AuthState::Authenticated);
        let mut signals = app.subscribe_signals();
        app.resume();

        assert_eq!(
            next_signal(&mut signals).await,
            Signal::SessionExpired(events::EndReason::AuthExpired)
        );
        assert_eq!(next_signal(&mut signals).await, Signal::RedirectToLogin);
        assert_eq!(app.session().state(), AuthState::Anonymous);
        assert!(storage.is_empty().await);
        assert!(!app.channel().is_open());
    }

    #[tokio::test]
    async fn test_expired_token_redirects_to_login() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/notifications")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let app = assemble(&server, storage.clone()).await;
        let mut signals = app.subscribe_signals();
        let session = Session::new(session::Token::new("tok1").unwrap())
            .with_expires_at(Some(chrono::Utc::now() + chrono::Duration::milliseconds(100)));
        app.session().start_session(session).await.unwrap();
        assert!(app.channel().is_open());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let err = app.channel().refresh().await.unwrap_err();

        assert!(err.is_auth_expired());
        assert_eq!(
            next_signal(&mut signals).await,
            Signal::SessionExpired(events::EndReason::TokenExpired)
        );
        assert_eq!(next_signal(&mut signals).await, Signal::RedirectToLogin);
        assert_eq!(app.session().state(), AuthState::Anonymous);
        assert!(storage.is_empty().await);
        assert!(!app.channel().is_open());
    }

    #[tokio::test]
    async fn test_login_opens_channel_and_logout_closes_it() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(json!({ "token": "tok1" }).to_string())
            .create_async()
            .await;
        let _list = server
            .mock("GET", "/notifications")
            .match_header("authorization", "Bearer tok1")
            .with_status(200)
            .with_body(json!([{ "id": 1, "message": "Outbreak reported" }]).to_string())
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let app = assemble(&server, storage.clone()).await;
        let mut signals = app.subscribe_signals();

        app.login("admin@example.com", "secret").await.unwrap();

        assert_eq!(
            storage.get(TOKEN_KEY).await.unwrap().as_deref(),
            Some("tok1")
        );
        let channel = app.channel().clone();
        wait_until(move || channel.unread_count() == 1).await;

        app.logout().await.unwrap();

        // A user logout redirects without a session-expired notice.
        assert_eq!(next_signal(&mut signals).await, Signal::RedirectToLogin);
        assert!(!app.channel().is_open());
        assert_eq!(app.channel().unread_count(), 0);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_credentials_stay_anonymous() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(401)
            .create_async()
            .await;

        let app = assemble(&server, Arc::new(MemoryStorage::new())).await;
        let err = app.login("admin@example.com", "wrong").await.unwrap_err();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::InvalidCredentials)
        );
        assert_eq!(app.session().state(), AuthState::Anonymous);
        assert!(!app.channel().is_open());
    }

    #[tokio::test]
    async fn test_complete_oauth_starts_session() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/notifications")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let app = assemble(&server, Arc::new(MemoryStorage::new())).await;
        app.complete_oauth(
            "http://localhost:3000/auth/google/callback?access_token=oauth-tok&refresh_token=r1",
        )
        .await
        .unwrap();

        assert_eq!(app.session().get_token().unwrap().expose(), "oauth-tok");
        assert!(app.channel().is_open());
    }
}

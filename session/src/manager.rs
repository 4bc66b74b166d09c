//! Session lifecycle manager.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use events::{EndReason, EventPublisher, SessionEvent};
use log::*;
use tokio::sync::{watch, Mutex};

use crate::error::{session_error, Error, SessionErrorKind};
use crate::storage::{Storage, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY, TOKEN_KEY};
use crate::token::{Session, Token};

/// The two states a session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated,
}

/// Owns the bearer credential and its lifecycle.
///
/// The in-memory session lives in a `watch` channel so readers can subscribe
/// to changes; only this type writes to it. Lifecycle operations that touch
/// durable storage are serialized so a concurrent login and logout cannot
/// leave memory and storage disagreeing.
pub struct Manager {
    storage: Arc<dyn Storage>,
    state: watch::Sender<Option<Session>>,
    events: EventPublisher,
    lifecycle: Mutex<()>,
}

impl Manager {
    /// Create an anonymous manager without reading storage.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            storage,
            state,
            events: EventPublisher::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// Create a manager from whatever credential durable storage holds.
    ///
    /// Starts `Authenticated` when a non-empty token is found, `Anonymous`
    /// otherwise. A persisted session whose expiry already passed is discarded
    /// and storage is wiped, as is a namespace that cannot be read at all.
    pub async fn restore(storage: Arc<dyn Storage>) -> Result<Self, Error> {
        let manager = Self::new(storage);

        let persisted = match manager.read_persisted().await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!("Persisted session is unreadable, clearing storage: {err}");
                manager.storage.clear().await?;
                None
            }
        };

        let Some(session) = persisted else {
            debug!("No persisted session found, starting anonymous");
            return Ok(manager);
        };

        if session.is_expired() {
            info!("Persisted session has expired, clearing storage");
            manager.storage.clear().await?;
            return Ok(manager);
        }

        info!("Restored persisted session");
        manager.state.send_replace(Some(session));
        Ok(manager)
    }

    /// Store a fresh credential and announce that a session exists.
    ///
    /// No validation of the token's contents happens here beyond rejecting an
    /// empty value. Calling this while already authenticated replaces the
    /// stored token and stays `Authenticated`.
    pub async fn login(&self, token: &str, refresh_token: Option<&str>) -> Result<(), Error> {
        let token = Token::new(token)?;
        let refresh_token = match refresh_token {
            Some(raw) if !raw.trim().is_empty() => Some(Token::new(raw)?),
            _ => None,
        };
        self.start_session(Session::new(token).with_refresh_token(refresh_token))
            .await
    }

    /// Store a fully described session (token, refresh token, expiry).
    pub async fn start_session(&self, session: Session) -> Result<(), Error> {
        {
            let _guard = self.lifecycle.lock().await;
            self.persist(&session).await?;
            let previous = self.state.send_replace(Some(session));
            if previous.is_some() {
                debug!("Replaced the token of an existing session");
            } else {
                info!("Session started");
            }
        }
        self.events.publish(SessionEvent::Started);
        Ok(())
    }

    /// End the session at the user's request.
    pub async fn logout(&self) -> Result<(), Error> {
        self.end_session(EndReason::UserLogout).await
    }

    /// End the session for any reason.
    ///
    /// Wipes the whole storage namespace, then moves to `Anonymous`. Session-end
    /// handlers run only on an actual `Authenticated -> Anonymous` transition,
    /// so ending an already ended session changes nothing observable. The
    /// in-memory state is cleared even if wiping storage fails; the storage
    /// error is still returned.
    pub async fn end_session(&self, reason: EndReason) -> Result<(), Error> {
        self.finish(None, reason).await.map(|_| ())
    }

    /// End the session only while it still holds `token`.
    ///
    /// Used for failures reported against a specific credential, so a late
    /// 401 for a replaced token cannot end the session that replaced it.
    /// Returns whether that session was ended.
    pub async fn end_session_for(&self, token: &Token, reason: EndReason) -> Result<bool, Error> {
        self.finish(Some(token), reason).await
    }

    async fn finish(&self, expected: Option<&Token>, reason: EndReason) -> Result<bool, Error> {
        let (was_authenticated, cleared) = {
            let _guard = self.lifecycle.lock().await;
            if let Some(expected) = expected {
                let holds = matches!(&*self.state.borrow(), Some(session) if &session.token == expected);
                if !holds {
                    debug!("Ignoring {reason} for a superseded token");
                    return Ok(false);
                }
            }
            let cleared = self.storage.clear().await;
            let previous = self.state.send_replace(None);
            (previous.is_some(), cleared)
        };

        if let Err(err) = &cleared {
            error!("Failed to clear session storage: {err}");
        }

        if was_authenticated {
            info!("Session ended: {reason}");
            self.events.publish(SessionEvent::Ended { reason });
        } else {
            debug!("Session already ended, ignoring {reason}");
        }

        cleared.map(|_| was_authenticated)
    }

    /// Current token, or `None` when anonymous or locally known to be expired.
    pub fn get_token(&self) -> Option<Token> {
        self.state
            .borrow()
            .as_ref()
            .filter(|session| !session.is_expired())
            .map(|session| session.token.clone())
    }

    /// Token to attach to an outgoing request.
    ///
    /// This is the "before use" expiry check: a session past its expiry is
    /// ended with `TokenExpired` and the call fails with `Expired`.
    pub async fn token_for_request(&self) -> Result<Token, Error> {
        let session = self.session().ok_or_else(|| {
            session_error(SessionErrorKind::Unauthenticated, "No active session")
        })?;

        if session.is_expired() {
            warn!("Token expired before use");
            if let Err(err) = self.end_session(EndReason::TokenExpired).await {
                error!("Failed to end expired session: {err}");
            }
            return Err(session_error(
                SessionErrorKind::Expired,
                "Session token has expired",
            ));
        }

        Ok(session.token)
    }

    /// Snapshot of the whole session, expired or not.
    pub fn session(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    /// `Anonymous` as soon as the token's expiry passes, even before the
    /// session is ended.
    pub fn state(&self) -> AuthState {
        if self.get_token().is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    /// Subscribe to session changes. `None` means anonymous.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    /// Register a callback invoked exactly once for every session end,
    /// whatever triggered it.
    pub fn on_session_end<F>(&self, handler: F)
    where
        F: Fn(EndReason) + Send + Sync + 'static,
    {
        self.events.subscribe(Arc::new(move |event: &SessionEvent| {
            if let SessionEvent::Ended { reason } = event {
                handler(*reason);
            }
        }));
    }

    /// Register a callback invoked after every successful login.
    pub fn on_session_start<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(Arc::new(move |event: &SessionEvent| {
            if let SessionEvent::Started = event {
                handler();
            }
        }));
    }

    /// The publisher behind `on_session_start` / `on_session_end`.
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// The durable namespace, for components caching user-scoped values.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn persist(&self, session: &Session) -> Result<(), Error> {
        let expires_at = session.expires_at.map(|at| at.to_rfc3339());
        self.storage
            .set_many(&[
                (TOKEN_KEY, Some(session.token.expose())),
                (
                    REFRESH_TOKEN_KEY,
                    session.refresh_token.as_ref().map(Token::expose),
                ),
                (EXPIRES_AT_KEY, expires_at.as_deref()),
            ])
            .await
    }

    async fn read_persisted(&self) -> Result<Option<Session>, Error> {
        let token = match self.storage.get(TOKEN_KEY).await? {
            Some(raw) => match Token::new(raw) {
                Ok(token) => token,
                Err(_) => {
                    warn!("Ignoring empty persisted token");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };

        let refresh_token = self
            .storage
            .get(REFRESH_TOKEN_KEY)
            .await?
            .and_then(|raw| Token::new(raw).ok());

        let expires_at = match self.storage.get(EXPIRES_AT_KEY).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(err) => {
                    warn!("Ignoring unparseable token expiry {raw:?}: {err}");
                    None
                }
            },
            None => None,
        };

        Ok(Some(
            Session::new(token)
                .with_refresh_token(refresh_token)
                .with_expires_at(expires_at),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn memory() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new())
    }

    /// Memory storage whose batched writes always fail.
    #[derive(Default)]
    struct ReadOnlyStorage {
        inner: MemoryStorage,
    }

    #[async_trait]
    impl Storage for ReadOnlyStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), Error> {
            self.inner.remove(key).await
        }

        async fn set_many(&self, _writes: &[(&str, Option<&str>)]) -> Result<(), Error> {
            Err(session_error(SessionErrorKind::Storage, "disk full"))
        }

        async fn clear(&self) -> Result<(), Error> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_login_from_anonymous() {
        let manager = Manager::new(memory());
        assert_eq!(manager.state(), AuthState::Anonymous);

        manager.login("tok1", None).await.unwrap();

        assert_eq!(manager.state(), AuthState::Authenticated);
        assert_eq!(manager.get_token().unwrap().expose(), "tok1");
    }

    #[tokio::test]
    async fn test_login_rejects_empty_token() {
        let storage = memory();
        let manager = Manager::new(storage.clone());

        let err = manager.login("", None).await.unwrap_err();

        assert_eq!(err.error_kind, SessionErrorKind::EmptyToken);
        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_persists_and_restore_reads_back() {
        let storage = memory();
        let manager = Manager::new(storage.clone());
        manager.login("tok1", Some("refresh1")).await.unwrap();

        let restored = Manager::restore(storage).await.unwrap();
        let session = restored.session().unwrap();
        assert_eq!(session.token.expose(), "tok1");
        assert_eq!(session.refresh_token.unwrap().expose(), "refresh1");
        assert_eq!(restored.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_restore_without_token_is_anonymous() {
        let manager = Manager::restore(memory()).await.unwrap();
        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(manager.get_token().is_none());
    }

    #[tokio::test]
    async fn test_restore_ignores_empty_persisted_token() {
        let storage = memory();
        storage.set(TOKEN_KEY, "").await.unwrap();
        let manager = Manager::restore(storage).await.unwrap();
        assert_eq!(manager.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_discards_expired_session() {
        let storage = memory();
        storage.set(TOKEN_KEY, "old").await.unwrap();
        storage
            .set(
                EXPIRES_AT_KEY,
                &(Utc::now() - Duration::minutes(1)).to_rfc3339(),
            )
            .await
            .unwrap();
        storage.set("cached_report", "{}").await.unwrap();

        let manager = Manager::restore(storage.clone()).await.unwrap();

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_restore_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"{not json").unwrap();
        let storage = Arc::new(FileStorage::new(&path));

        let manager = Manager::restore(storage.clone()).await.unwrap();

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(!path.exists());

        manager.login("tok1", None).await.unwrap();
        assert_eq!(storage.get(TOKEN_KEY).await.unwrap().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_no_partial_session() {
        let storage = Arc::new(ReadOnlyStorage::default());
        let manager = Manager::new(storage.clone());
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        manager.on_session_start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = manager.login("tok1", Some("refresh1")).await.unwrap_err();

        assert_eq!(err.error_kind, SessionErrorKind::Storage);
        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(storage.get(TOKEN_KEY).await.unwrap().is_none());
        assert!(storage.get(REFRESH_TOKEN_KEY).await.unwrap().is_none());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_without_refresh_token_removes_stale_one() {
        let storage = memory();
        let manager = Manager::new(storage.clone());
        manager.login("tok1", Some("refresh1")).await.unwrap();

        manager.login("tok2", None).await.unwrap();

        assert_eq!(storage.get(TOKEN_KEY).await.unwrap().as_deref(), Some("tok2"));
        assert!(storage.get(REFRESH_TOKEN_KEY).await.unwrap().is_none());
        assert!(storage.get(EXPIRES_AT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_is_anonymous_once_expiry_passes() {
        let storage = memory();
        let manager = Manager::new(storage.clone());
        let token = Token::new("tok1").unwrap();
        manager
            .start_session(
                Session::new(token)
                    .with_expires_at(Some(Utc::now() + Duration::milliseconds(50))),
            )
            .await
            .unwrap();
        assert_eq!(manager.state(), AuthState::Authenticated);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(!manager.is_authenticated());
        assert!(manager.get_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_wipes_whole_namespace() {
        let storage = memory();
        let manager = Manager::new(storage.clone());
        manager.login("tok1", None).await.unwrap();
        storage.set("cached_report", "{}").await.unwrap();

        manager.logout().await.unwrap();

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(manager.get_token().is_none());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_notifies_once() {
        let manager = Manager::new(memory());
        let ended = Arc::new(AtomicUsize::new(0));
        let counter = ended.clone();
        manager.on_session_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.login("tok1", None).await.unwrap();
        manager.logout().await.unwrap();
        manager.logout().await.unwrap();

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_handler_sees_each_logout_once() {
        let manager = Manager::new(memory());
        let reasons = Arc::new(StdMutex::new(Vec::new()));
        for _ in 0..2 {
            let reasons = reasons.clone();
            manager.on_session_end(move |reason| reasons.lock().unwrap().push(reason));
        }

        manager.login("tok1", None).await.unwrap();
        manager.end_session(EndReason::AuthExpired).await.unwrap();
        manager.login("tok2", None).await.unwrap();
        manager.logout().await.unwrap();

        assert_eq!(
            *reasons.lock().unwrap(),
            vec![
                EndReason::AuthExpired,
                EndReason::AuthExpired,
                EndReason::UserLogout,
                EndReason::UserLogout,
            ]
        );
    }

    #[tokio::test]
    async fn test_redundant_login_replaces_token() {
        let manager = Manager::new(memory());
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        manager.on_session_start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.login("tok1", None).await.unwrap();
        manager.login("tok2", None).await.unwrap();

        assert_eq!(manager.state(), AuthState::Authenticated);
        assert_eq!(manager.get_token().unwrap().expose(), "tok2");
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_state_follows_last_lifecycle_call() {
        // (is_login, expected state after the call)
        let sequence = [
            (true, AuthState::Authenticated),
            (false, AuthState::Anonymous),
            (false, AuthState::Anonymous),
            (true, AuthState::Authenticated),
            (true, AuthState::Authenticated),
            (false, AuthState::Anonymous),
            (true, AuthState::Authenticated),
        ];

        let manager = Manager::new(memory());
        for (step, (is_login, expected)) in sequence.iter().enumerate() {
            if *is_login {
                manager.login(&format!("tok{step}"), None).await.unwrap();
            } else {
                manager.logout().await.unwrap();
            }
            assert_eq!(manager.state(), *expected, "after step {step}");
        }
    }

    #[tokio::test]
    async fn test_expired_token_detected_before_use() {
        let storage = memory();
        let manager = Manager::new(storage.clone());
        let reasons = Arc::new(StdMutex::new(Vec::new()));
        let seen = reasons.clone();
        manager.on_session_end(move |reason| seen.lock().unwrap().push(reason));

        let token = Token::new("tok1").unwrap();
        manager
            .start_session(
                Session::new(token).with_expires_at(Some(Utc::now() - Duration::seconds(1))),
            )
            .await
            .unwrap();

        assert!(manager.get_token().is_none());
        let err = manager.token_for_request().await.unwrap_err();

        assert_eq!(err.error_kind, SessionErrorKind::Expired);
        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(storage.is_empty().await);
        assert_eq!(*reasons.lock().unwrap(), vec![EndReason::TokenExpired]);
    }

    #[tokio::test]
    async fn test_end_session_for_superseded_token_is_ignored() {
        let manager = Manager::new(memory());
        manager.login("tok1", None).await.unwrap();
        let old = manager.get_token().unwrap();
        manager.login("tok2", None).await.unwrap();

        let ended = manager
            .end_session_for(&old, EndReason::AuthExpired)
            .await
            .unwrap();

        assert!(!ended);
        assert_eq!(manager.get_token().unwrap().expose(), "tok2");

        let current = manager.get_token().unwrap();
        assert!(manager
            .end_session_for(&current, EndReason::AuthExpired)
            .await
            .unwrap());
        assert_eq!(manager.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_token_for_request_when_anonymous() {
        let manager = Manager::new(memory());
        let err = manager.token_for_request().await.unwrap_err();
        assert_eq!(err.error_kind, SessionErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let manager = Manager::new(memory());
        let mut rx = manager.subscribe();

        manager.login("tok1", None).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());

        manager.logout().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
    }
}

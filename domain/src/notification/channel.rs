//! Live notification channel: the initial fetch, the push connection and the
//! reconciliation of both into one collection.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use events::EndReason;
use futures_util::StreamExt;
use log::*;
use service::config::Config;
use session::{Manager, Token};
use sse::{Backoff, PushEvent, Transport, TransportErrorKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::collection::Collection;
use super::model::Notification;
use crate::error::{Error, InternalErrorKind};
use crate::gateway::NotificationApi;
use crate::signal::{Signal, SignalBus};

/// Timing knobs for a `Channel`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bound on the initial fetch, a refetch and the mark-all-read confirmation.
    pub request_timeout: Duration,
    pub backoff: Backoff,
}

impl ChannelConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            backoff: Backoff::new(
                config.reconnect_base_delay(),
                config.reconnect_max_delay(),
                config.max_reconnect_attempts,
            ),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            backoff: Backoff::default(),
        }
    }
}

/// Keeps the local notification collection in step with the backend.
///
/// A channel is open for exactly one token at a time. Every request and every
/// push is tagged with the token it was issued under, and its result is only
/// applied while that token is still the open one. The collection and the
/// open token are guarded by one lock that is never held across an await.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

/// Non-owning handle, for session callbacks and background tasks.
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<Inner>,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

struct Inner {
    session: Arc<Manager>,
    api: Arc<dyn NotificationApi>,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    signals: SignalBus,
    /// The token the channel is open for. Written only with `state` locked.
    active: watch::Sender<Option<Token>>,
    unread: watch::Sender<usize>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    collection: Collection,
    fetched: bool,
    connection: Option<JoinHandle<()>>,
    fetch: Option<JoinHandle<()>>,
}

impl State {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.connection.take() {
            task.abort();
        }
        if let Some(task) = self.fetch.take() {
            task.abort();
        }
    }
}

fn channel_not_open() -> Error {
    Error::internal(
        InternalErrorKind::ChannelNotOpen,
        "Notification channel is not open",
    )
}

impl Channel {
    pub fn new(
        session: Arc<Manager>,
        api: Arc<dyn NotificationApi>,
        transport: Arc<dyn Transport>,
        signals: SignalBus,
        config: ChannelConfig,
    ) -> Self {
        let (active, _) = watch::channel(None);
        let (unread, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                session,
                api,
                transport,
                config,
                signals,
                active,
                unread,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Open the push connection for `token` and load the collection.
    ///
    /// Opening again with the same token does nothing. Opening with a
    /// different token drops everything tied to the previous one first. Must
    /// be called from within a Tokio runtime.
    pub fn open(&self, token: Token) {
        let mut state = self.lock();
        if self.inner.active.borrow().as_ref() == Some(&token) {
            debug!("Notification channel already open for this session");
            return;
        }

        if self.inner.active.borrow().is_some() {
            info!("Session token changed, resetting notification channel");
            state.abort_tasks();
            state.collection.clear();
            state.fetched = false;
        }

        self.inner.active.send_replace(Some(token.clone()));
        state.connection = Some(tokio::spawn(run_connection(self.downgrade(), token.clone())));
        if !state.fetched {
            state.fetch = Some(self.spawn_fetch(token, false));
        }
        self.inner.unread.send_replace(state.collection.unread_count());
        info!("Notification channel opened");
    }

    /// Stop the push connection, cancel in-flight requests and discard every
    /// notification. Safe to call when already closed.
    pub fn close(&self) {
        let mut state = self.lock();
        state.abort_tasks();
        state.collection.clear();
        state.fetched = false;
        let was_open = self.inner.active.send_replace(None).is_some();
        self.inner.unread.send_replace(0);
        drop(state);

        if was_open {
            info!("Notification channel closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// Apply one pushed event to the open session.
    pub async fn on_push(&self, event: PushEvent) -> Result<(), Error> {
        let token = self.current_token().ok_or_else(channel_not_open)?;
        self.handle_push(&token, event).await
    }

    /// Refetch the collection from the backend. This is the retry affordance
    /// after `Signal::NotificationsFailed`. Returns how many entries were new.
    pub async fn refresh(&self) -> Result<usize, Error> {
        let token = self.current_token().ok_or_else(channel_not_open)?;
        self.fetch(&token, false).await
    }

    /// Mark every local notification read, then confirm with the backend.
    ///
    /// The local change is applied before the request and is kept if the
    /// confirmation fails; the failure is reported through
    /// `Signal::MarkAllReadFailed` and the returned error.
    pub async fn mark_all_read(&self) -> Result<String, Error> {
        let origin = self.current_token().ok_or_else(channel_not_open)?;
        self.authorize(&origin).await?;

        let (token, flipped) = {
            let mut state = self.lock();
            let token = self
                .inner
                .active
                .borrow()
                .clone()
                .ok_or_else(channel_not_open)?;
            let flipped = state.collection.mark_all_read();
            self.inner.unread.send_replace(state.collection.unread_count());
            (token, flipped)
        };
        debug!("Marked {flipped} notifications read locally");

        let result = self
            .bounded(&token, self.inner.api.mark_all_read(&token))
            .await;
        match result {
            Ok(message) => {
                info!("Mark all read confirmed: {message}");
                Ok(message)
            }
            Err(err) => Err(self.report(&token, err, Signal::MarkAllReadFailed).await),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.lock().collection.unread_count()
    }

    /// Snapshot of the collection in arrival order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().collection.to_vec()
    }

    /// Subscribe to the unread count. Updated after every change to the
    /// collection.
    pub fn subscribe_unread(&self) -> watch::Receiver<usize> {
        self.inner.unread.subscribe()
    }

    pub fn signals(&self) -> &SignalBus {
        &self.inner.signals
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_token(&self) -> Option<Token> {
        self.inner.active.borrow().clone()
    }

    fn is_current(&self, origin: &Token) -> bool {
        self.inner.active.borrow().as_ref() == Some(origin)
    }

    /// Apply `f` if `origin` is still the open token, then publish the unread
    /// count.
    fn apply<R>(&self, origin: &Token, f: impl FnOnce(&mut State) -> R) -> Result<R, Error> {
        let mut state = self.lock();
        if !self.is_current(origin) {
            return Err(Error::stale());
        }
        let result = f(&mut state);
        self.inner.unread.send_replace(state.collection.unread_count());
        Ok(result)
    }

    /// Check that `origin` is still the session's live token before it goes on
    /// the wire. A token past its expiry ends the session here, which closes
    /// this channel through the session-end hook.
    async fn authorize(&self, origin: &Token) -> Result<(), Error> {
        let current = self.inner.session.token_for_request().await?;
        if &current != origin {
            return Err(Error::stale());
        }
        Ok(())
    }

    /// Run `request` with the configured timeout, giving up early with a
    /// stale error as soon as `origin` stops being the open token.
    async fn bounded<T>(
        &self,
        origin: &Token,
        request: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let mut active = self.inner.active.subscribe();
        let superseded = async move {
            // An error means the channel itself is gone, which supersedes too.
            let _ = active
                .wait_for(|current| current.as_ref() != Some(origin))
                .await;
        };

        tokio::select! {
            result = tokio::time::timeout(self.inner.config.request_timeout, request) => result?,
            _ = superseded => Err(Error::stale()),
        }
    }

    /// Route a failure: discard it if stale, end the session on an auth
    /// failure, otherwise raise the given signal. Returns the error to hand
    /// back to the caller.
    async fn report(&self, origin: &Token, err: Error, signal: fn(String) -> Signal) -> Error {
        if err.is_stale() || !self.is_current(origin) {
            debug!("Discarding result for a superseded session: {err}");
            return Error::stale();
        }

        if err.is_auth_expired() {
            warn!("Backend rejected the session token: {err}");
            if let Err(end_err) = self
                .inner
                .session
                .end_session_for(origin, EndReason::AuthExpired)
                .await
            {
                error!("Failed to end expired session: {end_err}");
            }
        } else {
            warn!("Notification request failed: {err}");
            self.inner.signals.send(signal(err.to_string()));
        }
        err
    }

    /// Fetch and merge. With `announce`, every appended entry is also raised
    /// as `Signal::NewNotification`.
    async fn fetch(&self, origin: &Token, announce: bool) -> Result<usize, Error> {
        self.authorize(origin).await?;

        let result = self
            .bounded(origin, self.inner.api.fetch_notifications(origin))
            .await
            .and_then(|fetched| {
                self.apply(origin, |state| {
                    let before = state.collection.len();
                    let appended = state.collection.merge(fetched);
                    state.fetched = true;
                    let new: Vec<Notification> =
                        state.collection.iter().skip(before).cloned().collect();
                    (appended, new)
                })
            });

        match result {
            Ok((appended, new)) => {
                debug!("Merged fetched notifications, {appended} new");
                if announce {
                    for notification in new {
                        self.inner.signals.send(Signal::NewNotification(notification));
                    }
                }
                Ok(appended)
            }
            Err(err) => Err(self.report(origin, err, Signal::NotificationsFailed).await),
        }
    }

    fn spawn_fetch(&self, token: Token, announce: bool) -> JoinHandle<()> {
        let channel = self.downgrade();
        tokio::spawn(async move {
            let Some(channel) = channel.upgrade() else {
                return;
            };
            // Failures are already reported through signals.
            let _ = channel.fetch(&token, announce).await;
        })
    }

    async fn handle_push(&self, origin: &Token, event: PushEvent) -> Result<(), Error> {
        match event {
            PushEvent::NewNotification { payload } => {
                match serde_json::from_value::<Notification>(payload) {
                    Ok(notification) => {
                        let appended =
                            self.apply(origin, |state| state.collection.upsert(notification.clone()))?;
                        if appended {
                            debug!("Pushed notification {} appended", notification.id);
                            self.inner.signals.send(Signal::NewNotification(notification));
                        } else {
                            debug!("Pushed notification {} already present", notification.id);
                        }
                    }
                    Err(_) => {
                        debug!("Push payload is not a notification, refetching");
                        self.fetch(origin, true).await?;
                    }
                }
            }
            PushEvent::ForceLogout { reason } => {
                if !self.is_current(origin) {
                    return Err(Error::stale());
                }
                warn!("Server ended the session: {reason}");
                self.inner
                    .session
                    .end_session_for(origin, EndReason::ForcedByServer)
                    .await?;
            }
            PushEvent::KeepAlive => trace!("Push keep-alive"),
            PushEvent::Other { event_type } => debug!("Ignoring push event {event_type}"),
        }
        Ok(())
    }
}

/// Own the push connection for one token until the channel closes, the
/// session moves on, or reconnection gives up.
async fn run_connection(channel: WeakChannel, token: Token) {
    let mut attempts: u32 = 0;
    let mut dropped_before = false;

    loop {
        let Some(strong) = channel.upgrade() else {
            return;
        };
        let backoff = strong.inner.config.backoff.clone();

        // Always reconnect with the token the session holds now.
        match strong.inner.session.token_for_request().await {
            Err(err) => {
                info!("Abandoning push reconnection: {err}");
                strong.close();
                return;
            }
            Ok(current) if current != token => {
                if strong.is_current(&token) {
                    info!("Session token changed, reopening notification channel");
                    strong.open(current);
                }
                return;
            }
            Ok(_) => {}
        }
        if !strong.is_current(&token) {
            return;
        }

        let connected = strong.inner.transport.connect(token.expose());
        drop(strong);

        let mut failure = None;
        match connected {
            Ok(mut stream) => {
                let mut announced = false;
                while let Some(item) = stream.next().await {
                    let Some(strong) = channel.upgrade() else {
                        return;
                    };
                    match item {
                        Ok(event) => {
                            if !announced {
                                announced = true;
                                attempts = 0;
                                info!("Push connection established");
                                strong.inner.signals.send(Signal::ChannelConnected);
                                if dropped_before {
                                    // Catch up on anything pushed while disconnected.
                                    let _ = strong.fetch(&token, true).await;
                                }
                            }
                            let _ = strong.handle_push(&token, event).await;
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }
            Err(err) => failure = Some(err),
        }

        let Some(strong) = channel.upgrade() else {
            return;
        };
        match failure {
            Some(err) if err.is_unauthorized() => {
                let _ = strong
                    .report(&token, err.into(), |_| Signal::ChannelDisconnected)
                    .await;
                return;
            }
            Some(err) if err.error_kind == TransportErrorKind::InvalidUrl => {
                error!("Push endpoint is misconfigured: {err}");
                strong.inner.signals.send(Signal::ChannelDisconnected);
                return;
            }
            Some(err) => warn!("Push connection lost: {err}"),
            None => info!("Push connection closed by server"),
        }
        dropped_before = true;

        if !backoff.should_retry(attempts) {
            error!("Giving up on push connection after {attempts} attempts");
            strong.inner.signals.send(Signal::ChannelDisconnected);
            return;
        }
        attempts += 1;
        let delay = backoff.delay(attempts);
        drop(strong);

        debug!("Reconnecting push channel in {delay:?} (attempt {attempts})");
        tokio::time::sleep(delay).await;
    }
}

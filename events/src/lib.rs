//! Session lifecycle events for the admin dashboard client.
//!
//! This crate lets the session layer announce lifecycle changes without
//! knowing who listens. The notification channel, the signal bus and the host
//! binary all subscribe here.
//!
//! # Architecture
//!
//! - **SessionEvent**: a session started or ended, and why it ended
//! - **EventHandler**: trait for reacting to a session event
//! - **EventPublisher**: fans an event out to every registered handler
//!
//! Handlers run synchronously on the publishing thread, in registration order,
//! so a handler observes the event before the publisher returns. Handlers that
//! need to do I/O spawn it themselves.

use log::*;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The user asked to log out.
    UserLogout,
    /// A backend call rejected the credential (HTTP 401/403).
    AuthExpired,
    /// The locally known expiry passed before the token was used.
    TokenExpired,
    /// The server pushed a `force_logout` event.
    ForcedByServer,
}

impl EndReason {
    /// True when the user did not ask for the session to end and should be told.
    pub fn is_involuntary(&self) -> bool {
        !matches!(self, EndReason::UserLogout)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EndReason::UserLogout => write!(f, "user logout"),
            EndReason::AuthExpired => write!(f, "authentication expired"),
            EndReason::TokenExpired => write!(f, "token expired"),
            EndReason::ForcedByServer => write!(f, "forced by server"),
        }
    }
}

/// Lifecycle events emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A token was stored, either fresh or replacing a previous one.
    Started,
    /// The session transitioned from authenticated to anonymous.
    Ended { reason: EndReason },
}

/// Trait for handling session events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SessionEvent);
}

/// Closures are handlers too, which keeps one-off subscriptions short.
impl<F> EventHandler for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn handle(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Publishes session events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone, Default)]
pub struct EventPublisher {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Every clone of this publisher shares the registration.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(handler);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Publish an event to all registered handlers.
    ///
    /// The handler list is snapshotted first so a handler may subscribe further
    /// handlers without deadlocking; those only see later events.
    pub fn publish(&self, event: SessionEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        debug!("Publishing {event:?} to {} handler(s)", handlers.len());

        for handler in handlers {
            handler.handle(&event);
        }
    }
}

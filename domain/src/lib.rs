//! This module re-exports the session and event types callers of the `domain`
//! crate need, so the host binary does not have to depend on the `session`
//! crate directly.
//!
//! The `domain` crate ties the session layer and the push transport to the
//! REST backend:
//!
//! - `gateway`: the HTTP client and the backend endpoints
//! - `notification`: the local collection and the live `Channel`
//! - `oauth`: completing a login from an OAuth redirect
//! - `signal`: user-facing signals the dashboard reacts to
//! - `app`: wires the pieces together for a running dashboard client
pub use events::EndReason;
pub use session::{AuthState, Session, Token};

pub use notification::{Channel, ChannelConfig, Collection, Notification, NotificationId};

pub mod app;
pub mod error;
pub mod gateway;
pub mod notification;
pub mod oauth;
pub mod signal;

pub use app::App;
pub use signal::{Signal, SignalBus};

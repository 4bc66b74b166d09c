//! # session
//!
//! Single source of truth for "is the user authenticated" on the dashboard
//! client, and the only writer of the persisted credential.
//!
//! - `Token`: a non-empty, redacted bearer credential
//! - `Session`: the token plus its optional refresh token and expiry
//! - `storage`: the durable key/value namespace that survives restarts
//! - `Manager`: the two-state (`Anonymous` / `Authenticated`) lifecycle with
//!   start and end subscriptions
//!
//! ```rust,ignore
//! use session::{storage::FileStorage, Manager};
//!
//! let manager = Manager::restore(Arc::new(FileStorage::new(path))).await?;
//! manager.on_session_end(|reason| log::info!("session ended: {reason}"));
//! manager.login("tok1", None).await?;
//! ```

pub mod error;
pub mod manager;
pub mod storage;
pub mod token;

pub use error::{Error, SessionErrorKind};
pub use manager::{AuthState, Manager};
pub use storage::Storage;
pub use token::{Session, Token};

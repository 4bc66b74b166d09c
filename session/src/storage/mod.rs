//! Durable client-side key/value storage.
//!
//! One namespace per user profile. The session manager writes the credential
//! under [`TOKEN_KEY`]; other components may cache user-scoped values under
//! their own keys. Logging out clears the whole namespace, so anything stored
//! here is session-scoped by definition.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::error::Error;

/// Key holding the bearer token.
pub const TOKEN_KEY: &str = "token";
/// Key holding the refresh token, when the backend issued one.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Key holding the RFC 3339 expiry of the bearer token, when known.
pub const EXPIRES_AT_KEY: &str = "token_expires_at";

/// Trait for the durable key/value namespace.
///
/// Implementations must make `clear` remove every key, not only the ones the
/// session manager wrote.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value, `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Remove a single key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), Error>;

    /// Apply several writes as one operation: `Some` sets a key, `None`
    /// removes it. Either every write lands or none does.
    async fn set_many(&self, writes: &[(&str, Option<&str>)]) -> Result<(), Error>;

    /// Wipe the entire namespace.
    async fn clear(&self) -> Result<(), Error>;
}

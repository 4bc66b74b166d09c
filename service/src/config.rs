use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default REST backend root used when `API_BASE_URL` is not set.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Path appended to the API base URL when no explicit push URL is configured.
const DEFAULT_PUSH_PATH: &str = "/notifications/stream";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the REST backend (e.g. http://localhost:8000).
    #[arg(long, env, default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// Full URL of the push notification endpoint. Derived from the API base URL
    /// when not provided.
    #[arg(long, env)]
    push_url: Option<String>,

    /// File holding the durable client-side storage namespace. Logging out wipes
    /// every key stored in it.
    #[arg(long, env, default_value = "agrodash-storage.json")]
    storage_path: PathBuf,

    /// Upper bound in seconds for any single REST round trip (login, initial
    /// notification fetch, mark-all-read confirmation).
    #[arg(long, env, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Number of times a transient HTTP failure is retried by the client middleware.
    #[arg(long, env, default_value_t = 2)]
    pub http_max_retries: u32,

    /// Delay in milliseconds before the first push reconnection attempt.
    #[arg(long, env, default_value_t = 500)]
    pub reconnect_base_delay_ms: u64,

    /// Cap in seconds on the exponential reconnection delay.
    #[arg(long, env, default_value_t = 30)]
    pub reconnect_max_delay_secs: u64,

    /// Consecutive failed reconnection attempts before the disconnect is surfaced.
    #[arg(long, env, default_value_t = 10)]
    pub max_reconnect_attempts: u32,

    /// Email used to log in at boot when no session has been persisted.
    #[arg(long, env)]
    login_email: Option<String>,

    /// Password used together with `login_email`.
    #[arg(long, env, hide_env_values = true)]
    login_password: Option<String>,

    /// OAuth redirect URL (carrying `access_token`) to complete at boot.
    #[arg(long, env)]
    oauth_callback_url: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Returns the push endpoint, falling back to `<api_base_url>/notifications/stream`.
    pub fn push_url(&self) -> String {
        self.push_url
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.api_base_url(), DEFAULT_PUSH_PATH))
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    /// Returns the boot credentials when both email and password are configured.
    pub fn login_credentials(&self) -> Option<(String, String)> {
        match (&self.login_email, &self.login_password) {
            (Some(email), Some(password)) => Some((email.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn oauth_callback_url(&self) -> Option<String> {
        self.oauth_callback_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["agrodash"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn test_push_url_derived_from_api_base_url() {
        let config = parse(&["--api-base-url", "https://admin.example.com/api/"]);
        assert_eq!(config.api_base_url(), "https://admin.example.com/api");
        assert_eq!(
            config.push_url(),
            "https://admin.example.com/api/notifications/stream"
        );
    }

    #[test]
    fn test_explicit_push_url_wins() {
        let config = parse(&["--push-url", "wss://push.example.com/live"]);
        assert_eq!(config.push_url(), "wss://push.example.com/live");
    }

    #[test]
    fn test_login_credentials_require_both_values() {
        let config = parse(&["--login-email", "admin@example.com"]);
        assert!(config.login_credentials().is_none());

        let config = parse(&[
            "--login-email",
            "admin@example.com",
            "--login-password",
            "secret",
        ]);
        assert_eq!(
            config.login_credentials(),
            Some(("admin@example.com".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_durations() {
        let config = parse(&[
            "--request-timeout-secs",
            "3",
            "--reconnect-base-delay-ms",
            "250",
            "--reconnect-max-delay-secs",
            "7",
        ]);
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.reconnect_base_delay(), Duration::from_millis(250));
        assert_eq!(config.reconnect_max_delay(), Duration::from_secs(7));
    }

    #[test]
    fn test_log_level_parsing() {
        let config = parse(&["--log-level-filter", "DEBUG"]);
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }
}

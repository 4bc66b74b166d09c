use domain::{App, AuthState, Signal};
use log::*;
use service::{config::Config, logging::Logger};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!("Starting dashboard client for [{}]...", config.api_base_url());

    let app = match App::boot(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start dashboard client: {e}");
            std::process::exit(1);
        }
    };

    let mut signals = app.subscribe_signals();
    let mut unread = app.channel().subscribe_unread();

    if app.session().state() == AuthState::Anonymous && !sign_in(&app, &config).await {
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            signal = signals.recv() => match signal {
                Ok(Signal::RedirectToLogin) => {
                    warn!("Session ended, login required");
                    if !sign_in(&app, &config).await {
                        break;
                    }
                }
                Ok(signal) => log_signal(&signal),
                Err(RecvError::Lagged(missed)) => warn!("Missed {missed} signals"),
                Err(RecvError::Closed) => break,
            },
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                info!("Unread notifications: {count}");
            }
        }
    }

    app.shutdown();
}

/// Start a session from the configured OAuth redirect or credentials.
async fn sign_in(app: &App, config: &Config) -> bool {
    let result = if let Some(redirect_url) = config.oauth_callback_url() {
        info!("Completing OAuth login");
        app.complete_oauth(&redirect_url).await
    } else if let Some((email, password)) = config.login_credentials() {
        app.login(&email, &password).await
    } else {
        warn!("No persisted session and no credentials configured (set LOGIN_EMAIL and LOGIN_PASSWORD or OAUTH_CALLBACK_URL)");
        return false;
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Login failed: {e}");
            false
        }
    }
}

fn log_signal(signal: &Signal) {
    match signal {
        Signal::NewNotification(notification) => {
            info!("New notification: {}", notification.message)
        }
        Signal::NotificationsFailed(message) => {
            warn!("Could not load notifications: {message}")
        }
        Signal::MarkAllReadFailed(message) => {
            warn!("Could not confirm mark all read: {message}")
        }
        Signal::SessionExpired(reason) => warn!("Your session has expired ({reason})"),
        Signal::RedirectToLogin => info!("Redirecting to login"),
        Signal::ChannelConnected => info!("Live notifications connected"),
        Signal::ChannelDisconnected => {
            error!("Live notifications unavailable, reconnection gave up")
        }
    }
}

//! User-facing signals the dashboard UI reacts to.

use events::EndReason;
use log::*;
use tokio::sync::broadcast;

use crate::notification::Notification;

/// Something the UI should show or do. Failures of background operations
/// arrive here instead of as return values.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A push delivered a notification not seen before.
    NewNotification(Notification),
    /// Fetching the notification list failed. The list stays as it was.
    NotificationsFailed(String),
    /// The server did not confirm mark-all-read. The local read state stays.
    MarkAllReadFailed(String),
    /// The session ended without the user asking for it.
    SessionExpired(EndReason),
    /// Navigate to the login page.
    RedirectToLogin,
    ChannelConnected,
    /// The push connection is gone and reconnection gave up.
    ChannelDisconnected,
}

/// Fan-out of `Signal`s to any number of listeners.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Publish a signal. Having nobody listening is not an error.
    pub fn send(&self, signal: Signal) {
        trace!("Signal: {signal:?}");
        if self.sender.send(signal).is_err() {
            trace!("No signal listeners");
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_signal() {
        let bus = SignalBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.send(Signal::RedirectToLogin);

        assert_eq!(first.recv().await.unwrap(), Signal::RedirectToLogin);
        assert_eq!(second.recv().await.unwrap(), Signal::RedirectToLogin);
    }

    #[test]
    fn test_send_without_listeners() {
        SignalBus::default().send(Signal::ChannelConnected);
    }
}

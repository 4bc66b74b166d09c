use std::pin::Pin;

use eventsource_client::{self as es, Client};
use futures_util::stream::{Stream, StreamExt};
use log::*;

use crate::error::{Error, TransportErrorKind};
use crate::message::PushEvent;

/// Live stream of decoded push frames. Ends when the connection closes; an
/// `Err` item is always the last one.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushEvent, Error>> + Send>>;

/// A persistent server-to-client channel authenticated at handshake time.
///
/// Implementations do not reconnect on their own; the caller owns the
/// reconnection policy so it can re-read the current token on every attempt.
pub trait Transport: Send + Sync {
    fn connect(&self, token: &str) -> Result<PushStream, Error>;
}

/// `Transport` over Server-Sent Events with a bearer `Authorization` header.
pub struct EventSourceTransport {
    url: String,
}

impl EventSourceTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn invalid_url(err: es::Error) -> Error {
    Error {
        source: Some(Box::new(err)),
        error_kind: TransportErrorKind::InvalidUrl,
    }
}

impl Transport for EventSourceTransport {
    fn connect(&self, token: &str) -> Result<PushStream, Error> {
        let client = es::ClientBuilder::for_url(&self.url)
            .map_err(invalid_url)?
            .header("Authorization", &format!("Bearer {token}"))
            .map_err(invalid_url)?
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();

        let url = self.url.clone();
        let stream = async_stream::stream! {
            let mut frames = client.stream();

            loop {
                match frames.next().await {
                    Some(Ok(es::SSE::Event(event))) => {
                        trace!("SSE event {} from {}", event.event_type, url);
                        yield Ok(PushEvent::decode(&event.event_type, &event.data));
                    }
                    Some(Ok(es::SSE::Comment(_))) => {
                        yield Ok(PushEvent::KeepAlive);
                    }
                    Some(Err(err)) => {
                        warn!("SSE error for {}: {}", url, err);
                        yield Err(Error::from(err));
                        break;
                    }
                    None => {
                        debug!("SSE stream ended for {}", url);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

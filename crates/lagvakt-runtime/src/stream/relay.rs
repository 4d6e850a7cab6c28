//! Idle keep-alive and fault containment for an event stream.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::time::Duration;

use super::{RelayFrame, StreamEvent, StreamFault};
use crate::config::{MessageTemplates, RelayConfig};

/// What a producer hands to the relay.
pub type EventStream = BoxStream<'static, Result<StreamEvent, StreamFault>>;

/// Wraps a producer's events for delivery over a long-lived connection.
///
/// Each wait for the next event is bounded by `idle_timeout`. On expiry a
/// [`RelayFrame::KeepAlive`] is emitted and the wait starts over, for as long
/// as the producer stays open. A fault ends the output with exactly one
/// error event. Dropping the output drops the producer stream with it.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    idle_timeout: Duration,
    messages: MessageTemplates,
}

struct RelayState<S> {
    events: std::pin::Pin<Box<S>>,
    idle_timeout: Duration,
    messages: MessageTemplates,
}

impl StreamRelay {
    /// Create a relay. A zero idle timeout falls back to the configured default.
    pub fn new(idle_timeout: Duration, messages: MessageTemplates) -> Self {
        let idle_timeout = if idle_timeout.is_zero() {
            let fallback = RelayConfig::default().idle_timeout;
            tracing::warn!(fallback = ?fallback, "idle_timeout of 0 requested, using default");
            fallback
        } else {
            idle_timeout
        };

        Self {
            idle_timeout,
            messages,
        }
    }

    pub fn from_config(relay: &RelayConfig, messages: &MessageTemplates) -> Self {
        Self::new(relay.idle_timeout, messages.clone())
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Relay `events` until the producer finishes or faults.
    pub fn relay<S>(&self, events: S) -> impl Stream<Item = RelayFrame> + Send + 'static
    where
        S: Stream<Item = Result<StreamEvent, StreamFault>> + Send + 'static,
    {
        let state = RelayState {
            events: Box::pin(events),
            idle_timeout: self.idle_timeout,
            messages: self.messages.clone(),
        };

        futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;

            match tokio::time::timeout(state.idle_timeout, state.events.next()).await {
                Err(_) => {
                    tracing::trace!(idle_timeout = ?state.idle_timeout, "Producer idle, sending keep-alive");
                    Some((RelayFrame::KeepAlive, Some(state)))
                }
                Ok(Some(Ok(event))) => Some((RelayFrame::Event(event), Some(state))),
                Ok(Some(Err(fault))) => {
                    tracing::error!(error = %fault, "Event producer faulted, closing stream");
                    let message = fault.safe_message(&state.messages);
                    Some((RelayFrame::Event(StreamEvent::Error { message }), None))
                }
                Ok(None) => {
                    tracing::debug!("Event producer finished");
                    None
                }
            }
        })
    }
}

//! Keep-alive event streaming.
//!
//! The orchestrator's producer task emits [`StreamEvent`]s or a
//! [`StreamFault`]; [`StreamRelay`] turns that into a sequence of
//! [`RelayFrame`]s with liveness markers during silence and a single safe
//! error event in place of any fault.

use thiserror::Error;

use crate::config::MessageTemplates;
use crate::generation::GenerationError;

mod event;
mod relay;

pub use event::{RelayFrame, StreamEvent};
pub use relay::{EventStream, StreamRelay};

/// A failure inside the event producer.
///
/// Never shown to clients; the relay logs it and sends a templated message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamFault {
    #[error("Event producer panicked: {0}")]
    Panicked(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Internal stream error: {0}")]
    Internal(String),
}

impl StreamFault {
    /// The client-facing message for this fault.
    pub fn safe_message(&self, messages: &MessageTemplates) -> String {
        match self {
            StreamFault::Generation(_) => messages.unavailable.clone(),
            StreamFault::Retrieval(_) => messages.retrieval_failure.clone(),
            StreamFault::Panicked(_) | StreamFault::Internal(_) => messages.stream_failure.clone(),
        }
    }
}

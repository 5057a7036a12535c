//! Error types for the event bus
//!
//! Handler failures are captured per handler as [`HandlerError`] values and
//! only resurface, grouped per event instance, when a caller awaits the
//! instances with [`crate::EventBus::once`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

use crate::types::{EventKind, EventRef};

/// Error raised by a single handler for a single event instance.
///
/// Cloneable so every caller awaiting the same instance observes the same
/// errors.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Handler reported a failure
    #[error("{0}")]
    Failed(String),

    /// Handler failed with an underlying error
    #[error(transparent)]
    Source(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Handler task was cancelled before it completed (runtime shutdown)
    #[error("Handler task cancelled")]
    Cancelled,

    /// Handler received an instance of another kind
    #[error("Handler for {expected} received an event of another kind")]
    KindMismatch {
        /// Kind the handler was registered for
        expected: EventKind,
    },
}

impl HandlerError {
    /// Failure described by a message.
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Failure wrapping an underlying error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HandlerError::Source(Arc::new(error))
    }

    fn panic_message(payload: Box<dyn Any + Send>) -> String {
        match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        }
    }
}

impl From<JoinError> for HandlerError {
    fn from(error: JoinError) -> Self {
        if error.is_panic() {
            HandlerError::Panicked(Self::panic_message(error.into_panic()))
        } else {
            HandlerError::Cancelled
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::new(error)
    }
}

/// Result type returned by handlers.
pub type HandlerResult<T = serde_json::Value> = Result<T, HandlerError>;

/// Errors raised by the handlers of one event instance.
#[derive(Debug, Clone)]
pub struct EventFailure {
    /// The affected instance
    pub event: EventRef,
    /// One error per failing handler
    pub errors: Vec<HandlerError>,
}

/// Aggregated handler failures across every instance awaited by one
/// [`crate::EventBus::once`] call.
#[derive(Debug, Clone, Error)]
#[error("Handlers failed for {} event(s): {}", .failures.len(), summarize(.failures))]
pub struct HandlerFailures {
    /// One group per affected instance
    pub failures: Vec<EventFailure>,
}

impl HandlerFailures {
    /// Total number of failing handler invocations.
    pub fn error_count(&self) -> usize {
        self.failures.iter().map(|failure| failure.errors.len()).sum()
    }

    /// Errors raised for one instance, if it failed.
    pub fn errors_for(&self, event: &EventRef) -> Option<&[HandlerError]> {
        self.failures
            .iter()
            .find(|failure| failure.event == *event)
            .map(|failure| failure.errors.as_slice())
    }
}

fn summarize(failures: &[EventFailure]) -> String {
    failures
        .iter()
        .flat_map(|failure| {
            failure
                .errors
                .iter()
                .map(move |error| format!("{} ({})", failure.event.kind, error))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Event bus error types.
#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    /// At least one handler failed for the awaited instances
    #[error(transparent)]
    HandlersFailed(#[from] HandlerFailures),

    /// Instances were still pending when the caller's deadline elapsed
    #[error("Timed out after {waited:?} with {} event(s) still pending", .pending.len())]
    Timeout {
        /// How long the caller waited
        waited: Duration,
        /// Instances still pending at the deadline
        pending: Vec<EventRef>,
    },
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

impl EventBusError {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            EventBusError::HandlersFailed(_) => 500,
            EventBusError::Timeout { .. } => 504,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            EventBusError::HandlersFailed(_) => "EVENT_HANDLERS_FAILED",
            EventBusError::Timeout { .. } => "EVENT_BUS_TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event_ref(kind: EventKind) -> EventRef {
        EventRef {
            id: Uuid::now_v7(),
            kind,
        }
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::msg("contact rejected").to_string(), "contact rejected");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        assert_eq!(HandlerError::new(io).to_string(), "connection reset");

        let mismatch = HandlerError::KindMismatch {
            expected: EventKind::Login,
        };
        assert!(mismatch.to_string().contains("user.login"));
    }

    #[test]
    fn test_handler_failures_lookup() {
        let login = event_ref(EventKind::Login);
        let update = event_ref(EventKind::UserUpdated);
        let failures = HandlerFailures {
            failures: vec![
                EventFailure {
                    event: login,
                    errors: vec![HandlerError::msg("a"), HandlerError::msg("b")],
                },
                EventFailure {
                    event: update,
                    errors: vec![HandlerError::msg("c")],
                },
            ],
        };

        assert_eq!(failures.error_count(), 3);
        assert_eq!(failures.errors_for(&login).map(<[_]>::len), Some(2));
        assert!(failures.errors_for(&event_ref(EventKind::PollCreated)).is_none());

        let message = failures.to_string();
        assert!(message.starts_with("Handlers failed for 2 event(s)"));
        assert!(message.contains("user.updated (c)"));
    }

    #[test]
    fn test_status_codes() {
        let failed = EventBusError::from(HandlerFailures { failures: vec![] });
        assert_eq!(failed.status_code(), 500);
        assert_eq!(failed.error_code(), "EVENT_HANDLERS_FAILED");

        let timeout = EventBusError::Timeout {
            waited: Duration::from_millis(50),
            pending: vec![event_ref(EventKind::GroupDeleted)],
        };
        assert_eq!(timeout.status_code(), 504);
        assert_eq!(timeout.error_code(), "EVENT_BUS_TIMEOUT");
        assert!(timeout.to_string().contains("1 event(s) still pending"));
    }
}

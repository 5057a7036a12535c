//! Handler settlements and their aggregation per event instance.

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::error::{EventBusResult, EventFailure, HandlerError, HandlerFailures};
use crate::types::EventRef;

/// Identity of a registered handler, reported alongside its settlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerRef {
    /// Subscription id returned at registration
    pub subscription_id: Uuid,
    /// Handler name (its Rust type name unless set explicitly)
    pub name: String,
}

/// How one handler invocation ended.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Handler resolved with a value
    Succeeded {
        handler: HandlerRef,
        result: serde_json::Value,
    },
    /// Handler failed, panicked or was cancelled
    Failed {
        handler: HandlerRef,
        error: HandlerError,
    },
}

impl Settlement {
    /// The handler that produced this settlement.
    pub fn handler(&self) -> &HandlerRef {
        match self {
            Settlement::Succeeded { handler, .. } | Settlement::Failed { handler, .. } => handler,
        }
    }

    /// Whether the handler failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Settlement::Failed { .. })
    }
}

/// Every settlement recorded for one instance, in completion order.
///
/// Never represents a failure by itself: failures are data inside it.
pub type Outcome = Arc<[Settlement]>;

pub(crate) type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// Latest aggregate started for one instance, shared by every clone of its
/// envelope so it stays reachable after the bus stops tracking it.
#[derive(Clone, Default)]
pub(crate) struct OutcomeSlot(Arc<Mutex<Option<SharedOutcome>>>);

impl OutcomeSlot {
    pub(crate) fn get(&self) -> Option<SharedOutcome> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set(&self, outcome: SharedOutcome) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }
}

/// Awaitable handle on one emitted instance, obtained from
/// [`crate::Envelope::handle`].
///
/// Instances of different kinds can be awaited together by passing their
/// handles to [`crate::EventBus::once`]. The handle keeps the instance's
/// outcome alive, so awaiting it after every handler settled still reports
/// their results and failures.
#[derive(Clone)]
pub struct EventHandle {
    event: EventRef,
    slot: OutcomeSlot,
}

impl EventHandle {
    pub(crate) fn new(event: EventRef, slot: OutcomeSlot) -> Self {
        Self { event, slot }
    }

    /// The instance this handle refers to.
    pub fn event(&self) -> EventRef {
        self.event
    }

    pub(crate) fn outcome(&self) -> Option<SharedOutcome> {
        self.slot.get()
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("event", &self.event)
            .field("emitted", &self.slot.get().is_some())
            .finish()
    }
}

/// A successful handler invocation returned by `once`.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerSuccess {
    /// Handler that succeeded
    pub handler: HandlerRef,
    /// Value it resolved with
    pub result: serde_json::Value,
}

/// Successful results for one awaited instance.
#[derive(Debug, Clone, Serialize)]
pub struct EventResults {
    /// The awaited instance
    pub event: EventRef,
    /// One entry per handler, in completion order
    pub results: Vec<HandlerSuccess>,
}

/// Split settlements into per-instance results, or the aggregated failures
/// when any handler of any instance failed.
pub(crate) fn into_results(outcomes: Vec<(EventRef, Outcome)>) -> EventBusResult<Vec<EventResults>> {
    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for (event, outcome) in outcomes {
        let mut successes = Vec::new();
        let mut errors = Vec::new();

        for settlement in outcome.iter() {
            match settlement {
                Settlement::Succeeded { handler, result } => successes.push(HandlerSuccess {
                    handler: handler.clone(),
                    result: result.clone(),
                }),
                Settlement::Failed { error, .. } => errors.push(error.clone()),
            }
        }

        if !errors.is_empty() {
            failures.push(EventFailure { event, errors });
        }
        results.push(EventResults {
            event,
            results: successes,
        });
    }

    if failures.is_empty() {
        Ok(results)
    } else {
        Err(HandlerFailures { failures }.into())
    }
}

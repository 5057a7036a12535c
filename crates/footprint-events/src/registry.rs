//! Handler registry
//!
//! Maps each [`EventKind`] to the handlers subscribed to it. Handlers are
//! typed over one payload and erased at registration; the registry keys
//! them by `E::KIND`, so an erased handler only ever receives envelopes of
//! its own payload type.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use uuid::Uuid;

use crate::error::{HandlerError, HandlerResult};
use crate::outcome::HandlerRef;
use crate::types::{Envelope, Event, EventKind};

/// Id generated for every registration.
pub type SubscriptionId = Uuid;

pub(crate) type ErasedEvent = Arc<dyn Any + Send + Sync>;

type ErasedHandler = Arc<dyn Fn(ErasedEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A handler as stored in the registry.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) handler: HandlerRef,
    call: ErasedHandler,
}

impl Registration {
    /// Start the handler on an erased envelope.
    pub(crate) fn invoke(&self, event: ErasedEvent) -> BoxFuture<'static, HandlerResult> {
        (self.call)(event)
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<EventKind, BTreeMap<SubscriptionId, Registration>>>,
}

impl Registry {
    /// Store a typed handler under `E::KIND`.
    pub(crate) fn insert<E, F, Fut, R>(&self, name: String, handler: F) -> HandlerRef
    where
        E: Event,
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler_ref = HandlerRef {
            subscription_id: Uuid::now_v7(),
            name,
        };

        let call: ErasedHandler = Arc::new(
            move |event: ErasedEvent| -> BoxFuture<'static, HandlerResult> {
                match event.downcast::<Envelope<E>>() {
                    Ok(envelope) => {
                        let pending = handler(Envelope::clone(&envelope));
                        async move {
                            let value = pending.await?;
                            Ok::<_, HandlerError>(serde_json::to_value(value)?)
                        }
                        .boxed()
                    }
                    Err(_) => futures::future::ready(Err(HandlerError::KindMismatch {
                        expected: E::KIND,
                    }))
                    .boxed(),
                }
            },
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(E::KIND).or_default().insert(
            handler_ref.subscription_id,
            Registration {
                handler: handler_ref.clone(),
                call,
            },
        );

        handler_ref
    }

    /// Remove one registration. Returns `false` when it was already gone.
    pub(crate) fn remove(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = entries.get_mut(&kind) else {
            return false;
        };
        let removed = handlers.remove(&id).is_some();
        if handlers.is_empty() {
            entries.remove(&kind);
        }
        removed
    }

    /// Handlers registered for `kind` at this instant.
    pub(crate) fn snapshot(&self, kind: EventKind) -> Vec<Registration> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&kind)
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of registrations across kinds.
    pub(crate) fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(BTreeMap::len).sum()
    }
}

/// Handle returned by [`crate::EventBus::on`] that removes its registration.
///
/// Dropping the handle leaves the subscription in place; subscriptions live
/// for the life of the bus unless explicitly removed.
#[derive(Clone)]
pub struct Unsubscribe {
    kind: EventKind,
    handler: HandlerRef,
    registry: Weak<Registry>,
}

impl Unsubscribe {
    pub(crate) fn new(kind: EventKind, handler: HandlerRef, registry: &Arc<Registry>) -> Self {
        Self {
            kind,
            handler,
            registry: Arc::downgrade(registry),
        }
    }

    /// Remove the registration.
    ///
    /// Returns `true` the first time; later calls are no-ops returning
    /// `false`. Other registrations, including other registrations of the
    /// same handler function, are untouched.
    pub fn unsubscribe(&self) -> bool {
        let removed = self
            .registry
            .upgrade()
            .map(|registry| registry.remove(self.kind, self.handler.subscription_id))
            .unwrap_or(false);

        if removed {
            tracing::debug!(
                event_kind = %self.kind,
                handler = %self.handler.name,
                subscription_id = %self.handler.subscription_id,
                "Handler unsubscribed"
            );
        }
        removed
    }

    /// Id of the registration.
    pub fn id(&self) -> SubscriptionId {
        self.handler.subscription_id
    }

    /// Kind the handler is registered for.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Registered handler.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("kind", &self.kind)
            .field("handler", &self.handler)
            .finish()
    }
}

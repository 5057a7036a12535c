//! Subscription of the sync handlers at process startup.

use footprint_events::{
    Envelope, Event, EventBus, GroupDeletedEvent, GroupUpdatedEvent, HandlerResult, LoginEvent,
    OrganisationCreatedEvent, OrganisationUpdatedEvent, PollDeletedEvent, PollUpdatedEvent,
    SimulationUpsertedEvent, Unsubscribe, UserUpdatedEvent, VerificationCodeCreatedEvent,
};
use std::future::Future;
use std::sync::Arc;

use crate::handlers::SyncHandlers;
use crate::stats::StatsScope;

/// Subscribe every sync handler to `bus`.
///
/// CRM handlers are only registered when CRM sync is enabled. The returned
/// handles can be used to unsubscribe, dropping them keeps the handlers
/// registered.
pub fn register_handlers<B: EventBus>(bus: &B, handlers: Arc<SyncHandlers>) -> Vec<Unsubscribe> {
    let mut subscriptions = Vec::new();

    if handlers.config().crm_enabled {
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.sync_login",
            |h: Arc<SyncHandlers>, event: Envelope<LoginEvent>| async move {
                h.sync_login(event).await
            },
        ));
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.sync_user",
            |h: Arc<SyncHandlers>, event: Envelope<UserUpdatedEvent>| async move {
                h.sync_user(event).await
            },
        ));
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.send_verification_code",
            |h: Arc<SyncHandlers>, event: Envelope<VerificationCodeCreatedEvent>| async move {
                h.send_verification_code(event).await
            },
        ));
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.sync_simulation",
            |h: Arc<SyncHandlers>, event: Envelope<SimulationUpsertedEvent>| async move {
                h.sync_simulation_contact(event).await
            },
        ));
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.sync_organisation_created",
            |h: Arc<SyncHandlers>, event: Envelope<OrganisationCreatedEvent>| async move {
                h.sync_organisation_created(event).await
            },
        ));
        subscriptions.push(subscribe(
            bus,
            &handlers,
            "crm.sync_organisation_updated",
            |h: Arc<SyncHandlers>, event: Envelope<OrganisationUpdatedEvent>| async move {
                h.sync_organisation_updated(event).await
            },
        ));
    } else {
        tracing::info!("CRM sync disabled, CRM handlers not registered");
    }

    subscriptions.push(subscribe(
        bus,
        &handlers,
        "stats.record_simulation",
        |h: Arc<SyncHandlers>, event: Envelope<SimulationUpsertedEvent>| async move {
            h.record_simulation_stats(event).await
        },
    ));
    subscriptions.push(subscribe(
        bus,
        &handlers,
        "stats.invalidate_poll_updated",
        |h: Arc<SyncHandlers>, event: Envelope<PollUpdatedEvent>| async move {
            h.invalidate_stats(StatsScope::Poll(event.poll.id)).await
        },
    ));
    subscriptions.push(subscribe(
        bus,
        &handlers,
        "stats.invalidate_poll_deleted",
        |h: Arc<SyncHandlers>, event: Envelope<PollDeletedEvent>| async move {
            h.invalidate_stats(StatsScope::Poll(event.poll.id)).await
        },
    ));
    subscriptions.push(subscribe(
        bus,
        &handlers,
        "stats.invalidate_group_updated",
        |h: Arc<SyncHandlers>, event: Envelope<GroupUpdatedEvent>| async move {
            h.invalidate_stats(StatsScope::Group(event.group.id)).await
        },
    ));
    subscriptions.push(subscribe(
        bus,
        &handlers,
        "stats.invalidate_group_deleted",
        |h: Arc<SyncHandlers>, event: Envelope<GroupDeletedEvent>| async move {
            h.invalidate_stats(StatsScope::Group(event.group.id)).await
        },
    ));

    tracing::info!(
        handlers = subscriptions.len(),
        crm_enabled = handlers.config().crm_enabled,
        "Sync handlers registered"
    );

    subscriptions
}

fn subscribe<B, E, F, Fut>(
    bus: &B,
    handlers: &Arc<SyncHandlers>,
    name: &'static str,
    handler: F,
) -> Unsubscribe
where
    B: EventBus,
    E: Event,
    F: Fn(Arc<SyncHandlers>, Envelope<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let handlers = Arc::clone(handlers);
    bus.on_named(name, move |event: Envelope<E>| {
        handler(Arc::clone(&handlers), event)
    })
}

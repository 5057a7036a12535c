//! Event handlers keeping the CRM and poll/group stats in sync.
//!
//! Each handler reacts to one event payload and resolves with a small JSON
//! summary of what it did, which request handlers can surface after
//! awaiting the event.

use footprint_events::{
    Envelope, HandlerError, HandlerResult, LoginEvent, OrganisationCreatedEvent,
    OrganisationSummary, OrganisationUpdatedEvent, SimulationUpsertedEvent, UserRef,
    UserUpdatedEvent, VerificationCodeCreatedEvent,
};
use serde_json::json;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::crm::{ContactAttributes, ContactUpsert, CrmClient, CrmError, TransactionalEmail};
use crate::retry::with_retry_if;
use crate::stats::{StatsScope, StatsStore};

/// Handlers shared by every subscription registered at bootstrap.
pub struct SyncHandlers {
    crm: Arc<dyn CrmClient>,
    stats: Arc<dyn StatsStore>,
    config: SyncConfig,
}

impl std::fmt::Debug for SyncHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandlers")
            .field("config", &self.config)
            .finish()
    }
}

impl SyncHandlers {
    /// Create handlers over the given collaborators.
    pub fn new(crm: Arc<dyn CrmClient>, stats: Arc<dyn StatsStore>, config: SyncConfig) -> Self {
        Self { crm, stats, config }
    }

    /// Current configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Record the sign-in on the user's contact.
    pub async fn sync_login(&self, event: Envelope<LoginEvent>) -> HandlerResult {
        let Some(email) = event.user.email.as_deref() else {
            return Ok(skipped("anonymous user"));
        };

        let attributes = ContactAttributes {
            user_name: event.user.name.clone(),
            last_login_at: Some(event.occurred_at()),
            ..Default::default()
        };
        self.upsert_contact(ContactUpsert::new(email, Some(event.user.id), attributes))
            .await?;

        Ok(json!({ "contact": email }))
    }

    /// Update the user's contact and newsletter subscriptions.
    ///
    /// Newsletter changes are only applied once the email is verified.
    pub async fn sync_user(&self, event: Envelope<UserUpdatedEvent>) -> HandlerResult {
        let Some(email) = event.user.email.as_deref() else {
            return Ok(skipped("anonymous user"));
        };

        let attributes = ContactAttributes {
            user_name: event.user.name.clone(),
            ..Default::default()
        };
        self.upsert_contact(ContactUpsert::new(email, Some(event.user.id), attributes))
            .await?;

        let newsletters = match &event.newsletters {
            None => json!("unchanged"),
            Some(_) if !event.verified => json!("pending_verification"),
            Some(requested) => {
                let (subscribe, unsubscribe) =
                    newsletter_changes(&self.config, &event.previous_newsletters, requested);
                if !subscribe.is_empty() || !unsubscribe.is_empty() {
                    with_retry_if(
                        &self.config.retry,
                        || self.crm.update_newsletters(email, &subscribe, &unsubscribe),
                        CrmError::is_transient,
                    )
                    .await
                    .map_err(HandlerError::new)?;
                }
                json!({ "subscribed": subscribe, "unsubscribed": unsubscribe })
            }
        };

        Ok(json!({ "contact": email, "newsletters": newsletters }))
    }

    /// Mail a freshly issued verification code.
    pub async fn send_verification_code(
        &self,
        event: Envelope<VerificationCodeCreatedEvent>,
    ) -> HandlerResult {
        let email = TransactionalEmail {
            template_id: self.config.verification_code_template_id,
            to: event.email.clone(),
            params: json!({
                "verification_code": event.code,
                "expires_at": event.expires_at,
                "origin": event.origin.url,
                "locale": event.origin.locale,
            }),
        };

        with_retry_if(
            &self.config.retry,
            || self.crm.send_transactional_email(email.clone()),
            CrmError::is_transient,
        )
        .await
        .map_err(HandlerError::new)?;

        Ok(json!({ "sent_to": event.email }))
    }

    /// Store the footprint of a completed simulation on its owner's contact.
    pub async fn sync_simulation_contact(
        &self,
        event: Envelope<SimulationUpsertedEvent>,
    ) -> HandlerResult {
        let simulation = &event.simulation;
        let Some(email) = simulation.user.email.as_deref() else {
            return Ok(skipped("anonymous user"));
        };
        if !simulation.is_completed() {
            return Ok(skipped("simulation in progress"));
        }

        let attributes = ContactAttributes {
            user_name: simulation.user.name.clone(),
            last_simulation_at: Some(event.occurred_at()),
            carbon_footprint: Some(simulation.carbon_footprint.round()),
            water_footprint: simulation.water_footprint.map(f64::round),
            ..Default::default()
        };
        self.upsert_contact(ContactUpsert::new(
            email,
            Some(simulation.user.id),
            attributes,
        ))
        .await?;

        Ok(json!({ "contact": email, "simulation": simulation.id }))
    }

    /// Fold the simulation into every poll and group it belongs to.
    pub async fn record_simulation_stats(
        &self,
        event: Envelope<SimulationUpsertedEvent>,
    ) -> HandlerResult {
        let simulation = &event.simulation;
        let scopes: Vec<StatsScope> = simulation
            .poll_ids
            .iter()
            .copied()
            .map(StatsScope::Poll)
            .chain(simulation.group_ids.iter().copied().map(StatsScope::Group))
            .collect();

        for scope in &scopes {
            self.stats
                .record_simulation(*scope, simulation)
                .await
                .map_err(HandlerError::new)?;
        }

        Ok(json!({ "scopes": scopes }))
    }

    /// Register the administrator of a new organisation.
    pub async fn sync_organisation_created(
        &self,
        event: Envelope<OrganisationCreatedEvent>,
    ) -> HandlerResult {
        self.sync_organisation_admin(&event.organisation, &event.administrator)
            .await
    }

    /// Refresh the administrator of an updated organisation.
    pub async fn sync_organisation_updated(
        &self,
        event: Envelope<OrganisationUpdatedEvent>,
    ) -> HandlerResult {
        self.sync_organisation_admin(&event.organisation, &event.administrator)
            .await
    }

    /// Drop cached stats of `scope`.
    pub async fn invalidate_stats(&self, scope: StatsScope) -> HandlerResult {
        self.stats
            .invalidate(scope)
            .await
            .map_err(HandlerError::new)?;

        Ok(json!({ "invalidated": scope }))
    }

    async fn sync_organisation_admin(
        &self,
        organisation: &OrganisationSummary,
        administrator: &UserRef,
    ) -> HandlerResult {
        let Some(email) = administrator.email.as_deref() else {
            return Err(HandlerError::msg(format!(
                "Administrator of organisation {} has no email",
                organisation.slug
            )));
        };

        let attributes = ContactAttributes {
            user_name: administrator.name.clone(),
            organisation_name: Some(organisation.name.clone()),
            organisation_slug: Some(organisation.slug.clone()),
            organisation_type: organisation.organisation_type.clone(),
            number_of_collaborators: organisation.number_of_collaborators,
            ..Default::default()
        };
        let mut contact = ContactUpsert::new(email, Some(administrator.id), attributes);
        contact.list_ids.extend(self.config.organisation_list_id);

        self.upsert_contact(contact).await?;

        Ok(json!({ "contact": email, "organisation": organisation.slug }))
    }

    async fn upsert_contact(&self, contact: ContactUpsert) -> Result<(), HandlerError> {
        with_retry_if(
            &self.config.retry,
            || self.crm.upsert_contact(contact.clone()),
            CrmError::is_transient,
        )
        .await
        .map_err(HandlerError::new)
    }
}

fn skipped(reason: &str) -> serde_json::Value {
    json!({ "skipped": reason })
}

/// Lists to subscribe to and unsubscribe from, restricted to known
/// newsletters and sorted.
fn newsletter_changes(config: &SyncConfig, previous: &[u64], requested: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let mut subscribe: Vec<u64> = requested
        .iter()
        .copied()
        .filter(|id| config.is_newsletter(*id) && !previous.contains(id))
        .collect();
    let mut unsubscribe: Vec<u64> = previous
        .iter()
        .copied()
        .filter(|id| config.is_newsletter(*id) && !requested.contains(id))
        .collect();

    subscribe.sort_unstable();
    subscribe.dedup();
    unsubscribe.sort_unstable();
    unsubscribe.dedup();
    (subscribe, unsubscribe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig {
            newsletter_list_ids: vec![22, 32, 35],
            ..Default::default()
        }
    }

    #[test]
    fn test_newsletter_changes() {
        let (subscribe, unsubscribe) = newsletter_changes(&config(), &[22, 35], &[32, 35, 32]);
        assert_eq!(subscribe, vec![32]);
        assert_eq!(unsubscribe, vec![22]);
    }

    #[test]
    fn test_newsletter_changes_ignore_unknown_lists() {
        let (subscribe, unsubscribe) = newsletter_changes(&config(), &[99], &[22, 100]);
        assert_eq!(subscribe, vec![22]);
        assert!(unsubscribe.is_empty());
    }

    #[test]
    fn test_newsletter_changes_unchanged() {
        let (subscribe, unsubscribe) = newsletter_changes(&config(), &[22], &[22]);
        assert!(subscribe.is_empty());
        assert!(unsubscribe.is_empty());
    }
}

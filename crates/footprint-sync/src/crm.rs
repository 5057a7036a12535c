//! CRM client abstraction.
//!
//! The email/newsletter provider is an external collaborator with its own
//! HTTP client; handlers only depend on [`CrmClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// CRM error types.
#[derive(Debug, Error)]
pub enum CrmError {
    /// Request timed out
    #[error("CRM request timed out")]
    Timeout,

    /// Provider rate limit exceeded
    #[error("CRM rate limit exceeded")]
    RateLimited,

    /// Provider unreachable or failing
    #[error("CRM unavailable: {0}")]
    Unavailable(String),

    /// Provider rejected the request
    #[error("CRM rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the provider
        status: u16,
        /// Provider message
        message: String,
    },
}

impl CrmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CrmError::Timeout | CrmError::RateLimited | CrmError::Unavailable(_) => true,
            CrmError::Rejected { status, .. } => *status >= 500,
        }
    }
}

/// Contact attributes maintained in the CRM.
///
/// Unset attributes are left untouched by the provider.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContactAttributes {
    /// User display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Last sign-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Last completed simulation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_simulation_at: Option<DateTime<Utc>>,
    /// Carbon footprint of the last simulation, kgCO2e per year
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbon_footprint: Option<f64>,
    /// Water footprint of the last simulation, litres per day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_footprint: Option<f64>,
    /// Administrated organisation name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation_name: Option<String>,
    /// Administrated organisation slug
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation_slug: Option<String>,
    /// Administrated organisation type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation_type: Option<String>,
    /// Declared number of collaborators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_collaborators: Option<u32>,
}

/// Create-or-update request for one contact.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContactUpsert {
    /// Contact email, the provider-side key
    pub email: String,
    /// Platform user id
    pub user_id: Option<Uuid>,
    /// Attributes to set
    pub attributes: ContactAttributes,
    /// Lists to add the contact to
    pub list_ids: Vec<u64>,
}

impl ContactUpsert {
    /// Upsert with attributes only.
    pub fn new(email: impl Into<String>, user_id: Option<Uuid>, attributes: ContactAttributes) -> Self {
        Self {
            email: email.into(),
            user_id,
            attributes,
            list_ids: Vec::new(),
        }
    }
}

/// A templated transactional email.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransactionalEmail {
    /// Provider template id
    pub template_id: u64,
    /// Recipient
    pub to: String,
    /// Template parameters
    pub params: serde_json::Value,
}

/// Email/newsletter provider client.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Create or update a contact.
    async fn upsert_contact(&self, contact: ContactUpsert) -> Result<(), CrmError>;

    /// Add the contact to `subscribe` and remove it from `unsubscribe`.
    async fn update_newsletters(
        &self,
        email: &str,
        subscribe: &[u64],
        unsubscribe: &[u64],
    ) -> Result<(), CrmError>;

    /// Send a transactional email.
    async fn send_transactional_email(&self, email: TransactionalEmail) -> Result<(), CrmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(CrmError::Timeout.is_transient());
        assert!(CrmError::RateLimited.is_transient());
        assert!(CrmError::Rejected {
            status: 503,
            message: "maintenance".to_string()
        }
        .is_transient());
        assert!(!CrmError::Rejected {
            status: 400,
            message: "invalid email".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_unset_attributes_are_not_serialized() {
        let attributes = ContactAttributes {
            user_name: Some("Léa".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(attributes).unwrap();
        assert_eq!(value, serde_json::json!({ "user_name": "Léa" }));
    }
}

//! Sync configuration for CRM and stats handlers.
//!
//! Loaded from environment variables with defaults suitable for local
//! development, where CRM sync is disabled.

use footprint_events::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryConfig;

/// Configuration of the sync handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Whether CRM handlers are registered at all.
    pub crm_enabled: bool,

    /// Retry policy for CRM calls.
    pub retry: RetryConfig,

    /// Newsletter list ids users can subscribe to.
    pub newsletter_list_ids: Vec<u64>,

    /// List organisation administrators are added to.
    pub organisation_list_id: Option<u64>,

    /// Transactional template used for verification codes.
    pub verification_code_template_id: u64,
}

impl Default for SyncConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            crm_enabled: false,
            retry: RetryConfig::default(),
            newsletter_list_ids: Vec::new(),
            organisation_list_id: None,
            verification_code_template_id: 1,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, ignoring invalid values.
    ///
    /// Environment variables:
    /// - `CRM_SYNC_ENABLED`: register CRM handlers (default: false)
    /// - `CRM_MAX_RETRIES`: maximum attempts per CRM call (default: 3)
    /// - `CRM_RETRY_INITIAL_DELAY_MS`: first retry delay (default: 200)
    /// - `CRM_NEWSLETTER_LIST_IDS`: comma separated newsletter list ids
    /// - `CRM_ORGANISATION_LIST_ID`: list for organisation administrators
    /// - `CRM_VERIFICATION_CODE_TEMPLATE_ID`: verification code template (default: 1)
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_default()
    }

    /// Load configuration from environment variables.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();

        let crm_enabled = match lookup("CRM_SYNC_ENABLED") {
            Some(value) => value != "false" && value != "0",
            None => default.crm_enabled,
        };

        let mut retry = default.retry;
        if let Some(value) = lookup("CRM_MAX_RETRIES") {
            retry.max_attempts = parse("CRM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("CRM_RETRY_INITIAL_DELAY_MS") {
            retry.initial_delay = Duration::from_millis(parse("CRM_RETRY_INITIAL_DELAY_MS", &value)?);
        }
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CRM_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let newsletter_list_ids = match lookup("CRM_NEWSLETTER_LIST_IDS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| parse("CRM_NEWSLETTER_LIST_IDS", id))
                .collect::<Result<_, _>>()?,
            None => default.newsletter_list_ids,
        };

        let organisation_list_id = match lookup("CRM_ORGANISATION_LIST_ID") {
            Some(value) => Some(parse("CRM_ORGANISATION_LIST_ID", &value)?),
            None => default.organisation_list_id,
        };

        let verification_code_template_id = match lookup("CRM_VERIFICATION_CODE_TEMPLATE_ID") {
            Some(value) => parse("CRM_VERIFICATION_CODE_TEMPLATE_ID", &value)?,
            None => default.verification_code_template_id,
        };

        Ok(Self {
            crm_enabled,
            retry,
            newsletter_list_ids,
            organisation_list_id,
            verification_code_template_id,
        })
    }

    /// Whether `list_id` is a known newsletter list.
    pub fn is_newsletter(&self, list_id: u64) -> bool {
        self.newsletter_list_ids.contains(&list_id)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

//! Identity-provider collaborator.
//!
//! The provider owns the authoritative user record plus arbitrary private
//! metadata written by the dashboard app. Billing ids and the optional
//! plan tag live in that metadata.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

/// User record as returned by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub private_metadata: Value,
}

impl IdentityUser {
    pub fn full_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.to_string()),
            (None, Some(last)) => Some(last.to_string()),
            (None, None) => None,
        }
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.email_addresses
            .first()
            .map(|e| e.email_address.as_str())
    }

    pub fn billing_metadata(&self) -> BillingMetadata {
        BillingMetadata::from_metadata(&self.private_metadata)
    }
}

/// Billing-related keys extracted from the provider's private metadata.
/// Keys are camelCase because the dashboard app writes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillingMetadata {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub plan_type: Option<String>,
}

impl BillingMetadata {
    pub fn from_metadata(metadata: &Value) -> Self {
        let field = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            customer_id: field("stripeCustomerId"),
            subscription_id: field("stripeSubscriptionId"),
            plan_type: field("planType"),
        }
    }

    /// Subscription resolution only consults the billing provider when
    /// both ids are present.
    pub fn has_billing_ids(&self) -> bool {
        self.customer_id.is_some() && self.subscription_id.is_some()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolves the identity record for a user id. A provider-side 404 is
    /// `UserNotFound`; transport failures are identity errors.
    async fn user(&self, user_id: &str) -> Result<IdentityUser, AppError>;
}

/// Identity client against the provider's backend API.
pub struct HttpIdentityStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpIdentityStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl IdentityStore for HttpIdentityStore {
    async fn user(&self, user_id: &str) -> Result<IdentityUser, AppError> {
        let url = format!("{}/v1/users/{}", self.base_url, user_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::IdentityError(format!("Request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(AppError::UserNotFound),
            status if status.is_success() => response
                .json::<IdentityUser>()
                .await
                .map_err(|e| AppError::IdentityError(format!("Invalid response body: {}", e))),
            status => Err(AppError::IdentityError(format!(
                "Unexpected response status: {}",
                status
            ))),
        }
    }
}

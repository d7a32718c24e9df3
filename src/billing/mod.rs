//! Billing-provider collaborator (Stripe-shaped API).
//!
//! Only the two read paths the resolver needs: subscription lookup and
//! price lookup. Failures here are always recovered by the caller; this
//! module just reports them.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{AppError, BillingError};

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: PriceRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    /// Stable provider-defined identifier for the plan; used as a stand-in
    /// for the subscription tier name.
    #[serde(default)]
    pub lookup_key: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn subscription(&self, subscription_id: &str) -> Result<Subscription, AppError>;
    async fn price(&self, price_id: &str) -> Result<Price, AppError>;
}

pub struct StripeClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        id: &str,
    ) -> Result<T, AppError> {
        let url = format!("{}/v1/{}/{}", self.base_url, path, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| BillingError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BillingError::NotFound(id.to_string()).into()),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| BillingError::RequestFailed(e.to_string()).into()),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(BillingError::ApiError {
                    status: status.as_u16(),
                    message,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn subscription(&self, subscription_id: &str) -> Result<Subscription, AppError> {
        self.get("subscriptions", subscription_id).await
    }

    async fn price(&self, price_id: &str) -> Result<Price, AppError> {
        self.get("prices", price_id).await
    }
}

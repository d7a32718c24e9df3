use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::billing::BillingProvider;
use crate::db::{NewUserProfile, ProfileChanges, ProfileStore, UsageTotals, UserProfile};
use crate::error::AppError;
use crate::identity::{BillingMetadata, IdentityStore};

/// Resolved-view defaults, used whenever billing metadata is absent or the
/// stored profile carries nothing usable.
pub const DEFAULT_TIER: &str = "free_trial";
pub const DEFAULT_STATUS: &str = "trial";

/// Composite profile view returned by `GET /api/extension/profile`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub profile: ProfileSummary,
    pub usage: UsageTotals,
    pub extension_sessions: usize,
    pub last_active_session: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub terms_accepted: bool,
    pub extension_enabled: Option<bool>,
    pub settings: Option<Value>,
}

/// PATCH body. Fields arrive as loose JSON values so that a wrong-typed
/// `extensionEnabled` can be ignored instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub extension_enabled: Option<Value>,
}

/// Orchestrates the identity store, record store, and billing provider
/// into a unified profile view, and applies partial profile updates.
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    identity: Arc<dyn IdentityStore>,
    billing: Arc<dyn BillingProvider>,
}

impl ProfileResolver {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        identity: Arc<dyn IdentityStore>,
        billing: Arc<dyn BillingProvider>,
    ) -> Self {
        Self {
            store,
            identity,
            billing,
        }
    }

    pub async fn fetch_profile(&self, user_id: &str) -> Result<ProfileView, AppError> {
        if user_id.is_empty() {
            return Err(AppError::Unauthenticated);
        }

        let identity = self.identity.user(user_id).await?;

        let profile = match self.store.profile(user_id).await? {
            Some(profile) => profile,
            None => {
                info!("Creating profile on first fetch for user {}", user_id);
                let new_profile = NewUserProfile::new(
                    user_id,
                    identity.primary_email().map(str::to_string),
                    identity.full_name(),
                );
                self.store.create_profile(&new_profile).await?
            }
        };

        // Independent reads, no data dependency between them.
        let (sessions, latest_usage, usage) = tokio::try_join!(
            self.store.active_sessions(user_id),
            self.store.latest_usage(user_id),
            self.store.usage_totals(user_id),
        )?;

        let metadata = identity.billing_metadata();
        let (subscription_tier, subscription_status) =
            self.resolve_subscription(&metadata, &profile).await;

        Ok(ProfileView {
            profile: ProfileSummary {
                id: identity.id.clone(),
                name: identity.full_name(),
                email: identity.primary_email().map(str::to_string),
                avatar_url: identity.image_url.clone(),
                subscription_tier,
                subscription_status,
                terms_accepted: profile.terms_accepted,
                extension_enabled: profile.extension_enabled,
                settings: profile.settings,
            },
            usage,
            extension_sessions: sessions.len(),
            last_active_session: latest_usage.map(|u| u.created_at),
        })
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        patch: UpdateProfileRequest,
    ) -> Result<UserProfile, AppError> {
        if user_id.is_empty() {
            return Err(AppError::Unauthenticated);
        }

        let changes = ProfileChanges {
            settings: patch.settings.filter(is_truthy),
            // Applied only when strictly boolean; any other type is ignored.
            extension_enabled: patch.extension_enabled.and_then(|v| v.as_bool()),
        };

        self.store
            .update_profile(user_id, changes)
            .await?
            .ok_or(AppError::ProfileNotFound)
    }

    /// Tier/status precedence: billing provider when both billing ids are
    /// present, stored profile values only as the billing-failure fallback,
    /// `free_trial`/`trial` otherwise. When the ids are missing the stored
    /// values are deliberately not consulted.
    async fn resolve_subscription(
        &self,
        metadata: &BillingMetadata,
        profile: &UserProfile,
    ) -> (String, String) {
        if !metadata.has_billing_ids() {
            return (DEFAULT_TIER.to_string(), DEFAULT_STATUS.to_string());
        }

        // has_billing_ids guarantees presence.
        let subscription_id = metadata.subscription_id.as_deref().unwrap_or_default();

        match self
            .billing_tier_status(subscription_id, metadata.plan_type.as_deref())
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    "Billing lookup failed for subscription {}: {}; falling back to stored profile values",
                    subscription_id, e
                );
                (
                    stored_or(&profile.subscription_tier, DEFAULT_TIER),
                    stored_or(&profile.subscription_status, DEFAULT_STATUS),
                )
            }
        }
    }

    async fn billing_tier_status(
        &self,
        subscription_id: &str,
        plan_type: Option<&str>,
    ) -> Result<(String, String), AppError> {
        let subscription = self.billing.subscription(subscription_id).await?;
        let status = subscription.status;

        if let Some(plan) = plan_type {
            return Ok((plan.to_string(), status));
        }

        if let Some(item) = subscription.items.data.first() {
            let price = self.billing.price(&item.price.id).await?;
            if let Some(lookup_key) = price.lookup_key {
                return Ok((lookup_key, status));
            }
        }

        Ok((DEFAULT_TIER.to_string(), status))
    }
}

fn stored_or(stored: &str, default: &str) -> String {
    if stored.is_empty() {
        default.to_string()
    } else {
        stored.to_string()
    }
}

/// Loose truthiness check matching what the extension clients send:
/// null, false, 0, and "" all mean "no settings supplied".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{
        MockBillingProvider, Price, Subscription, SubscriptionItem, SubscriptionItems, PriceRef,
    };
    use crate::db::models::{INITIAL_STATUS, INITIAL_TIER};
    use crate::db::{ExtensionSession, MockProfileStore, UsageAnalytics};
    use crate::error::BillingError;
    use crate::identity::{EmailAddress, IdentityUser, MockIdentityStore};
    use serde_json::json;
    use uuid::Uuid;

    fn identity_user(metadata: Value) -> IdentityUser {
        IdentityUser {
            id: "user_1".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            image_url: Some("https://img.example/u1.png".into()),
            email_addresses: vec![EmailAddress {
                email_address: "ada@example.com".into(),
            }],
            private_metadata: metadata,
        }
    }

    fn stored_profile(tier: &str, status: &str) -> UserProfile {
        let now = Utc::now();
        UserProfile {
            id: Uuid::new_v4(),
            user_id: "user_1".into(),
            email: Some("ada@example.com".into()),
            display_name: Some("Ada Lovelace".into()),
            subscription_tier: tier.into(),
            subscription_status: status.into(),
            terms_accepted: false,
            extension_enabled: None,
            settings: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn billing_metadata() -> Value {
        json!({
            "stripeCustomerId": "cus_123",
            "stripeSubscriptionId": "sub_456",
        })
    }

    fn store_with_profile(profile: UserProfile) -> MockProfileStore {
        let mut store = MockProfileStore::new();
        store
            .expect_profile()
            .returning(move |_| Ok(Some(profile.clone())));
        store.expect_active_sessions().returning(|_| Ok(vec![]));
        store.expect_latest_usage().returning(|_| Ok(None));
        store
            .expect_usage_totals()
            .returning(|_| Ok(UsageTotals::default()));
        store
    }

    fn resolver(
        store: MockProfileStore,
        identity: MockIdentityStore,
        billing: MockBillingProvider,
    ) -> ProfileResolver {
        ProfileResolver::new(Arc::new(store), Arc::new(identity), Arc::new(billing))
    }

    fn subscription(status: &str, price_id: Option<&str>) -> Subscription {
        Subscription {
            id: "sub_456".into(),
            status: status.into(),
            items: SubscriptionItems {
                data: price_id
                    .map(|id| {
                        vec![SubscriptionItem {
                            price: PriceRef { id: id.into() },
                        }]
                    })
                    .unwrap_or_default(),
            },
        }
    }

    #[tokio::test]
    async fn test_empty_user_id_is_unauthenticated() {
        let resolver = resolver(
            MockProfileStore::new(),
            MockIdentityStore::new(),
            MockBillingProvider::new(),
        );
        let result = resolver.fetch_profile("").await;
        assert!(matches!(result, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_identity_miss_is_user_not_found() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Err(AppError::UserNotFound));

        let resolver = resolver(
            MockProfileStore::new(),
            identity,
            MockBillingProvider::new(),
        );
        let result = resolver.fetch_profile("user_1").await;
        assert!(matches!(result, Err(AppError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_first_fetch_creates_profile_with_defaults() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(Value::Null)));

        let mut store = MockProfileStore::new();
        store.expect_profile().returning(|_| Ok(None));
        store
            .expect_create_profile()
            .times(1)
            .withf(|p| {
                p.user_id == "user_1"
                    && p.email.as_deref() == Some("ada@example.com")
                    && p.display_name.as_deref() == Some("Ada Lovelace")
            })
            .returning(|_| Ok(stored_profile(INITIAL_TIER, INITIAL_STATUS)));
        store.expect_active_sessions().returning(|_| Ok(vec![]));
        store.expect_latest_usage().returning(|_| Ok(None));
        store
            .expect_usage_totals()
            .returning(|_| Ok(UsageTotals::default()));

        let resolver = resolver(store, identity, MockBillingProvider::new());
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.id, "user_1");
        assert!(!view.profile.terms_accepted);
        assert_eq!(view.usage, UsageTotals::default());
        assert_eq!(view.extension_sessions, 0);
        assert!(view.last_active_session.is_none());
    }

    #[tokio::test]
    async fn test_no_billing_ids_yields_trial_defaults_regardless_of_stored() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(Value::Null)));

        // Stored values are NOT consulted in this branch.
        let store = store_with_profile(stored_profile("pro_monthly", "active"));

        let resolver = resolver(store, identity, MockBillingProvider::new());
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, DEFAULT_TIER);
        assert_eq!(view.profile.subscription_status, DEFAULT_STATUS);
    }

    #[tokio::test]
    async fn test_plan_type_tag_wins_over_price_lookup() {
        let mut identity = MockIdentityStore::new();
        identity.expect_user().returning(|_| {
            Ok(identity_user(json!({
                "stripeCustomerId": "cus_123",
                "stripeSubscriptionId": "sub_456",
                "planType": "team",
            })))
        });

        let mut billing = MockBillingProvider::new();
        billing
            .expect_subscription()
            .returning(|_| Ok(subscription("active", Some("price_789"))));
        // price() must not be called when the plan tag is present.
        billing.expect_price().times(0);

        let store = store_with_profile(stored_profile(INITIAL_TIER, INITIAL_STATUS));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, "team");
        assert_eq!(view.profile.subscription_status, "active");
    }

    #[tokio::test]
    async fn test_tier_from_price_lookup_key() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(billing_metadata())));

        let mut billing = MockBillingProvider::new();
        billing
            .expect_subscription()
            .returning(|_| Ok(subscription("past_due", Some("price_789"))));
        billing
            .expect_price()
            .withf(|id| id == "price_789")
            .returning(|_| {
                Ok(Price {
                    id: "price_789".into(),
                    lookup_key: Some("pro_monthly".into()),
                })
            });

        let store = store_with_profile(stored_profile(INITIAL_TIER, INITIAL_STATUS));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, "pro_monthly");
        assert_eq!(view.profile.subscription_status, "past_due");
    }

    #[tokio::test]
    async fn test_no_line_items_keeps_default_tier_with_provider_status() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(billing_metadata())));

        let mut billing = MockBillingProvider::new();
        billing
            .expect_subscription()
            .returning(|_| Ok(subscription("canceled", None)));

        let store = store_with_profile(stored_profile(INITIAL_TIER, INITIAL_STATUS));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, DEFAULT_TIER);
        assert_eq!(view.profile.subscription_status, "canceled");
    }

    #[tokio::test]
    async fn test_billing_failure_falls_back_to_stored_values() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(billing_metadata())));

        let mut billing = MockBillingProvider::new();
        billing.expect_subscription().returning(|_| {
            Err(BillingError::RequestFailed("connection refused".into()).into())
        });

        let store = store_with_profile(stored_profile("pro_monthly", "active"));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, "pro_monthly");
        assert_eq!(view.profile.subscription_status, "active");
    }

    #[tokio::test]
    async fn test_billing_failure_with_empty_stored_values_uses_defaults() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(billing_metadata())));

        let mut billing = MockBillingProvider::new();
        billing
            .expect_subscription()
            .returning(|_| Err(BillingError::NotFound("sub_456".into()).into()));

        let store = store_with_profile(stored_profile("", ""));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.profile.subscription_tier, DEFAULT_TIER);
        assert_eq!(view.profile.subscription_status, DEFAULT_STATUS);
    }

    #[tokio::test]
    async fn test_price_lookup_failure_also_falls_back() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(billing_metadata())));

        let mut billing = MockBillingProvider::new();
        billing
            .expect_subscription()
            .returning(|_| Ok(subscription("active", Some("price_789"))));
        billing
            .expect_price()
            .returning(|_| Err(BillingError::RequestFailed("timeout".into()).into()));

        let store = store_with_profile(stored_profile("enterprise", "active"));
        let resolver = resolver(store, identity, billing);
        let view = resolver.fetch_profile("user_1").await.unwrap();

        // The whole billing branch is abandoned, provider status included.
        assert_eq!(view.profile.subscription_tier, "enterprise");
        assert_eq!(view.profile.subscription_status, "active");
    }

    #[tokio::test]
    async fn test_last_active_from_newest_usage_row() {
        let mut identity = MockIdentityStore::new();
        identity
            .expect_user()
            .returning(|_| Ok(identity_user(Value::Null)));

        let newest = Utc::now();
        let mut store = MockProfileStore::new();
        store
            .expect_profile()
            .returning(|_| Ok(Some(stored_profile(INITIAL_TIER, INITIAL_STATUS))));
        store
            .expect_active_sessions()
            .returning(|_| Ok(vec![active_session(), active_session()]));
        store.expect_latest_usage().returning(move |_| {
            Ok(Some(UsageAnalytics {
                id: Uuid::new_v4(),
                user_id: "user_1".into(),
                tokens_used: 120,
                requests_made: 3,
                cost_accrued: 0.42,
                created_at: newest,
            }))
        });
        store.expect_usage_totals().returning(|_| {
            Ok(UsageTotals {
                tokens_used: 120,
                requests_made: 3,
                cost_accrued: 0.42,
            })
        });

        let resolver = resolver(store, identity, MockBillingProvider::new());
        let view = resolver.fetch_profile("user_1").await.unwrap();

        assert_eq!(view.extension_sessions, 2);
        assert_eq!(view.last_active_session, Some(newest));
        assert_eq!(view.usage.tokens_used, 120);
    }

    #[tokio::test]
    async fn test_update_ignores_wrong_typed_extension_flag() {
        let mut store = MockProfileStore::new();
        store
            .expect_update_profile()
            .withf(|_, changes| changes.extension_enabled.is_none() && changes.settings.is_none())
            .returning(|_, _| Ok(Some(stored_profile(INITIAL_TIER, INITIAL_STATUS))));

        let resolver = resolver(store, MockIdentityStore::new(), MockBillingProvider::new());
        let patch = UpdateProfileRequest {
            settings: None,
            extension_enabled: Some(json!("yes")),
        };
        let updated = resolver.update_profile("user_1", patch).await.unwrap();
        assert_eq!(updated.user_id, "user_1");
    }

    #[tokio::test]
    async fn test_update_applies_typed_fields() {
        let mut store = MockProfileStore::new();
        store
            .expect_update_profile()
            .withf(|_, changes| {
                changes.extension_enabled == Some(true)
                    && changes.settings == Some(json!({"theme": "dark"}))
            })
            .returning(|_, _| Ok(Some(stored_profile(INITIAL_TIER, INITIAL_STATUS))));

        let resolver = resolver(store, MockIdentityStore::new(), MockBillingProvider::new());
        let patch = UpdateProfileRequest {
            settings: Some(json!({"theme": "dark"})),
            extension_enabled: Some(json!(true)),
        };
        resolver.update_profile("user_1", patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_drops_falsy_settings() {
        let mut store = MockProfileStore::new();
        store
            .expect_update_profile()
            .withf(|_, changes| changes.settings.is_none())
            .returning(|_, _| Ok(Some(stored_profile(INITIAL_TIER, INITIAL_STATUS))));

        let resolver = resolver(store, MockIdentityStore::new(), MockBillingProvider::new());
        let patch = UpdateProfileRequest {
            settings: Some(Value::Bool(false)),
            extension_enabled: None,
        };
        resolver.update_profile("user_1", patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_without_profile_is_not_found() {
        let mut store = MockProfileStore::new();
        store.expect_update_profile().returning(|_, _| Ok(None));

        let resolver = resolver(store, MockIdentityStore::new(), MockBillingProvider::new());
        let result = resolver
            .update_profile("user_1", UpdateProfileRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::ProfileNotFound)));
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!({"theme": "dark"})));
        assert!(is_truthy(&json!([1])));
        assert!(is_truthy(&json!("dark")));
        assert!(is_truthy(&json!(1)));
    }

    fn active_session() -> ExtensionSession {
        let now = Utc::now();
        ExtensionSession {
            id: Uuid::new_v4(),
            user_id: "user_1".into(),
            is_active: true,
            last_active_at: now,
            created_at: now,
        }
    }
}

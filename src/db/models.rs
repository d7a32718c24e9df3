use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Tier/status written when a profile row is first created. Distinct from
/// the resolver's `free_trial`/`trial` defaults, which apply only to the
/// resolved view.
pub const INITIAL_TIER: &str = "FREE";
pub const INITIAL_STATUS: &str = "ACTIVE";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub terms_accepted: bool,
    pub extension_enabled: Option<bool>,
    pub settings: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl NewUserProfile {
    pub fn new(user_id: &str, email: Option<String>, display_name: Option<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            email,
            display_name,
        }
    }
}

/// Partial update applied to a profile row. `None` fields are left
/// untouched; `updated_at` is stamped unconditionally.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub settings: Option<Value>,
    pub extension_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSession {
    pub id: Uuid,
    pub user_id: String,
    pub is_active: bool,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UsageAnalytics {
    pub id: Uuid,
    pub user_id: String,
    pub tokens_used: i64,
    pub requests_made: i64,
    pub cost_accrued: f64,
    pub created_at: DateTime<Utc>,
}

/// Per-user usage sums. Rows with no usage sum to zero, never null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub tokens_used: i64,
    pub requests_made: i64,
    pub cost_accrued: f64,
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{
    ExtensionSession, NewUserProfile, ProfileChanges, UsageAnalytics, UsageTotals, UserProfile,
    INITIAL_STATUS, INITIAL_TIER,
};
use crate::db::ProfileStore;
use crate::error::AppError;

const PROFILE_COLUMNS: &str = "id, user_id, email, display_name, subscription_tier, \
     subscription_status, terms_accepted, extension_enabled, settings, created_at, updated_at";

pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn get_pool_status(&self) -> Result<DbPoolStatus, AppError> {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = size - idle;

        Ok(DbPoolStatus {
            total_connections: size,
            active_connections: active,
            idle_connections: idle,
        })
    }
}

#[async_trait]
impl ProfileStore for DbOperations {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        let profile = sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM user_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(profile)
    }

    async fn create_profile(&self, profile: &NewUserProfile) -> Result<UserProfile, AppError> {
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, UserProfile>(&format!(
            r#"
            INSERT INTO user_profiles
                (id, user_id, email, display_name, subscription_tier,
                 subscription_status, terms_accepted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&profile.user_id)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(INITIAL_TIER)
        .bind(INITIAL_STATUS)
        .bind(false)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await;

        match inserted {
            Ok(row) => Ok(row),
            // Lost the create-on-read race; the winner's row is the record.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => self
                .profile(&profile.user_id)
                .await?
                .ok_or_else(|| AppError::InternalError("Profile vanished after insert conflict".into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_profile(
        &self,
        user_id: &str,
        changes: ProfileChanges,
    ) -> Result<Option<UserProfile>, AppError> {
        let updated = sqlx::query_as::<_, UserProfile>(&format!(
            r#"
            UPDATE user_profiles
            SET settings = COALESCE($2, settings),
                extension_enabled = COALESCE($3, extension_enabled),
                updated_at = $4
            WHERE user_id = $1
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .bind(changes.settings)
        .bind(changes.extension_enabled)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(updated)
    }

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<ExtensionSession>, AppError> {
        let sessions = sqlx::query_as::<_, ExtensionSession>(
            r#"
            SELECT id, user_id, is_active, last_active_at, created_at
            FROM extension_sessions
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY last_active_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(sessions)
    }

    async fn latest_usage(&self, user_id: &str) -> Result<Option<UsageAnalytics>, AppError> {
        let usage = sqlx::query_as::<_, UsageAnalytics>(
            r#"
            SELECT id, user_id, tokens_used, requests_made, cost_accrued, created_at
            FROM usage_analytics
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(usage)
    }

    async fn usage_totals(&self, user_id: &str) -> Result<UsageTotals, AppError> {
        let totals = sqlx::query_as::<_, UsageTotals>(
            r#"
            SELECT COALESCE(SUM(tokens_used), 0)::BIGINT AS tokens_used,
                   COALESCE(SUM(requests_made), 0)::BIGINT AS requests_made,
                   COALESCE(SUM(cost_accrued), 0)::DOUBLE PRECISION AS cost_accrued
            FROM usage_analytics
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(totals)
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}

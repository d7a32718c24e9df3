//! Persistence layer: profile, session, and usage records behind a
//! Postgres pool.

pub mod models;
pub mod operations;

pub use models::{
    ExtensionSession, NewUserProfile, ProfileChanges, UsageAnalytics, UsageTotals, UserProfile,
};
pub use operations::{DbOperations, DbPoolStatus};

use async_trait::async_trait;

use crate::error::AppError;

/// Record-store seam consumed by the profile resolver.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError>;

    /// Inserts a profile row. A concurrent first-time fetch may race this
    /// insert; the unique constraint on `user_id` makes the loser re-read
    /// instead of failing the request.
    async fn create_profile(&self, profile: &NewUserProfile) -> Result<UserProfile, AppError>;

    /// Partial merge; returns `None` when no row exists for the user.
    async fn update_profile(
        &self,
        user_id: &str,
        changes: ProfileChanges,
    ) -> Result<Option<UserProfile>, AppError>;

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<ExtensionSession>, AppError>;

    async fn latest_usage(&self, user_id: &str) -> Result<Option<UsageAnalytics>, AppError>;

    async fn usage_totals(&self, user_id: &str) -> Result<UsageTotals, AppError>;
}

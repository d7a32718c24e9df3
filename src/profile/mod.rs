//! Profile resolution and the HTTP handlers that expose it.

pub mod handlers;
mod resolver;

pub use resolver::{
    ProfileResolver, ProfileSummary, ProfileView, UpdateProfileRequest, DEFAULT_STATUS,
    DEFAULT_TIER,
};

//! Supportdesk API Library
//!
//! Regional ticket routing, the conversation claim state machine and live
//! event streams for the support portal.

pub mod alerting;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod error;
pub mod notifications;
pub mod regions;
pub mod routes;
pub mod routing;
pub mod state;
pub mod stream;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use regions::RegionDirectory;
pub use state::AppState;

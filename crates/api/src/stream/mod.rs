//! Live event streams
//!
//! Server-sent event streams for customers, staff and admins:
//! - **Connection**: one authenticated stream per user, bounded outbound buffer
//! - **Hub**: registry with role index, cohort broadcast, heartbeats and idle timeouts
//! - **Dedup**: rolling window of event ids already pushed to a connection
//! - **Events**: the wire envelope
//! - **Handler**: Axum SSE route

pub mod connection;
pub mod dedup;
pub mod events;
pub mod handler;
pub mod hub;

pub use connection::{Connection, Delivery, HubFrame};
pub use dedup::DedupWindow;
pub use events::{EventKind, StreamEvent};
pub use handler::stream_handler;
pub use hub::{BroadcastHub, Cohort, HubConfig, HubStats, PublishReport, StreamGuard, Targets};

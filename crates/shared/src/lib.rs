//! Supportdesk Shared Types and Utilities
//!
//! Domain types, errors, and database helpers shared by the routing and
//! broadcast engine.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;

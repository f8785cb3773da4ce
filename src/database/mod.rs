//! Database module for presence state
//!
//! Provides SQLite storage for:
//! - Devices and their stable identities
//! - Presence events
//! - Device co-occurrence associations
//! - Network snapshots

pub mod connection;
pub mod models;
pub mod queries;
pub mod schema;

pub use connection::{Database, with_savepoint};
pub use models::*;
pub use queries::*;

//! # FluxSync Events
//!
//! The messages downstream consumers (strategies, dashboards) receive when a
//! reconciliation pipeline detects and persists changes.
//!
//! Depends only on `core-types`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{Changed, FluxEvent};

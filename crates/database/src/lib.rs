//! # FluxSync Database Crate
//!
//! The local authoritative store for reconciled orders, trades and
//! strategy-owned positions.
//!
//! ## Architectural Principles
//!
//! - **Store contracts:** The reconciliation pipelines only see the
//!   `OrderStore`, `TradeStore` and `PositionStore` traits: lookup by business
//!   key and upsert returning the stored form.
//! - **Idempotent writes:** Every upsert is keyed on the business id, so a delta
//!   delivered twice produces one record.
//! - **Two backends:** `DbRepository` for PostgreSQL (pooled, async, embedded
//!   migrations) and `MemoryRepository` for runs without a database and for tests.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations` / `database_url`: pool setup.
//! - `DbRepository`, `MemoryRepository`: the store implementations.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, database_url, run_migrations};
pub use error::DbError;
pub use memory::MemoryRepository;
pub use repository::DbRepository;
pub use store::{OrderStore, PositionStore, TradeStore};

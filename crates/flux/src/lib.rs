//! # FluxSync Reconciliation Pipelines
//!
//! Keeps local state in step with the exchange: each pipeline ("flux")
//! repeatedly fetches the exchange view of one entity type, diffs it against
//! what it saw last time, persists what changed and publishes the persisted
//! result downstream.
//!
//! ## Architectural Principles
//!
//! - **Two capabilities, one runner:** an entity type supplies a `Fetch` and a
//!   `Persist`; `Flux<F, P>` composes them.
//! - **Remembered state:** the latest observation per business key lives in
//!   an `Arc<Remembered<T>>` owned by the pipeline and readable by others.
//! - **Loss-free:** elements that fail to persist are evicted from the
//!   remembered state and detected again on the next cycle.
//!
//! ## Public API
//!
//! - `account_flux`, `order_flux`, `trade_flux`, `position_flux`: the four
//!   instances.
//! - `scheduler::spawn`: drives one instance on a fixed interval.
//! - `FluxError`: the specific error types that can be returned from this crate.

pub mod account;
pub mod changeset;
pub mod error;
pub mod order;
pub mod pipeline;
pub mod position;
pub mod scheduler;
pub mod trade;

pub use account::{account_flux, AccountFetch, AccountFlux};
pub use changeset::{diff, preview, record, DeltaSet, Keyed, Remembered};
pub use error::FluxError;
pub use order::{order_flux, OrderFetch, OrderFlux, OrderPersist};
pub use pipeline::{Cycle, Detection, Fetch, Flux, FluxMetrics, IntoEvent, Passthrough, Persist};
pub use position::{position_flux, position_inbox, PositionFetch, PositionFlux, PositionInbox, PositionPersist};
pub use trade::{trade_flux, TradeFetch, TradeFlux, TradePersist};

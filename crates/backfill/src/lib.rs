//! # FluxSync Historical Backfill
//!
//! Downloads candle history for one instrument over a time range. The range
//! is split into pages no larger than the exchange serves in one call, each
//! page is fetched with a bounded number of attempts, and the pages are
//! concatenated in order into a list, a TSV file or the in-memory history
//! cache.

pub mod backfiller;
pub mod cache;
pub mod error;
pub mod gaps;
pub mod sink;

pub use backfiller::{Backfiller, GapProgress};
pub use cache::HistoryCache;
pub use error::BackfillError;
pub use gaps::{default_range, find_missing, split_gaps};
pub use sink::{file_name, write_tsv};

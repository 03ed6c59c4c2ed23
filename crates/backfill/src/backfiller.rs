use crate::cache::HistoryCache;
use crate::error::BackfillError;
use crate::gaps::{default_range, find_missing, split_gaps};
use crate::sink::{file_path, write_tsv};
use api_client::CandleSource;
use chrono::{DateTime, Utc};
use configuration::{BackfillConfig, MAX_BACKFILL_LENGTH};
use core_types::{Candle, Instrument, Interval, TimeGap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reported to the progress observer after each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapProgress {
    pub completed: usize,
    pub total: usize,
    /// Candles the page contributed; zero when it was given up.
    pub candles: usize,
}

type ProgressObserver = Box<dyn Fn(&GapProgress) + Send + Sync>;

/// Downloads candle history page by page.
///
/// Every page is retried up to the retry budget. A page that keeps failing
/// contributes nothing; the other pages are unaffected.
pub struct Backfiller {
    source: Arc<dyn CandleSource>,
    interval: Interval,
    page_len: i64,
    lookback: i64,
    retry_budget: u32,
    page_delay: Duration,
    range: Option<(i64, i64)>,
    cache: HistoryCache,
    progress: Option<ProgressObserver>,
}

impl Backfiller {
    pub fn new(source: Arc<dyn CandleSource>, config: &BackfillConfig) -> Self {
        if config.backfill_length > MAX_BACKFILL_LENGTH {
            warn!(
                requested = config.backfill_length,
                max = MAX_BACKFILL_LENGTH,
                "Page length exceeds what the exchange serves, clamping"
            );
        }
        Self {
            source,
            interval: config.interval,
            page_len: config.backfill_length.min(MAX_BACKFILL_LENGTH),
            lookback: config.lookback_buckets,
            retry_budget: config.retry_budget,
            page_delay: Duration::from_millis(config.page_delay_ms),
            range: None,
            cache: HistoryCache::new(),
            progress: None,
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_progress(mut self, observer: impl Fn(&GapProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    /// Replaces the default range (the last `lookback_buckets` completed
    /// buckets) with `[from, to)`.
    pub fn configure_range(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), BackfillError> {
        if from >= to {
            return Err(BackfillError::InvalidRange(format!(
                "start {} is not before end {}",
                from, to
            )));
        }
        self.range = Some((from.timestamp_millis(), to.timestamp_millis()));
        Ok(())
    }

    fn resolve_range(&self) -> (i64, i64) {
        self.range.unwrap_or_else(|| {
            default_range(
                Utc::now().timestamp_millis(),
                self.interval.as_millis(),
                self.lookback,
            )
        })
    }

    /// The pages the next backfill of `instrument` will request.
    pub fn gaps(&self, instrument: &Instrument) -> Vec<TimeGap> {
        let (start, end) = self.resolve_range();
        split_gaps(
            &instrument.symbol(),
            start,
            end,
            self.interval.as_millis(),
            self.page_len,
        )
    }

    /// Fetches every page of the range and concatenates them in page order.
    pub async fn backfill_to_list(&self, instrument: &Instrument) -> Vec<Candle> {
        let gaps = self.gaps(instrument);
        let total = gaps.len();
        info!(
            instrument = %instrument,
            interval = %self.interval,
            pages = total,
            "Starting backfill"
        );

        let mut candles = Vec::new();
        for (index, gap) in gaps.iter().enumerate() {
            let page = self.fetch_gap(gap).await;
            if let Some(observer) = &self.progress {
                observer(&GapProgress {
                    completed: index + 1,
                    total,
                    candles: page.len(),
                });
            }
            candles.extend(page);
        }

        info!(instrument = %instrument, candles = candles.len(), "Backfill finished");
        candles
    }

    async fn fetch_gap(&self, gap: &TimeGap) -> Vec<Candle> {
        for attempt in 1..=self.retry_budget {
            match self
                .source
                .fetch_candles(&gap.symbol, self.interval, gap.start_ms, gap.end_ms)
                .await
            {
                Ok(page) => {
                    debug!(symbol = %gap.symbol, start_ms = gap.start_ms, candles = page.len(), "Page fetched");
                    tokio::time::sleep(self.page_delay).await;
                    return page;
                }
                Err(e) => warn!(
                    symbol = %gap.symbol,
                    start_ms = gap.start_ms,
                    end_ms = gap.end_ms,
                    attempt,
                    error = %e,
                    "Page fetch failed"
                ),
            }
        }
        error!(
            symbol = %gap.symbol,
            start_ms = gap.start_ms,
            end_ms = gap.end_ms,
            attempts = self.retry_budget,
            "Giving up on page"
        );
        Vec::new()
    }

    /// Backfills into `<dir>/<base>-<quote>-<interval>.tsv`.
    ///
    /// Returns the path when a file was written, `None` when there was
    /// nothing to write or the file already existed.
    pub async fn backfill_to_file(
        &self,
        instrument: &Instrument,
        dir: &Path,
    ) -> Result<Option<PathBuf>, BackfillError> {
        let path = file_path(dir, instrument, self.interval);
        if path.exists() {
            info!(path = %path.display(), "History file already exists, skipping backfill");
            return Ok(None);
        }

        let candles = self.backfill_to_list(instrument).await;
        std::fs::create_dir_all(dir)?;
        let written = write_tsv(&path, &candles, self.interval)?;
        Ok(written.then_some(path))
    }

    /// Backfills, merges the result into the cache and returns everything
    /// cached for `instrument`.
    pub async fn cached_history(&self, instrument: &Instrument) -> Vec<Candle> {
        let candles = self.backfill_to_list(instrument).await;
        let added = self.cache.merge(instrument, candles);
        debug!(instrument = %instrument, added, "Merged into history cache");
        self.cache.get(instrument)
    }

    /// Buckets missing between consecutive candles of an ordered history.
    pub fn missing_ranges(&self, instrument: &Instrument, candles: &[Candle]) -> Vec<TimeGap> {
        find_missing(&instrument.symbol(), candles, self.interval.as_millis())
    }
}

use core_types::{Candle, TimeGap};

/// Splits `[start_ms, end_ms)` into pages of at most `page_len` buckets.
///
/// Full pages come first in chronological order, followed by one partial
/// page for the remainder. A trailing fraction of a bucket is not covered.
pub fn split_gaps(
    symbol: &str,
    start_ms: i64,
    end_ms: i64,
    bucket_ms: i64,
    page_len: i64,
) -> Vec<TimeGap> {
    if bucket_ms <= 0 || page_len <= 0 || end_ms <= start_ms {
        return Vec::new();
    }

    let buckets = (end_ms - start_ms) / bucket_ms;
    let page_ms = page_len * bucket_ms;
    let full_pages = buckets / page_len;
    let remainder = buckets % page_len;

    let mut gaps: Vec<TimeGap> = (0..full_pages)
        .map(|page| {
            let from = start_ms + page * page_ms;
            TimeGap::new(symbol, from, from + page_ms)
        })
        .collect();

    if remainder > 0 {
        let from = start_ms + full_pages * page_ms;
        gaps.push(TimeGap::new(symbol, from, from + remainder * bucket_ms));
    }
    gaps
}

/// The last `lookback` buckets ending at the most recently completed bucket
/// boundary before `now_ms`.
pub fn default_range(now_ms: i64, bucket_ms: i64, lookback: i64) -> (i64, i64) {
    let end = now_ms - now_ms.rem_euclid(bucket_ms);
    (end - lookback * bucket_ms, end)
}

/// Gaps between consecutive candles whose open times are more than one
/// bucket apart. `candles` must be ordered by open time.
pub fn find_missing(symbol: &str, candles: &[Candle], bucket_ms: i64) -> Vec<TimeGap> {
    candles
        .windows(2)
        .filter_map(|pair| {
            let expected = pair[0].open_time_ms() + bucket_ms;
            let actual = pair[1].open_time_ms();
            (actual > expected).then(|| TimeGap::new(symbol, expected, actual))
        })
        .collect()
}

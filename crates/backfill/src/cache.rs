use core_types::{Candle, Instrument};
use dashmap::DashMap;
use std::collections::HashSet;

/// Candle history per instrument, grown by additive merges.
#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: DashMap<Instrument, Vec<Candle>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the candles not already cached for `instrument` and keeps the
    /// list ordered by open time. Returns how many were added.
    pub fn merge(&self, instrument: &Instrument, candles: Vec<Candle>) -> usize {
        let mut entry = self.entries.entry(instrument.clone()).or_default();
        let mut present: HashSet<Candle> = entry.iter().cloned().collect();

        let before = entry.len();
        for candle in candles {
            if present.insert(candle.clone()) {
                entry.push(candle);
            }
        }
        let added = entry.len() - before;
        if added > 0 {
            entry.sort_by_key(|c| c.open_time);
        }
        added
    }

    pub fn get(&self, instrument: &Instrument) -> Vec<Candle> {
        self.entries
            .get(instrument)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn candle(hour: u32, close: i64) -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::from(close),
            volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
        }
    }

    #[test]
    fn merge_adds_only_new_candles_in_time_order() {
        let cache = HistoryCache::new();
        let btc = Instrument::new("BTC", "USDT");

        assert_eq!(cache.merge(&btc, vec![candle(2, 1), candle(0, 1)]), 2);
        assert_eq!(cache.merge(&btc, vec![candle(0, 1), candle(1, 1)]), 1);

        let history = cache.get(&btc);
        let hours: Vec<_> = history.iter().map(|c| c.open_time).collect();
        assert_eq!(
            hours,
            vec![candle(0, 1).open_time, candle(1, 1).open_time, candle(2, 1).open_time]
        );
    }

    #[test]
    fn instruments_are_cached_separately() {
        let cache = HistoryCache::new();
        cache.merge(&Instrument::new("BTC", "USDT"), vec![candle(0, 1)]);

        assert!(cache.get(&Instrument::new("ETH", "USDT")).is_empty());
    }
}

use crate::error::BackfillError;
use core_types::{Candle, Instrument, Interval};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// `BTC-USDT-1h.tsv` for BTC/USDT hourly candles.
pub fn file_name(instrument: &Instrument, interval: Interval) -> String {
    format!("{}-{}-{}.tsv", instrument.base, instrument.quote, interval)
}

/// Writes `candles` as headerless tab-separated rows to a new file at `path`.
///
/// Columns: bucket-end epoch seconds, open, close, high, low, volume, quote
/// volume. Returns `false` without touching the filesystem when there is
/// nothing to write, and `false` when the file already exists.
pub fn write_tsv(
    path: &Path,
    candles: &[Candle],
    interval: Interval,
) -> Result<bool, BackfillError> {
    if candles.is_empty() {
        info!(path = %path.display(), "No candles to write, skipping file");
        return Ok(false);
    }

    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!(path = %path.display(), "History file already exists, leaving it untouched");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file);

    let bucket_ms = interval.as_millis();
    for candle in candles {
        let bucket_end_secs = (candle.open_time_ms() + bucket_ms) / 1_000;
        writer.write_record([
            bucket_end_secs.to_string(),
            candle.open.to_string(),
            candle.close.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.volume.to_string(),
            candle.quote_volume.to_string(),
        ])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = candles.len(), "History file written");
    Ok(true)
}

/// The path [`write_tsv`] targets inside `dir`.
pub fn file_path(dir: &Path, instrument: &Instrument, interval: Interval) -> PathBuf {
    dir.join(file_name(instrument, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle() -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: dec!(42000.5),
            high: dec!(42100),
            low: dec!(41900),
            close: dec!(42050),
            volume: dec!(12.5),
            quote_volume: dec!(525000),
        }
    }

    #[test]
    fn names_files_after_both_legs_and_interval() {
        let name = file_name(&Instrument::new("btc", "usdt"), Interval::OneHour);
        assert_eq!(name, "BTC-USDT-1h.tsv");
    }

    #[test]
    fn writes_one_row_per_candle_in_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");

        assert!(write_tsv(&path, &[candle()], Interval::OneHour).unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        // 2024-01-01T01:00:00Z
        assert_eq!(contents, "1704070800\t42000.5\t42050\t42100\t41900\t12.5\t525000\n");
    }

    #[test]
    fn existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        std::fs::write(&path, "keep me").unwrap();

        assert!(!write_tsv(&path, &[candle()], Interval::OneHour).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn empty_list_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");

        assert!(!write_tsv(&path, &[], Interval::OneHour).unwrap());
        assert!(!path.exists());
    }
}

//! CSV file data adapter: one `<SYMBOL>.csv` per symbol in a directory.
//!
//! Columns are located by header name (`date`, `open`, `high`, `low`,
//! `close`, `volume`, case-insensitive), so extra columns such as
//! `adj_close` are ignored.

use crate::domain::error::RegimeTraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }
}

fn data_error(reason: String) -> RegimeTraderError {
    RegimeTraderError::Data { reason }
}

/// Index of each required column, by header name.
fn column_indices(headers: &csv::StringRecord) -> Result<[usize; 6], RegimeTraderError> {
    let mut indices = [0usize; 6];
    for (slot, name) in indices.iter_mut().zip(COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| data_error(format!("missing {} column", name)))?;
    }
    Ok(indices)
}

fn parse_field(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, RegimeTraderError> {
    record
        .get(index)
        .ok_or_else(|| data_error(format!("missing {} value", name)))?
        .trim()
        .parse()
        .map_err(|e| data_error(format!("invalid {} value: {}", name, e)))
}

impl DataPort for CsvAdapter {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, RegimeTraderError> {
        let path = self.csv_path(symbol);
        if !path.exists() {
            return Err(RegimeTraderError::NoData {
                symbol: symbol.to_string(),
            });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV header error: {}", e)))?
            .clone();
        let [date_i, open_i, high_i, low_i, close_i, volume_i] = column_indices(&headers)?;

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;

            let date_str = record
                .get(date_i)
                .ok_or_else(|| data_error("missing date value".into()))?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
                .map_err(|e| data_error(format!("invalid date format: {}", e)))?;

            if start_date.is_some_and(|s| date < s) || end_date.is_some_and(|e| date > e) {
                continue;
            }

            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                date,
                open: parse_field(&record, open_i, "open")?,
                high: parse_field(&record, high_i, "high")?,
                low: parse_field(&record, low_i, "low")?,
                close: parse_field(&record, close_i, "close")?,
                volume: parse_field(&record, volume_i, "volume")?.round() as i64,
            });
        }

        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        debug!(symbol, bars = bars.len(), path = %path.display(), "loaded price history");
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, RegimeTraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {}", e)))?;
            let path = entry.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if let (true, Some(stem)) = (is_csv, path.file_stem()) {
                symbols.push(stem.to_string_lossy().into_owned());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

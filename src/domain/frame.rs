//! Indicator frame: one symbol's bars plus the indicators computed over them.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub symbol: String,
    pub bars: Vec<OhlcvBar>,
    pub indicators: HashMap<IndicatorType, IndicatorSeries>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl IndicatorFrame {
    pub fn new(symbol: String, bars: Vec<OhlcvBar>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            symbol,
            bars,
            indicators: HashMap::new(),
            date_index,
        }
    }

    pub fn with_indicator(mut self, series: IndicatorSeries) -> Self {
        self.insert(series);
        self
    }

    pub fn insert(&mut self, series: IndicatorSeries) {
        self.indicators.insert(series.indicator_type.clone(), series);
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    /// Primary values of `indicator`, `NaN` for warm-up points. `None` if the
    /// indicator was not computed.
    pub fn column(&self, indicator: &IndicatorType) -> Option<Vec<f64>> {
        self.indicators.get(indicator).map(|s| s.primary_values())
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

/// Sorted union of the dates of several date sequences.
pub fn build_unified_timeline<'a, I>(series: I) -> Vec<NaiveDate>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = &'a NaiveDate>,
{
    let unique: BTreeSet<NaiveDate> = series.into_iter().flatten().copied().collect();
    unique.into_iter().collect()
}

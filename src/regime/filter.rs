/// Market regime filter from a broad-market reference instrument
///
/// A week is bullish when the reference closes no more than `margin` below its
/// trend indicator and the indicator is not falling:
/// - Bullish: close >= indicator * (1 - margin) and slope >= 0
/// - Bearish: anything else
///
/// With no reference data the filter fails open and lets every BUY through.
use chrono::NaiveDate;

use crate::models::{Instrument, WeeklyBar};
use crate::settings::RegimeSettings;
use crate::store::Store;
use crate::Result;

pub const DEFAULT_REGIME_MARGIN: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketRegime {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReferenceWeek {
    week_end: NaiveDate,
    close: f64,
    trend_indicator: f64,
    slope: f64,
}

/// Immutable snapshot of the reference series, built once per batch run
#[derive(Debug, Clone)]
pub struct MarketRegimeFilter {
    weeks: Vec<ReferenceWeek>,
    margin: f64,
}

impl Default for MarketRegimeFilter {
    fn default() -> Self {
        Self::empty()
    }
}

impl MarketRegimeFilter {
    /// Filter that treats every date as bullish
    pub fn empty() -> Self {
        Self {
            weeks: Vec::new(),
            margin: DEFAULT_REGIME_MARGIN,
        }
    }

    /// Build from the reference instrument's weekly bars
    ///
    /// Weeks without a trend indicator are dropped. A missing slope counts as 0.
    pub fn new(reference: &[WeeklyBar], margin: f64) -> Self {
        let mut weeks: Vec<ReferenceWeek> = reference
            .iter()
            .filter_map(|bar| {
                Some(ReferenceWeek {
                    week_end: bar.week_end_date,
                    close: bar.close,
                    trend_indicator: bar.trend_indicator?,
                    slope: bar.trend_slope.unwrap_or(0.0),
                })
            })
            .collect();
        weeks.sort_by_key(|w| w.week_end);

        Self { weeks, margin }
    }

    /// Load the reference series named in `settings`
    ///
    /// A reference symbol missing from the store yields an empty filter.
    pub async fn load(store: &dyn Store, settings: &RegimeSettings) -> Result<Self> {
        let Some(reference) = store.find_instrument(&settings.reference_symbol).await? else {
            tracing::warn!(
                "⚠️  Reference instrument {} not found, market filter disabled",
                settings.reference_symbol
            );
            return Ok(Self {
                weeks: Vec::new(),
                margin: settings.margin,
            });
        };

        Self::load_reference(store, &reference, settings.margin).await
    }

    /// Build the filter from an already resolved reference instrument
    pub async fn load_reference(store: &dyn Store, reference: &Instrument, margin: f64) -> Result<Self> {
        let bars = store.load_weekly_bars(reference.id).await?;
        let filter = Self::new(&bars, margin);

        if filter.is_empty() {
            tracing::warn!(
                "⚠️  No analysable weeks for {}, market filter disabled",
                reference.symbol
            );
        } else {
            tracing::info!(
                "Loaded market filter from {} ({} weeks)",
                reference.symbol,
                filter.len()
            );
        }

        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.weeks.len()
    }

    /// Regime of the latest reference week ending on or before `date`
    ///
    /// `None` when the filter is empty or `date` precedes the whole series.
    pub fn regime(&self, date: NaiveDate) -> Option<MarketRegime> {
        let idx = self.weeks.partition_point(|w| w.week_end <= date);
        let week = self.weeks.get(idx.checked_sub(1)?)?;

        let floor = week.trend_indicator * (1.0 - self.margin);
        if week.close >= floor && week.slope >= 0.0 {
            Some(MarketRegime::Bullish)
        } else {
            Some(MarketRegime::Bearish)
        }
    }

    pub fn is_bullish(&self, date: NaiveDate) -> bool {
        self.regime(date) != Some(MarketRegime::Bearish)
    }
}

pub mod aggregator;
pub mod validator;
pub mod week_boundary;

use chrono::NaiveDate;
use serde::Serialize;

use crate::indicators::{compute_slope, compute_trend_indicator};
use crate::models::{Instrument, WeeklyBar, WeeklyOhlcv};
use crate::pipeline::{run_batch, BatchOptions, BatchReport};
use crate::settings::AnalysisSettings;
use crate::store::Store;
use crate::{Error, Result};

pub use aggregator::{aggregate_daily_series, aggregate_week, group_by_week};
pub use validator::DailyBarValidator;
pub use week_boundary::{
    canonical_week_end, last_complete_week_end, week_ends_back, week_ends_between, week_start,
};

/// Coverage of an instrument's weekly series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyStats {
    pub total_weeks: usize,
    pub weeks_with_indicator: usize,
    pub ready_for_analysis: bool,
}

/// Builds and maintains stored weekly bars from daily bars
///
/// Work per instrument runs in three phases (OHLCV, trend indicator, slope),
/// each written in a single store call. Every phase reads what is stored, so
/// any of them can be re-run on its own.
pub struct WeeklyAggregator<'a> {
    store: &'a dyn Store,
    ma_period: usize,
    min_weeks_for_analysis: usize,
    options: BatchOptions,
}

impl<'a> WeeklyAggregator<'a> {
    pub fn new(store: &'a dyn Store, analysis: &AnalysisSettings) -> Self {
        Self {
            store,
            ma_period: analysis.ma_period,
            min_weeks_for_analysis: analysis.min_weeks_for_analysis,
            options: BatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Weeks to (re)build, oldest first
    ///
    /// The last `weeks_back` complete weeks as of `as_of`, or every week since
    /// the first daily bar when `weeks_back` is 0.
    pub async fn target_weeks(
        &self,
        instrument: &Instrument,
        weeks_back: usize,
        as_of: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let last = last_complete_week_end(as_of);

        if weeks_back > 0 {
            let mut weeks = week_ends_back(last, weeks_back);
            weeks.reverse();
            return Ok(weeks);
        }

        Ok(match self.store.first_daily_date(instrument.id).await? {
            Some(first) => week_ends_between(first, last),
            None => Vec::new(),
        })
    }

    /// Run all three phases for one instrument; returns weeks aggregated
    ///
    /// A failing phase does not stop the later ones. The first error is
    /// returned once all phases have run.
    pub async fn aggregate_instrument(
        &self,
        instrument: &Instrument,
        weeks_back: usize,
        as_of: NaiveDate,
    ) -> Result<usize> {
        let targets = self.target_weeks(instrument, weeks_back, as_of).await?;
        if targets.is_empty() {
            tracing::debug!("{}: no weeks to aggregate", instrument.symbol);
            return Ok(0);
        }

        let mut first_error: Option<Error> = None;

        let aggregated = match self.aggregate_ohlcv(instrument, &targets).await {
            Ok(count) => count,
            Err(e) => {
                record_failure(&mut first_error, "OHLCV", instrument, e);
                0
            }
        };

        if let Err(e) = self.update_indicators(instrument, &targets).await {
            record_failure(&mut first_error, "trend indicator", instrument, e);
        }

        if let Err(e) = self.update_slopes(instrument, &targets).await {
            record_failure(&mut first_error, "slope", instrument, e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!(
                    "{}: aggregated {} of {} target weeks",
                    instrument.symbol,
                    aggregated,
                    targets.len()
                );
                Ok(aggregated)
            }
        }
    }

    pub async fn aggregate_all(&self, weeks_back: usize, as_of: NaiveDate) -> Result<BatchReport> {
        let instruments = self.store.active_instruments().await?;
        tracing::info!(
            "Aggregating weekly bars for {} instruments (weeks_back={}, as of {})",
            instruments.len(),
            weeks_back,
            as_of
        );

        Ok(run_batch("weekly aggregation", &instruments, self.options, |instrument| {
            self.aggregate_instrument(instrument, weeks_back, as_of)
        })
        .await)
    }

    pub async fn weekly_stats(&self, instrument: &Instrument) -> Result<WeeklyStats> {
        let weeks = self.store.load_weekly_bars(instrument.id).await?;
        let weeks_with_indicator = weeks.iter().filter(|w| w.trend_indicator.is_some()).count();

        Ok(WeeklyStats {
            total_weeks: weeks.len(),
            weeks_with_indicator,
            ready_for_analysis: weeks_with_indicator >= self.min_weeks_for_analysis,
        })
    }

    /// Phase 1: fold daily bars into weekly OHLCV
    async fn aggregate_ohlcv(&self, instrument: &Instrument, targets: &[NaiveDate]) -> Result<usize> {
        let (Some(&first), Some(&last)) = (targets.first(), targets.last()) else {
            return Ok(0);
        };

        let daily = self
            .store
            .load_daily_bars(instrument.id, week_start(first), last)
            .await?;
        let (daily, rejected) = DailyBarValidator::new().filter_valid(daily);
        if rejected > 0 {
            tracing::warn!("{}: skipped {} invalid daily bars", instrument.symbol, rejected);
        }

        let buckets = group_by_week(daily);
        let mut weeks: Vec<(NaiveDate, WeeklyOhlcv)> = Vec::with_capacity(targets.len());

        for &week_end in targets {
            let bars: Vec<_> = buckets
                .get(&week_end)
                .map(|bars| {
                    bars.iter()
                        .filter(|b| b.date >= week_start(week_end) && b.date <= week_end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            match aggregate_week(&bars) {
                Some(ohlcv) => weeks.push((week_end, ohlcv)),
                None => tracing::debug!("{}: no daily bars for week {}", instrument.symbol, week_end),
            }
        }

        if !weeks.is_empty() {
            self.store.upsert_weekly_ohlcv(instrument.id, &weeks).await?;
        }

        Ok(weeks.len())
    }

    /// Phase 2: trend indicator from the stored closes ending at each week
    async fn update_indicators(&self, instrument: &Instrument, targets: &[NaiveDate]) -> Result<()> {
        let bars = self.store.load_weekly_bars(instrument.id).await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let values: Vec<(NaiveDate, Option<f64>)> = targets
            .iter()
            .filter_map(|&week_end| {
                position(&bars, week_end).map(|i| {
                    (week_end, compute_trend_indicator(&closes[..=i], self.ma_period))
                })
            })
            .collect();

        if !values.is_empty() {
            self.store.update_trend_indicators(instrument.id, &values).await?;
        }
        Ok(())
    }

    /// Phase 3: slope against the previous stored week's indicator
    async fn update_slopes(&self, instrument: &Instrument, targets: &[NaiveDate]) -> Result<()> {
        let bars = self.store.load_weekly_bars(instrument.id).await?;

        let values: Vec<(NaiveDate, Option<f64>)> = targets
            .iter()
            .filter_map(|&week_end| {
                position(&bars, week_end).map(|i| {
                    let previous = i.checked_sub(1).and_then(|p| bars[p].trend_indicator);
                    (week_end, compute_slope(bars[i].trend_indicator, previous))
                })
            })
            .collect();

        if !values.is_empty() {
            self.store.update_trend_slopes(instrument.id, &values).await?;
        }
        Ok(())
    }
}

fn position(bars: &[WeeklyBar], week_end: NaiveDate) -> Option<usize> {
    bars.binary_search_by_key(&week_end, |b| b.week_end_date).ok()
}

fn record_failure(slot: &mut Option<Error>, phase: &str, instrument: &Instrument, e: Error) {
    tracing::error!("{}: {} phase failed: {}", instrument.symbol, phase, e);
    slot.get_or_insert(e);
}

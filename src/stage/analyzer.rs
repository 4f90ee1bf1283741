use chrono::NaiveDate;
use serde::Serialize;

use super::classifier::{StageClassifier, StageFold};
use crate::models::{Instrument, Stage, WeeklyBar};
use crate::pipeline::{run_batch, BatchOptions, BatchReport};
use crate::store::Store;
use crate::Result;

/// One row of a stage history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageHistoryEntry {
    pub week_end_date: NaiveDate,
    pub stage: Stage,
    pub close: f64,
    pub trend_indicator: Option<f64>,
    pub trend_slope: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub symbol: String,
    pub current_stage: Stage,
    /// Consecutive most recent weeks in `current_stage`
    pub weeks_in_stage: usize,
    /// Oldest first
    pub history: Vec<StageHistoryEntry>,
}

/// Writes stages for stored weekly bars
pub struct StageAnalyzer<'a> {
    store: &'a dyn Store,
    classifier: StageClassifier,
    options: BatchOptions,
}

impl<'a> StageAnalyzer<'a> {
    pub fn new(store: &'a dyn Store, classifier: StageClassifier) -> Self {
        Self {
            store,
            classifier,
            options: BatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Re-classify the last `weeks_back` analysable weeks (0 = all)
    ///
    /// The fold is seeded with the stored stage of the week just before the
    /// window. Only weeks whose stage changes are written. Returns how many.
    pub async fn analyze_instrument(&self, instrument: &Instrument, weeks_back: usize) -> Result<usize> {
        let weeks: Vec<WeeklyBar> = self
            .store
            .load_weekly_bars(instrument.id)
            .await?
            .into_iter()
            .filter(|w| w.trend_indicator.is_some())
            .collect();

        if weeks.is_empty() {
            tracing::debug!("{}: no weeks with a trend indicator yet", instrument.symbol);
            return Ok(0);
        }

        let start = if weeks_back == 0 {
            0
        } else {
            weeks.len().saturating_sub(weeks_back)
        };
        let seed = start.checked_sub(1).and_then(|i| weeks[i].stage);

        let mut fold = StageFold::new(self.classifier, seed);
        let changes: Vec<(NaiveDate, Stage)> = weeks[start..]
            .iter()
            .filter_map(|week| {
                let stage = fold.push(week);
                (week.stage != Some(stage)).then_some((week.week_end_date, stage))
            })
            .collect();

        if !changes.is_empty() {
            self.store.update_stages(instrument.id, &changes).await?;
        }

        tracing::debug!(
            "{}: analysed {} weeks, {} stage changes, now {}",
            instrument.symbol,
            weeks.len() - start,
            changes.len(),
            fold.previous().map(|s| s.to_string()).unwrap_or_default()
        );

        Ok(changes.len())
    }

    pub async fn analyze_all(&self, weeks_back: usize) -> Result<BatchReport> {
        let instruments = self.store.active_instruments().await?;
        tracing::info!(
            "Analyzing stages for {} instruments (weeks_back={})",
            instruments.len(),
            weeks_back
        );

        Ok(run_batch("stage analysis", &instruments, self.options, |instrument| {
            self.analyze_instrument(instrument, weeks_back)
        })
        .await)
    }

    /// Current stage plus the last `weeks` classified weeks
    ///
    /// `None` when the instrument has no classified week.
    pub async fn stage_summary(&self, instrument: &Instrument, weeks: usize) -> Result<Option<StageSummary>> {
        let classified: Vec<(WeeklyBar, Stage)> = self
            .store
            .load_weekly_bars(instrument.id)
            .await?
            .into_iter()
            .filter_map(|w| w.stage.map(|s| (w, s)))
            .collect();

        let Some(&(_, current_stage)) = classified.last() else {
            return Ok(None);
        };

        let weeks_in_stage = classified
            .iter()
            .rev()
            .take_while(|(_, s)| *s == current_stage)
            .count();

        let start = classified.len().saturating_sub(weeks);
        let history = classified[start..]
            .iter()
            .map(|(w, stage)| StageHistoryEntry {
                week_end_date: w.week_end_date,
                stage: *stage,
                close: w.close,
                trend_indicator: w.trend_indicator,
                trend_slope: w.trend_slope,
            })
            .collect();

        Ok(Some(StageSummary {
            symbol: instrument.symbol.clone(),
            current_stage,
            weeks_in_stage,
            history,
        }))
    }

    /// Active instruments whose latest weekly bar is in `stage`
    pub async fn instruments_in_stage(&self, stage: Stage) -> Result<Vec<(Instrument, WeeklyBar)>> {
        let instruments = self.store.active_instruments().await?;
        let latest = self.store.latest_weekly_bars().await?;

        Ok(instruments
            .into_iter()
            .filter_map(|instrument| {
                latest
                    .iter()
                    .find(|w| w.instrument_id == instrument.id && w.stage == Some(stage))
                    .map(|w| (instrument, w.clone()))
            })
            .collect())
    }
}

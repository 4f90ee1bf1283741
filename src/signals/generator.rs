use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::breakout::{BreakoutCheck, BreakoutValidator};
use crate::models::{Instrument, Signal, SignalKey, SignalType, Stage, WeeklyBar};
use crate::pipeline::{run_batch, BatchOptions, BatchReport};
use crate::regime::MarketRegimeFilter;
use crate::settings::RegimeSettings;
use crate::stage::StageClassifier;
use crate::store::Store;
use crate::Result;

/// Signal type for a transition between two stored stages
///
/// Only exits are reported here: Advance/Top → Decline is a SELL and
/// Advance → Top a STAGE_CHANGE. BUYs need the breakout checks and come from
/// a separate sweep.
pub fn classify_transition(from: Stage, to: Stage) -> Option<SignalType> {
    match (from, to) {
        (Stage::Advance | Stage::Top, Stage::Decline) => Some(SignalType::Sell),
        (Stage::Advance, Stage::Top) => Some(SignalType::StageChange),
        _ => None,
    }
}

/// A signal joined with its instrument for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalView {
    pub symbol: String,
    pub name: Option<String>,
    pub signal: Signal,
}

pub struct SignalGenerator<'a> {
    store: &'a dyn Store,
    classifier: StageClassifier,
    breakout: BreakoutValidator,
    regime: RegimeSettings,
    options: BatchOptions,
}

impl<'a> SignalGenerator<'a> {
    pub fn new(
        store: &'a dyn Store,
        classifier: StageClassifier,
        breakout: BreakoutValidator,
        regime: RegimeSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            breakout,
            regime,
            options: BatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Signals implied by a chronological weekly series
    ///
    /// Only signals dated on or after `cutoff` are returned; earlier weeks
    /// still serve as lookback. The result is ordered by key and free of
    /// duplicates.
    pub fn detect_signals(
        &self,
        instrument_id: i64,
        weeks: &[WeeklyBar],
        regime: &MarketRegimeFilter,
        cutoff: Option<NaiveDate>,
    ) -> Vec<Signal> {
        let in_window = |date: NaiveDate| cutoff.map_or(true, |c| date >= c);
        let mut signals: BTreeMap<SignalKey, Signal> = BTreeMap::new();

        // BUY sweep over weeks with both indicator and slope
        let series: Vec<WeeklyBar> = weeks
            .iter()
            .filter(|w| w.trend_indicator.is_some() && w.trend_slope.is_some())
            .cloned()
            .collect();

        let mut previous = None;
        let stages: Vec<Stage> = series
            .iter()
            .map(|week| {
                let stage = week
                    .stage
                    .unwrap_or_else(|| self.classifier.classify_bar(week, previous));
                previous = Some(stage);
                stage
            })
            .collect();

        for i in 1..series.len() {
            let week = &series[i];
            if stages[i - 1] != Stage::Base || stages[i] != Stage::Advance || !in_window(week.week_end_date) {
                continue;
            }

            let check = self.breakout.evaluate(&series, i);
            if check != BreakoutCheck::Valid {
                tracing::debug!("Breakout rejected at {}: {:?}", week.week_end_date, check);
                continue;
            }
            if !regime.is_bullish(week.week_end_date) {
                tracing::debug!("Breakout at {} blocked by bearish market", week.week_end_date);
                continue;
            }

            let signal = Signal::new(
                instrument_id,
                week.week_end_date,
                SignalType::Buy,
                Stage::Base,
                Stage::Advance,
                week.close,
                week.trend_indicator,
            );
            signals.entry(signal.key()).or_insert(signal);
        }

        // SELL / STAGE_CHANGE sweep over consecutive staged weeks
        let staged: Vec<(&WeeklyBar, Stage)> = weeks
            .iter()
            .filter_map(|w| w.stage.map(|s| (w, s)))
            .collect();

        for pair in staged.windows(2) {
            let (_, from) = pair[0];
            let (week, to) = pair[1];
            if !in_window(week.week_end_date) {
                continue;
            }
            if let Some(signal_type) = classify_transition(from, to) {
                let signal = Signal::new(
                    instrument_id,
                    week.week_end_date,
                    signal_type,
                    from,
                    to,
                    week.close,
                    week.trend_indicator,
                );
                signals.entry(signal.key()).or_insert(signal);
            }
        }

        signals.into_values().collect()
    }

    /// Generate and store signals for one instrument; returns how many were new
    ///
    /// `weeks_back = 0` covers the full history, otherwise only signals dated
    /// within the instrument's last `weeks_back` weekly bars are emitted.
    pub async fn generate_signals_for_instrument(
        &self,
        instrument: &Instrument,
        weeks_back: usize,
        regime: &MarketRegimeFilter,
    ) -> Result<usize> {
        let weeks = self.store.load_weekly_bars(instrument.id).await?;
        if weeks.len() < 2 {
            tracing::debug!("{}: not enough weekly bars for signals", instrument.symbol);
            return Ok(0);
        }

        let cutoff = (weeks_back > 0 && weeks.len() > weeks_back)
            .then(|| weeks[weeks.len() - weeks_back].week_end_date);

        let signals = self.detect_signals(instrument.id, &weeks, regime, cutoff);
        if signals.is_empty() {
            return Ok(0);
        }

        let created = self.store.insert_signals(&signals).await?;
        for signal in &signals {
            tracing::debug!(
                "{}: {} on {} (stage {} → {})",
                instrument.symbol,
                signal.signal_type,
                signal.date,
                signal.stage_from.number(),
                signal.stage_to.number()
            );
        }
        if created > 0 {
            tracing::info!("✓ {}: {} new signals", instrument.symbol, created);
        }

        Ok(created)
    }

    /// Generate signals for every active instrument against one regime snapshot
    ///
    /// An unreadable reference series counts as a failure of the reference
    /// instrument only; the filter then fails open for everyone else.
    pub async fn generate_signals_for_all(&self, weeks_back: usize) -> Result<BatchReport> {
        let instruments = self.store.active_instruments().await?;
        let (regime, reference_failure) = self.regime_snapshot().await;
        tracing::info!(
            "Generating signals for {} instruments (weeks_back={})",
            instruments.len(),
            weeks_back
        );

        let regime = &regime;
        let mut report = run_batch("signal generation", &instruments, self.options, |instrument| {
            self.generate_signals_for_instrument(instrument, weeks_back, regime)
        })
        .await;

        if let Some(reference_id) = reference_failure {
            report.record_failure(reference_id);
        }
        Ok(report)
    }

    /// Regime filter for this run, plus the reference id if loading it failed
    async fn regime_snapshot(&self) -> (MarketRegimeFilter, Option<i64>) {
        let symbol = &self.regime.reference_symbol;

        let reference = match self.store.find_instrument(symbol).await {
            Ok(Some(reference)) => reference,
            Ok(None) => {
                tracing::warn!("⚠️  Reference instrument {} not found, market filter disabled", symbol);
                return (MarketRegimeFilter::empty(), None);
            }
            Err(e) => {
                tracing::error!("Market filter lookup for {} failed, BUYs unfiltered: {}", symbol, e);
                return (MarketRegimeFilter::empty(), None);
            }
        };

        match MarketRegimeFilter::load_reference(self.store, &reference, self.regime.margin).await {
            Ok(filter) => (filter, None),
            Err(e) => {
                tracing::error!(
                    "Market filter for {} (id {}) failed, BUYs unfiltered: {}",
                    reference.symbol,
                    reference.id,
                    e
                );
                (MarketRegimeFilter::empty(), Some(reference.id))
            }
        }
    }

    /// Signals dated on or after `since`, newest first
    pub async fn recent_signals(
        &self,
        since: NaiveDate,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<SignalView>> {
        let signals = self.store.recent_signals(since, signal_type).await?;
        self.with_instruments(signals).await
    }

    pub async fn unnotified_signals(&self) -> Result<Vec<SignalView>> {
        let signals = self.store.unnotified_signals().await?;
        self.with_instruments(signals).await
    }

    pub async fn mark_notified(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let updated = self.store.mark_notified(ids).await?;
        tracing::info!("Marked {} signals as notified", updated);
        Ok(updated)
    }

    async fn with_instruments(&self, signals: Vec<Signal>) -> Result<Vec<SignalView>> {
        let instruments: HashMap<i64, Instrument> = self
            .store
            .active_instruments()
            .await?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        Ok(signals
            .into_iter()
            .map(|signal| {
                let instrument = instruments.get(&signal.instrument_id);
                SignalView {
                    symbol: instrument
                        .map(|i| i.symbol.clone())
                        .unwrap_or_else(|| format!("ID:{}", signal.instrument_id)),
                    name: instrument.and_then(|i| i.name.clone()),
                    signal,
                }
            })
            .collect())
    }
}

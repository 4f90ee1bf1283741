use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::Mutex;
use uuid::Uuid;

use stagewatch::pipeline::WeeklyPipeline;
use stagewatch::settings::Settings;
use stagewatch::store::{MarketStore, MemoryStore, SignalStore, WeeklyStore};
use stagewatch::synthetic::{MarketScenario, SyntheticDataGenerator};
use stagewatch::*;

fn week_end(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap() + Duration::weeks(i as i64)
}

fn make_week(instrument_id: i64, i: usize, close: f64, ti: f64, slope: f64, stage: Stage) -> WeeklyBar {
    let mut bar = WeeklyBar::from_ohlcv(
        instrument_id,
        week_end(i),
        WeeklyOhlcv {
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000,
        },
    );
    bar.trend_indicator = Some(ti);
    bar.trend_slope = Some(slope);
    bar.stage = Some(stage);
    bar
}

/// Stages [1, 1, 1, 2, 2, 4] with a clean breakout at the fourth week
fn six_week_series(instrument_id: i64) -> Vec<WeeklyBar> {
    vec![
        make_week(instrument_id, 0, 100.0, 100.0, 0.0, Stage::Base),
        make_week(instrument_id, 1, 100.0, 100.0, 0.0, Stage::Base),
        make_week(instrument_id, 2, 100.0, 100.0, 0.0, Stage::Base),
        make_week(instrument_id, 3, 106.0, 100.5, 0.025, Stage::Advance),
        make_week(instrument_id, 4, 110.0, 103.0, 0.025, Stage::Advance),
        make_week(instrument_id, 5, 90.0, 102.0, -0.03, Stage::Decline),
    ]
}

/// Short base so six weeks are enough history for a breakout
fn short_base_settings() -> Settings {
    let mut settings = Settings::default();
    settings.breakout.base_weeks = 2;
    settings.breakout.min_history_weeks = 1;
    settings.breakout.max_base_misses = 0;
    settings
}

#[tokio::test]
async fn test_stage_sequence_emits_one_buy_and_one_sell() {
    let store = MemoryStore::new();
    let instrument = store.add_instrument("ACME", Some("Acme Corp")).unwrap();
    store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();

    let settings = short_base_settings();
    let pipeline = WeeklyPipeline::new(&store, &settings);
    let report = pipeline.generator().generate_signals_for_all(0).await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.changed, 2);

    let signals = store.load_signals(instrument.id).await.unwrap();
    assert_eq!(signals.len(), 2);

    assert_eq!(signals[0].signal_type, SignalType::Buy);
    assert_eq!(signals[0].date, week_end(3));
    assert_eq!((signals[0].stage_from, signals[0].stage_to), (Stage::Base, Stage::Advance));

    assert_eq!(signals[1].signal_type, SignalType::Sell);
    assert_eq!(signals[1].date, week_end(5));
    assert_eq!((signals[1].stage_from, signals[1].stage_to), (Stage::Advance, Stage::Decline));
    assert_eq!(signals[1].price, 90.0);

    assert!(signals.iter().all(|s| s.signal_type != SignalType::StageChange));
}

#[test]
fn test_six_week_series_matches_default_classifier() {
    let classifier = WeeklyPipeline::new(&MemoryStore::new(), &Settings::default()).classifier();
    let mut previous = None;
    for week in six_week_series(1) {
        let stage = classifier.classify_bar(&week, previous);
        assert_eq!(Some(stage), week.stage, "week ending {}", week.week_end_date);
        previous = Some(stage);
    }
}

#[tokio::test]
async fn test_signal_generation_is_idempotent() {
    let store = MemoryStore::new();
    let instrument = store.add_instrument("ACME", None).unwrap();
    store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();

    let settings = short_base_settings();
    let generator = WeeklyPipeline::new(&store, &settings).generator();

    let first = generator.generate_signals_for_all(0).await.unwrap();
    let second = generator.generate_signals_for_all(0).await.unwrap();

    assert_eq!(first.changed, 2);
    assert_eq!(second.changed, 0);
    assert!(second.is_clean());
    assert_eq!(store.all_signals().unwrap().len(), 2);
}

#[tokio::test]
async fn test_signal_window_limits_emitted_dates() {
    let store = MemoryStore::new();
    let instrument = store.add_instrument("ACME", None).unwrap();
    store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();

    let settings = short_base_settings();
    let generator = WeeklyPipeline::new(&store, &settings).generator();

    // Last two weeks only: the breakout is lookback, the break down is in range
    generator.generate_signals_for_all(2).await.unwrap();
    let signals = store.load_signals(instrument.id).await.unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].signal_type, SignalType::Sell);

    // Widening the window later only adds the missing signal
    let report = generator.generate_signals_for_all(0).await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(store.load_signals(instrument.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_bearish_reference_blocks_buy() {
    let store = MemoryStore::new();
    let instrument = store.add_instrument("ACME", None).unwrap();
    store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();

    // Reference market far below its falling trend indicator
    let spy = store.add_instrument("SPY", None).unwrap();
    let reference: Vec<WeeklyBar> = (0..6)
        .map(|i| make_week(spy.id, i, 80.0, 100.0, -0.01, Stage::Decline))
        .collect();
    store.put_weekly_bars(&reference).unwrap();

    let settings = short_base_settings();
    WeeklyPipeline::new(&store, &settings)
        .generator()
        .generate_signals_for_all(0)
        .await
        .unwrap();

    let signals = store.load_signals(instrument.id).await.unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].signal_type, SignalType::Sell);
}

#[tokio::test]
async fn test_full_pipeline_on_synthetic_cycle() {
    let store = MemoryStore::new();
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let weeks = 104;

    let instrument = store.add_instrument("CYCLE", None).unwrap();
    let bars = SyntheticDataGenerator::new(42).generate(MarketScenario::StageCycle, weeks, start);
    store.insert_daily_bars(instrument.id, &bars).unwrap();

    let mut settings = Settings::default();
    settings.analysis.slope_entry_threshold = 0.002;
    settings.analysis.slope_exit_threshold = 0.001;
    settings.batch.aggregate_weeks_back = 0;
    settings.batch.analyze_weeks_back = 0;
    settings.batch.signal_weeks_back = 0;

    let as_of = start + Duration::weeks(weeks as i64 + 1);
    let report = WeeklyPipeline::new(&store, &settings).run(as_of).await;

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.aggregation.changed, weeks);

    let weekly = store.load_weekly_bars(instrument.id).await.unwrap();
    assert_eq!(weekly.len(), weeks);
    assert!(weekly.iter().all(|w| w.week_end_date.format("%a").to_string() == "Fri"));

    // No indicator before 30 weeks of closes, so no stage either
    assert!(weekly[..29].iter().all(|w| w.trend_indicator.is_none() && w.stage.is_none()));
    assert!(weekly[29..].iter().all(|w| w.trend_indicator.is_some() && w.stage.is_some()));

    let stages: Vec<Stage> = weekly.iter().filter_map(|w| w.stage).collect();
    assert!(stages.contains(&Stage::Advance));
    assert!(stages.contains(&Stage::Decline));
    for pair in stages.windows(2) {
        assert!(
            !(pair[0] == Stage::Base && pair[1] == Stage::Top),
            "Base must not jump straight to Top"
        );
    }

    // Re-running the same week changes nothing
    let rerun = WeeklyPipeline::new(&store, &settings).run(as_of).await;
    assert_eq!(rerun.analysis.changed, 0);
    assert_eq!(rerun.signals.changed, 0);
    assert_eq!(store.load_weekly_bars(instrument.id).await.unwrap(), weekly);
}

#[tokio::test]
async fn test_budget_exhausted_skips_instruments() {
    let store = MemoryStore::new();
    for symbol in ["AAA", "BBB", "CCC"] {
        let instrument = store.add_instrument(symbol, None).unwrap();
        store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();
    }

    let mut settings = short_base_settings();
    settings.batch.budget_secs = Some(0);

    let report = WeeklyPipeline::new(&store, &settings).run(week_end(6)).await;

    assert_eq!(report.signals.total, 3);
    assert_eq!(report.signals.skipped, 3);
    assert!(store.all_signals().unwrap().is_empty());
}

/// Which store calls fail for the chosen instrument
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    Reads,
    IndicatorWrites,
    SignalWrites,
}

/// Delegates to a `MemoryStore`, failing one kind of call for one instrument
///
/// Successful weekly writes are logged per instrument.
struct FailingStore {
    inner: MemoryStore,
    failing_id: i64,
    fault: Fault,
    writes: Mutex<Vec<(i64, &'static str)>>,
}

impl FailingStore {
    fn new(inner: MemoryStore, failing_id: i64, fault: Fault) -> Self {
        Self {
            inner,
            failing_id,
            fault,
            writes: Mutex::new(Vec::new()),
        }
    }

    fn check(&self, instrument_id: i64, fault: Fault, call: &str) -> Result<()> {
        if instrument_id == self.failing_id && fault == self.fault {
            return Err(Error::Persistence(format!(
                "{} failed for instrument {}",
                call, instrument_id
            )));
        }
        Ok(())
    }

    fn log_write(&self, instrument_id: i64, call: &'static str) {
        self.writes.lock().unwrap().push((instrument_id, call));
    }

    fn writes_for(&self, instrument_id: i64) -> Vec<&'static str> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == instrument_id)
            .map(|(_, call)| *call)
            .collect()
    }
}

#[async_trait]
impl MarketStore for FailingStore {
    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        self.inner.active_instruments().await
    }

    async fn find_instrument(&self, symbol: &str) -> Result<Option<Instrument>> {
        self.inner.find_instrument(symbol).await
    }

    async fn load_daily_bars(&self, instrument_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyBar>> {
        self.check(instrument_id, Fault::Reads, "load_daily_bars")?;
        self.inner.load_daily_bars(instrument_id, from, to).await
    }

    async fn first_daily_date(&self, instrument_id: i64) -> Result<Option<NaiveDate>> {
        self.inner.first_daily_date(instrument_id).await
    }
}

#[async_trait]
impl WeeklyStore for FailingStore {
    async fn load_weekly_bars(&self, instrument_id: i64) -> Result<Vec<WeeklyBar>> {
        self.check(instrument_id, Fault::Reads, "load_weekly_bars")?;
        self.inner.load_weekly_bars(instrument_id).await
    }

    async fn upsert_weekly_ohlcv(&self, instrument_id: i64, weeks: &[(NaiveDate, WeeklyOhlcv)]) -> Result<()> {
        self.inner.upsert_weekly_ohlcv(instrument_id, weeks).await?;
        self.log_write(instrument_id, "upsert_weekly_ohlcv");
        Ok(())
    }

    async fn update_trend_indicators(&self, instrument_id: i64, values: &[(NaiveDate, Option<f64>)]) -> Result<()> {
        self.check(instrument_id, Fault::IndicatorWrites, "update_trend_indicators")?;
        self.inner.update_trend_indicators(instrument_id, values).await?;
        self.log_write(instrument_id, "update_trend_indicators");
        Ok(())
    }

    async fn update_trend_slopes(&self, instrument_id: i64, values: &[(NaiveDate, Option<f64>)]) -> Result<()> {
        self.inner.update_trend_slopes(instrument_id, values).await?;
        self.log_write(instrument_id, "update_trend_slopes");
        Ok(())
    }

    async fn update_stages(&self, instrument_id: i64, values: &[(NaiveDate, Stage)]) -> Result<()> {
        self.inner.update_stages(instrument_id, values).await?;
        self.log_write(instrument_id, "update_stages");
        Ok(())
    }

    async fn latest_weekly_bars(&self) -> Result<Vec<WeeklyBar>> {
        self.inner.latest_weekly_bars().await
    }
}

#[async_trait]
impl SignalStore for FailingStore {
    async fn insert_signal_if_absent(&self, signal: &Signal) -> Result<bool> {
        self.check(signal.instrument_id, Fault::SignalWrites, "insert_signal_if_absent")?;
        self.inner.insert_signal_if_absent(signal).await
    }

    async fn load_signals(&self, instrument_id: i64) -> Result<Vec<Signal>> {
        self.inner.load_signals(instrument_id).await
    }

    async fn recent_signals(&self, since: NaiveDate, signal_type: Option<SignalType>) -> Result<Vec<Signal>> {
        self.inner.recent_signals(since, signal_type).await
    }

    async fn unnotified_signals(&self) -> Result<Vec<Signal>> {
        self.inner.unnotified_signals().await
    }

    async fn mark_notified(&self, ids: &[Uuid]) -> Result<u64> {
        self.inner.mark_notified(ids).await
    }
}

/// Three instruments on the six-week series, one of them behind `fault`
fn three_instruments(fault: Fault) -> (FailingStore, Vec<i64>) {
    let inner = MemoryStore::new();
    let mut ids = Vec::new();
    for symbol in ["AAA", "BBB", "CCC"] {
        let instrument = inner.add_instrument(symbol, None).unwrap();
        inner.put_weekly_bars(&six_week_series(instrument.id)).unwrap();
        ids.push(instrument.id);
    }
    let failing_id = ids[1];
    (FailingStore::new(inner, failing_id, fault), ids)
}

#[tokio::test]
async fn test_failing_instrument_does_not_stop_batch() {
    let (store, ids) = three_instruments(Fault::Reads);

    let settings = short_base_settings();
    let pipeline = WeeklyPipeline::new(&store, &settings);

    let signals = pipeline.generator().generate_signals_for_all(0).await.unwrap();
    assert_eq!(signals.total, 3);
    assert_eq!(signals.failed_ids, vec![ids[1]]);
    assert!(!signals.is_clean());

    assert_eq!(store.inner.load_signals(ids[0]).await.unwrap().len(), 2);
    assert!(store.inner.load_signals(ids[1]).await.unwrap().is_empty());
    assert_eq!(store.inner.load_signals(ids[2]).await.unwrap().len(), 2);

    let analysis = pipeline.analyzer().analyze_all(0).await.unwrap();
    assert_eq!(analysis.failed, 1);
    assert_eq!(analysis.failed_ids, vec![ids[1]]);
    assert_eq!(analysis.succeeded, 2);
}

#[tokio::test]
async fn test_signal_write_failure_is_isolated() {
    let (store, ids) = three_instruments(Fault::SignalWrites);

    let settings = short_base_settings();
    let report = WeeklyPipeline::new(&store, &settings)
        .generator()
        .generate_signals_for_all(0)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed_ids, vec![ids[1]]);
    assert_eq!(report.changed, 4);

    assert_eq!(store.inner.load_signals(ids[0]).await.unwrap().len(), 2);
    assert!(store.inner.load_signals(ids[1]).await.unwrap().is_empty());
    assert_eq!(store.inner.load_signals(ids[2]).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreadable_reference_fails_open() {
    let inner = MemoryStore::new();
    let acme = inner.add_instrument("ACME", None).unwrap();
    inner.put_weekly_bars(&six_week_series(acme.id)).unwrap();

    // A bearish reference that would block the BUY if it could be read
    let spy = inner.add_instrument("SPY", None).unwrap();
    let reference: Vec<WeeklyBar> = (0..6)
        .map(|i| make_week(spy.id, i, 80.0, 100.0, -0.01, Stage::Decline))
        .collect();
    inner.put_weekly_bars(&reference).unwrap();

    let store = FailingStore::new(inner, spy.id, Fault::Reads);
    let settings = short_base_settings();

    let report = WeeklyPipeline::new(&store, &settings)
        .generator()
        .generate_signals_for_all(0)
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_ids, vec![spy.id]);

    let signals = store.inner.load_signals(acme.id).await.unwrap();
    let kinds: Vec<SignalType> = signals.iter().map(|s| s.signal_type).collect();
    assert_eq!(kinds, vec![SignalType::Buy, SignalType::Sell]);
}

#[tokio::test]
async fn test_weekly_run_reports_every_phase_when_reference_fails() {
    let inner = MemoryStore::new();
    let acme = inner.add_instrument("ACME", None).unwrap();
    inner.put_weekly_bars(&six_week_series(acme.id)).unwrap();
    let spy = inner.add_instrument("SPY", None).unwrap();
    inner.put_weekly_bars(&six_week_series(spy.id)).unwrap();

    let store = FailingStore::new(inner, spy.id, Fault::Reads);
    let settings = short_base_settings();

    let report = WeeklyPipeline::new(&store, &settings).run(week_end(6)).await;

    for phase in [&report.aggregation, &report.analysis, &report.signals] {
        assert_eq!(phase.total, 2);
        assert_eq!(phase.succeeded, 1);
        assert_eq!(phase.failed_ids, vec![spy.id]);
        assert!(phase.error.is_none());
    }
    assert!(!report.is_clean());

    // The stored break down still turns into a SELL for the healthy instrument
    let signals = store.inner.load_signals(acme.id).await.unwrap();
    assert!(signals.iter().any(|s| s.signal_type == SignalType::Sell));
}

#[tokio::test]
async fn test_failed_aggregation_phase_does_not_stop_later_phases() {
    let inner = MemoryStore::new();
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let weeks = 40;

    let broken = inner.add_instrument("BROKEN", None).unwrap();
    let healthy = inner.add_instrument("HEALTHY", None).unwrap();
    for (seed, instrument) in [&broken, &healthy].into_iter().enumerate() {
        let bars = SyntheticDataGenerator::new(seed as u64).generate(MarketScenario::Uptrend, weeks, start);
        inner.insert_daily_bars(instrument.id, &bars).unwrap();
    }

    let store = FailingStore::new(inner, broken.id, Fault::IndicatorWrites);
    let settings = Settings::default();
    let aggregator = WeeklyPipeline::new(&store, &settings).aggregator();
    let as_of = start + Duration::weeks(weeks as i64 + 1);

    let err = tokio_test::assert_err!(aggregator.aggregate_instrument(&broken, 0, as_of).await);
    assert!(matches!(&err, Error::Persistence(msg) if msg.contains("update_trend_indicators")));

    // OHLCV before the failure and slopes after it were both written
    assert_eq!(store.writes_for(broken.id), vec!["upsert_weekly_ohlcv", "update_trend_slopes"]);
    let stored = store.inner.load_weekly_bars(broken.id).await.unwrap();
    assert_eq!(stored.len(), weeks);
    assert!(stored.iter().all(|w| w.trend_indicator.is_none()));

    let report = aggregator.aggregate_all(0, as_of).await.unwrap();
    assert_eq!(report.failed_ids, vec![broken.id]);
    assert_eq!(report.succeeded, 1);

    let healthy_weeks = store.inner.load_weekly_bars(healthy.id).await.unwrap();
    assert_eq!(healthy_weeks.len(), weeks);
    assert!(healthy_weeks[29..].iter().all(|w| w.trend_indicator.is_some()));
    assert!(healthy_weeks[30..].iter().all(|w| w.trend_slope.is_some()));
}

#[tokio::test]
async fn test_signal_queries_and_notification() {
    let store = MemoryStore::new();
    let instrument = store.add_instrument("ACME", Some("Acme Corp")).unwrap();
    store.put_weekly_bars(&six_week_series(instrument.id)).unwrap();

    let settings = short_base_settings();
    let generator = WeeklyPipeline::new(&store, &settings).generator();
    generator.generate_signals_for_all(0).await.unwrap();

    let sells = generator.recent_signals(week_end(0), Some(SignalType::Sell)).await.unwrap();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].symbol, "ACME");
    assert_eq!(sells[0].name.as_deref(), Some("Acme Corp"));

    let pending = generator.unnotified_signals().await.unwrap();
    assert_eq!(pending.len(), 2);
    // Newest first
    assert_eq!(pending[0].signal.signal_type, SignalType::Sell);

    let ids: Vec<Uuid> = pending.iter().map(|v| v.signal.id).collect();
    assert_eq!(generator.mark_notified(&ids).await.unwrap(), 2);
    assert_eq!(generator.mark_notified(&ids).await.unwrap(), 0);
    assert!(generator.unnotified_signals().await.unwrap().is_empty());
}

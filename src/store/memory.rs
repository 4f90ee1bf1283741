use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{MarketStore, SignalStore, WeeklyStore};
use crate::models::{
    DailyBar, Instrument, Signal, SignalKey, SignalType, Stage, WeeklyBar, WeeklyOhlcv,
};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    next_instrument_id: i64,
    instruments: BTreeMap<i64, Instrument>,
    daily: HashMap<i64, BTreeMap<NaiveDate, DailyBar>>,
    weekly: HashMap<i64, BTreeMap<NaiveDate, WeeklyBar>>,
    signals: BTreeMap<SignalKey, Signal>,
}

/// In-process store used by the demo binary and the test suite
///
/// Every method takes the lock for the duration of a synchronous body, so no
/// guard is held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Persistence("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Persistence("memory store lock poisoned".to_string()))
    }

    /// Register an active instrument and return it with its assigned id
    pub fn add_instrument(&self, symbol: &str, name: Option<&str>) -> Result<Instrument> {
        let mut inner = self.write()?;
        inner.next_instrument_id += 1;
        let instrument = Instrument {
            id: inner.next_instrument_id,
            symbol: symbol.to_string(),
            name: name.map(str::to_string),
            active: true,
        };
        inner.instruments.insert(instrument.id, instrument.clone());
        Ok(instrument)
    }

    pub fn set_active(&self, instrument_id: i64, active: bool) -> Result<()> {
        let mut inner = self.write()?;
        let instrument = inner
            .instruments
            .get_mut(&instrument_id)
            .ok_or_else(|| Error::NotFound(format!("instrument {}", instrument_id)))?;
        instrument.active = active;
        Ok(())
    }

    /// Store daily bars, replacing any bar with the same date
    pub fn insert_daily_bars(&self, instrument_id: i64, bars: &[DailyBar]) -> Result<()> {
        let mut inner = self.write()?;
        let series = inner.daily.entry(instrument_id).or_default();
        for bar in bars {
            series.insert(bar.date, bar.clone());
        }
        Ok(())
    }

    /// Store complete weekly bars as given (analysis columns included)
    pub fn put_weekly_bars(&self, bars: &[WeeklyBar]) -> Result<()> {
        let mut inner = self.write()?;
        for bar in bars {
            inner
                .weekly
                .entry(bar.instrument_id)
                .or_default()
                .insert(bar.week_end_date, bar.clone());
        }
        Ok(())
    }

    /// Snapshot of every stored signal ordered by key
    pub fn all_signals(&self) -> Result<Vec<Signal>> {
        Ok(self.read()?.signals.values().cloned().collect())
    }

    fn update_weekly<F>(&self, instrument_id: i64, dates: &[NaiveDate], mut apply: F) -> Result<()>
    where
        F: FnMut(usize, &mut WeeklyBar),
    {
        let mut inner = self.write()?;
        if let Some(series) = inner.weekly.get_mut(&instrument_id) {
            for (idx, date) in dates.iter().enumerate() {
                if let Some(bar) = series.get_mut(date) {
                    apply(idx, bar);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        Ok(self
            .read()?
            .instruments
            .values()
            .filter(|i| i.active)
            .cloned()
            .collect())
    }

    async fn find_instrument(&self, symbol: &str) -> Result<Option<Instrument>> {
        Ok(self
            .read()?
            .instruments
            .values()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
            .cloned())
    }

    async fn load_daily_bars(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .read()?
            .daily
            .get(&instrument_id)
            .map(|series| series.range(from..=to).map(|(_, bar)| bar.clone()).collect())
            .unwrap_or_default())
    }

    async fn first_daily_date(&self, instrument_id: i64) -> Result<Option<NaiveDate>> {
        Ok(self
            .read()?
            .daily
            .get(&instrument_id)
            .and_then(|series| series.keys().next().copied()))
    }
}

#[async_trait]
impl WeeklyStore for MemoryStore {
    async fn load_weekly_bars(&self, instrument_id: i64) -> Result<Vec<WeeklyBar>> {
        Ok(self
            .read()?
            .weekly
            .get(&instrument_id)
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_weekly_ohlcv(
        &self,
        instrument_id: i64,
        weeks: &[(NaiveDate, WeeklyOhlcv)],
    ) -> Result<()> {
        let mut inner = self.write()?;
        let series = inner.weekly.entry(instrument_id).or_default();
        for (week_end, ohlcv) in weeks {
            series
                .entry(*week_end)
                .and_modify(|bar| {
                    bar.open = ohlcv.open;
                    bar.high = ohlcv.high;
                    bar.low = ohlcv.low;
                    bar.close = ohlcv.close;
                    bar.volume = ohlcv.volume;
                })
                .or_insert_with(|| WeeklyBar::from_ohlcv(instrument_id, *week_end, *ohlcv));
        }
        Ok(())
    }

    async fn update_trend_indicators(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()> {
        let dates: Vec<NaiveDate> = values.iter().map(|(d, _)| *d).collect();
        self.update_weekly(instrument_id, &dates, |idx, bar| {
            bar.trend_indicator = values[idx].1;
        })
    }

    async fn update_trend_slopes(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()> {
        let dates: Vec<NaiveDate> = values.iter().map(|(d, _)| *d).collect();
        self.update_weekly(instrument_id, &dates, |idx, bar| {
            bar.trend_slope = values[idx].1;
        })
    }

    async fn update_stages(&self, instrument_id: i64, values: &[(NaiveDate, Stage)]) -> Result<()> {
        let dates: Vec<NaiveDate> = values.iter().map(|(d, _)| *d).collect();
        self.update_weekly(instrument_id, &dates, |idx, bar| {
            bar.stage = Some(values[idx].1);
        })
    }

    async fn latest_weekly_bars(&self) -> Result<Vec<WeeklyBar>> {
        let inner = self.read()?;
        Ok(inner
            .instruments
            .keys()
            .filter_map(|id| inner.weekly.get(id))
            .filter_map(|series| series.values().next_back().cloned())
            .collect())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert_signal_if_absent(&self, signal: &Signal) -> Result<bool> {
        let mut inner = self.write()?;
        let key = signal.key();
        if inner.signals.contains_key(&key) {
            return Ok(false);
        }
        inner.signals.insert(key, signal.clone());
        Ok(true)
    }

    async fn load_signals(&self, instrument_id: i64) -> Result<Vec<Signal>> {
        let mut signals: Vec<Signal> = self
            .read()?
            .signals
            .values()
            .filter(|s| s.instrument_id == instrument_id)
            .cloned()
            .collect();
        signals.sort_by_key(|s| s.date);
        Ok(signals)
    }

    async fn recent_signals(
        &self,
        since: NaiveDate,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<Signal>> {
        let mut signals: Vec<Signal> = self
            .read()?
            .signals
            .values()
            .filter(|s| s.date >= since)
            .filter(|s| signal_type.map_or(true, |t| s.signal_type == t))
            .cloned()
            .collect();
        signals.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(signals)
    }

    async fn unnotified_signals(&self) -> Result<Vec<Signal>> {
        let mut signals: Vec<Signal> = self
            .read()?
            .signals
            .values()
            .filter(|s| !s.notified)
            .cloned()
            .collect();
        signals.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(signals)
    }

    async fn mark_notified(&self, ids: &[Uuid]) -> Result<u64> {
        let mut inner = self.write()?;
        let mut updated = 0;
        for signal in inner.signals.values_mut() {
            if !signal.notified && ids.contains(&signal.id) {
                signal.notified = true;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

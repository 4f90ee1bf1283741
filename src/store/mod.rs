// Storage boundary
// The pipeline only talks to these traits; Postgres and in-memory stores implement them.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{DailyBar, Instrument, Signal, SignalType, Stage, WeeklyBar, WeeklyOhlcv};
use crate::Result;

pub use memory::MemoryStore;

/// Instruments and their raw daily bars (owned by the external collector)
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Active instruments ordered by id
    async fn active_instruments(&self) -> Result<Vec<Instrument>>;

    async fn find_instrument(&self, symbol: &str) -> Result<Option<Instrument>>;

    /// Daily bars with `from <= date <= to`, oldest first
    async fn load_daily_bars(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>>;

    async fn first_daily_date(&self, instrument_id: i64) -> Result<Option<NaiveDate>>;
}

/// Weekly bars keyed by `(instrument_id, week_end_date)`
///
/// Each update method touches only its own column, so the aggregation and
/// classification phases can be retried independently. Updates for weeks that
/// do not exist are ignored.
#[async_trait]
pub trait WeeklyStore: Send + Sync {
    /// All weekly bars of an instrument, oldest first
    async fn load_weekly_bars(&self, instrument_id: i64) -> Result<Vec<WeeklyBar>>;

    /// Insert or overwrite OHLCV, keeping indicator, slope and stage
    async fn upsert_weekly_ohlcv(
        &self,
        instrument_id: i64,
        weeks: &[(NaiveDate, WeeklyOhlcv)],
    ) -> Result<()>;

    async fn update_trend_indicators(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()>;

    async fn update_trend_slopes(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()>;

    async fn update_stages(&self, instrument_id: i64, values: &[(NaiveDate, Stage)]) -> Result<()>;

    /// Most recent weekly bar of every instrument that has one
    async fn latest_weekly_bars(&self) -> Result<Vec<WeeklyBar>>;
}

/// Append-only signal log keyed by `(instrument_id, date, signal_type)`
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Returns `true` if the signal was created, `false` if its key already existed
    async fn insert_signal_if_absent(&self, signal: &Signal) -> Result<bool>;

    /// Insert-if-absent for a batch; returns how many were created
    async fn insert_signals(&self, signals: &[Signal]) -> Result<usize> {
        let mut created = 0;
        for signal in signals {
            if self.insert_signal_if_absent(signal).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Signals of one instrument, oldest first
    async fn load_signals(&self, instrument_id: i64) -> Result<Vec<Signal>>;

    /// Signals dated on or after `since`, newest first
    async fn recent_signals(
        &self,
        since: NaiveDate,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<Signal>>;

    /// Signals not yet delivered, newest first
    async fn unnotified_signals(&self) -> Result<Vec<Signal>>;

    /// Flip `notified` on the given signals; returns how many changed
    async fn mark_notified(&self, ids: &[Uuid]) -> Result<u64>;
}

/// Everything the batch pipeline needs from storage
pub trait Store: MarketStore + WeeklyStore + SignalStore {}

impl<T: MarketStore + WeeklyStore + SignalStore + ?Sized> Store for T {}

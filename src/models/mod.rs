use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A tracked instrument (stock, ETF or index proxy)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub active: bool,
}

/// One trading day of OHLCV for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// OHLCV folded from the daily bars of one week
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeeklyOhlcv {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Weekly bar plus the derived analysis columns
///
/// `trend_indicator` and `trend_slope` are written by the aggregator,
/// `stage` only by the stage analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeeklyBar {
    pub instrument_id: i64,
    pub week_end_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub trend_indicator: Option<f64>,
    pub trend_slope: Option<f64>,
    pub stage: Option<Stage>,
}

impl WeeklyBar {
    /// Fresh bar with no analysis columns yet
    pub fn from_ohlcv(instrument_id: i64, week_end_date: NaiveDate, ohlcv: WeeklyOhlcv) -> Self {
        Self {
            instrument_id,
            week_end_date,
            open: ohlcv.open,
            high: ohlcv.high,
            low: ohlcv.low,
            close: ohlcv.close,
            volume: ohlcv.volume,
            trend_indicator: None,
            trend_slope: None,
            stage: None,
        }
    }

    pub fn ohlcv(&self) -> WeeklyOhlcv {
        WeeklyOhlcv {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    /// Fractional distance of close from the trend indicator
    pub fn distance(&self) -> Option<f64> {
        crate::indicators::price_distance(self.close, self.trend_indicator?)
    }
}

/// Weinstein market stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Base = 1,
    Advance = 2,
    Top = 3,
    Decline = 4,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Base, Stage::Advance, Stage::Top, Stage::Decline];

    pub fn number(self) -> i16 {
        self as i16
    }

    pub fn from_number(value: i16) -> Option<Stage> {
        match value {
            1 => Some(Stage::Base),
            2 => Some(Stage::Advance),
            3 => Some(Stage::Top),
            4 => Some(Stage::Decline),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Base => "Base",
            Stage::Advance => "Advance",
            Stage::Top => "Top",
            Stage::Decline => "Decline",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

/// Kind of emitted signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalType {
    Buy,
    Sell,
    StageChange,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::StageChange => "STAGE_CHANGE",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalType::Buy),
            "SELL" => Ok(SignalType::Sell),
            "STAGE_CHANGE" => Ok(SignalType::StageChange),
            other => Err(crate::Error::InvalidData(format!("Unknown signal type: {}", other))),
        }
    }
}

/// Trading signal derived from a stage transition
///
/// Append-only: after creation only `notified` changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: Uuid,
    pub instrument_id: i64,
    pub date: NaiveDate,
    pub signal_type: SignalType,
    pub stage_from: Stage,
    pub stage_to: Stage,
    pub price: f64,
    pub trend_indicator: Option<f64>,
    pub notified: bool,
}

impl Signal {
    pub fn new(
        instrument_id: i64,
        date: NaiveDate,
        signal_type: SignalType,
        stage_from: Stage,
        stage_to: Stage,
        price: f64,
        trend_indicator: Option<f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument_id,
            date,
            signal_type,
            stage_from,
            stage_to,
            price,
            trend_indicator,
            notified: false,
        }
    }

    /// Deduplication key
    pub fn key(&self) -> SignalKey {
        SignalKey {
            instrument_id: self.instrument_id,
            date: self.date,
            signal_type: self.signal_type,
        }
    }
}

/// Identity of a signal: at most one per instrument, date and type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalKey {
    pub instrument_id: i64,
    pub date: NaiveDate,
    pub signal_type: SignalType,
}

use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::DailyBar;

/// Market scenario types for synthetic daily series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% weekly average)
    Uptrend,
    /// Steady downtrend with noise (-2% weekly average)
    Downtrend,
    /// Range-bound around the base price
    Sideways,
    /// Full Weinstein cycle: decline, base, breakout, advance, top, decline
    StageCycle,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 4] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::StageCycle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "uptrend",
            MarketScenario::Downtrend => "downtrend",
            MarketScenario::Sideways => "sideways",
            MarketScenario::StageCycle => "stage-cycle",
        }
    }
}

/// Generates reproducible daily bars (Monday to Friday) for demos and tests
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            base_volume: 1_000_000.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `weeks` weeks of daily bars starting in the week of `start`
    pub fn generate(&mut self, scenario: MarketScenario, weeks: usize, start: NaiveDate) -> Vec<DailyBar> {
        let monday = start - Duration::days(start.weekday().num_days_from_monday() as i64);
        let mut bars = Vec::with_capacity(weeks * 5);
        let mut price = self.base_price;

        for week in 0..weeks {
            let (weekly_drift, gap) = Self::week_profile(scenario, week, weeks);
            let daily_drift = weekly_drift / 5.0;
            let noise_pct = match scenario {
                MarketScenario::StageCycle => 0.002,
                _ => 0.005,
            };

            for day in 0..5 {
                let date = monday + Duration::weeks(week as i64) + Duration::days(day);
                let open = price;

                if day == 0 {
                    price *= 1.0 + gap;
                }
                price *= 1.0 + daily_drift + self.rng.gen_range(-noise_pct..noise_pct);
                if scenario == MarketScenario::Sideways {
                    // Pull back towards the base so the range holds
                    price += (self.base_price - price) * 0.1;
                }

                bars.push(self.create_bar(date, open, price));
            }
        }

        bars
    }

    /// Weekly drift and Monday gap for one week of a scenario
    fn week_profile(scenario: MarketScenario, week: usize, weeks: usize) -> (f64, f64) {
        match scenario {
            MarketScenario::Uptrend => (0.02, 0.0),
            MarketScenario::Downtrend => (-0.02, 0.0),
            MarketScenario::Sideways => (0.0, 0.0),
            MarketScenario::StageCycle => {
                let breakout_week = weeks * 45 / 100;
                let p = week as f64 / weeks.max(1) as f64;
                if week == breakout_week {
                    (0.01, 0.07)
                } else if p < 0.15 {
                    (-0.02, 0.0)
                } else if p < 0.45 {
                    (0.0, 0.0)
                } else if p < 0.65 {
                    (0.03, 0.0)
                } else if p < 0.80 {
                    (0.0, 0.0)
                } else {
                    (-0.03, 0.0)
                }
            }
        }
    }

    fn create_bar(&mut self, date: NaiveDate, open: f64, close: f64) -> DailyBar {
        // ±0.4% intraday range around the body
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..0.004));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..0.004));
        let volume = (self.base_volume * self.rng.gen_range(0.7..1.3)) as i64;

        DailyBar {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

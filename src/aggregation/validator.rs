use chrono::NaiveDate;

use crate::models::DailyBar;
use crate::{Error, Result};

/// Validates daily OHLCV bars before they are folded into weeks
pub struct DailyBarValidator {
    today: Option<NaiveDate>,
}

impl DailyBarValidator {
    pub fn new() -> Self {
        Self { today: None }
    }

    /// Also reject bars dated after `today`
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    /// Validate a bar for correctness
    pub fn validate(&self, bar: &DailyBar) -> Result<()> {
        self.validate_prices(bar)?;
        self.validate_date(bar)?;
        self.validate_ohlc_relationship(bar)?;
        Ok(())
    }

    /// Keep only valid bars; returns them with the number rejected
    pub fn filter_valid(&self, bars: Vec<DailyBar>) -> (Vec<DailyBar>, usize) {
        let mut rejected = 0;
        let valid = bars
            .into_iter()
            .filter(|bar| match self.validate(bar) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Skipping daily bar {}: {}", bar.date, e);
                    rejected += 1;
                    false
                }
            })
            .collect();

        (valid, rejected)
    }

    fn validate_prices(&self, bar: &DailyBar) -> Result<()> {
        let prices = [
            ("open", bar.open),
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
        ];
        for (name, value) in prices {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("Invalid {} price: {}", name, value)));
            }
        }
        if bar.volume < 0 {
            return Err(invalid(format!("Invalid volume: {}", bar.volume)));
        }
        Ok(())
    }

    fn validate_date(&self, bar: &DailyBar) -> Result<()> {
        if let Some(today) = self.today {
            if bar.date > today {
                return Err(invalid(format!(
                    "Bar date is in the future: {} (today: {})",
                    bar.date, today
                )));
            }
        }
        Ok(())
    }

    fn validate_ohlc_relationship(&self, bar: &DailyBar) -> Result<()> {
        if bar.high < bar.low {
            return Err(invalid(format!("High ({}) is less than low ({})", bar.high, bar.low)));
        }
        if bar.high < bar.open || bar.high < bar.close {
            return Err(invalid(format!(
                "High ({}) is below open ({}) or close ({})",
                bar.high, bar.open, bar.close
            )));
        }
        if bar.low > bar.open || bar.low > bar.close {
            return Err(invalid(format!(
                "Low ({}) is above open ({}) or close ({})",
                bar.low, bar.open, bar.close
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidData(message)
}

impl Default for DailyBarValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_bar() -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 1_000_000,
        }
    }

    #[test]
    fn test_valid_bar() {
        let validator = DailyBarValidator::new();
        assert!(validator.validate(&make_valid_bar()).is_ok());
    }

    #[test]
    fn test_zero_volume_is_allowed() {
        let validator = DailyBarValidator::new();
        let mut bar = make_valid_bar();
        bar.volume = 0;
        assert!(validator.validate(&bar).is_ok());
    }

    #[test]
    fn test_negative_values_rejected() {
        let validator = DailyBarValidator::new();

        let mut bar = make_valid_bar();
        bar.close = -1.0;
        assert!(validator.validate(&bar).is_err());

        let mut bar = make_valid_bar();
        bar.volume = -5;
        assert!(validator.validate(&bar).is_err());

        let mut bar = make_valid_bar();
        bar.open = f64::NAN;
        assert!(validator.validate(&bar).is_err());
    }

    #[test]
    fn test_high_below_low_rejected() {
        let validator = DailyBarValidator::new();
        let mut bar = make_valid_bar();
        bar.high = 98.0;
        let err = validator.validate(&bar).unwrap_err();
        assert!(err.to_string().contains("less than low"));
    }

    #[test]
    fn test_close_outside_range_rejected() {
        let validator = DailyBarValidator::new();
        let mut bar = make_valid_bar();
        bar.close = 103.0;
        assert!(validator.validate(&bar).is_err());
    }

    #[test]
    fn test_future_date_rejected() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let validator = DailyBarValidator::with_today(today);
        assert!(validator.validate(&make_valid_bar()).is_err());
    }

    #[test]
    fn test_filter_valid_counts_rejections() {
        let validator = DailyBarValidator::new();
        let mut bad = make_valid_bar();
        bad.low = 150.0;

        let (valid, rejected) = validator.filter_valid(vec![make_valid_bar(), bad]);
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected, 1);
    }
}

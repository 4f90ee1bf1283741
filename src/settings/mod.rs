// Runtime configuration
// Defaults, then an optional TOML file, then STAGEWATCH__SECTION__KEY environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::signals::BreakoutConfig;
use crate::stage::StageThresholds;
use crate::Result;

pub const DEFAULT_CONFIG_FILE: &str = "stagewatch.toml";
const ENV_PREFIX: &str = "STAGEWATCH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub analysis: AnalysisSettings,
    pub breakout: BreakoutConfig,
    pub regime: RegimeSettings,
    pub batch: BatchSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Weekly closes averaged into the trend indicator
    pub ma_period: usize,
    pub price_distance_threshold: f64,
    pub slope_entry_threshold: f64,
    pub slope_exit_threshold: f64,
    /// Weeks with an indicator needed before an instrument counts as analysable
    pub min_weeks_for_analysis: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            ma_period: 30,
            price_distance_threshold: 0.05,
            slope_entry_threshold: 0.02,
            slope_exit_threshold: 0.02,
            min_weeks_for_analysis: 35,
        }
    }
}

impl AnalysisSettings {
    pub fn thresholds(&self) -> StageThresholds {
        StageThresholds {
            price_distance: self.price_distance_threshold,
            slope_entry: self.slope_entry_threshold,
            slope_exit: self.slope_exit_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    /// Broad-market instrument whose trend gates BUY signals
    pub reference_symbol: String,
    pub margin: f64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            reference_symbol: "SPY".to_string(),
            margin: 0.03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub aggregate_weeks_back: usize,
    pub analyze_weeks_back: usize,
    pub signal_weeks_back: usize,
    /// Instruments processed at the same time
    pub concurrency: usize,
    /// Wall-clock budget for one pipeline run
    pub budget_secs: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            aggregate_weeks_back: 4,
            analyze_weeks_back: 10,
            signal_weeks_back: 10,
            concurrency: 4,
            budget_secs: None,
        }
    }
}

impl BatchSettings {
    pub fn budget(&self) -> Option<Duration> {
        self.budget_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/stagewatch".to_string(),
            max_connections: 5,
        }
    }
}

impl Settings {
    /// Load from `.env`, `STAGEWATCH_CONFIG` (or `stagewatch.toml`) and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("STAGEWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut settings = Self::from_sources(Some(Path::new(&path)))?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database.url = url;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Layer an optional file and `STAGEWATCH__*` variables over the defaults
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse TOML text over the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if a.ma_period == 0 {
            return Err(invalid("analysis.ma_period must be positive"));
        }
        if a.price_distance_threshold < 0.0 || a.slope_entry_threshold < 0.0 || a.slope_exit_threshold < 0.0 {
            return Err(invalid("analysis thresholds must not be negative"));
        }
        if a.slope_entry_threshold < a.slope_exit_threshold {
            return Err(invalid("analysis.slope_entry_threshold must be >= slope_exit_threshold"));
        }

        self.breakout.validate()?;

        if self.regime.margin < 0.0 {
            return Err(invalid("regime.margin must not be negative"));
        }
        if self.regime.reference_symbol.trim().is_empty() {
            return Err(invalid("regime.reference_symbol must not be empty"));
        }
        if self.batch.concurrency == 0 {
            return Err(invalid("batch.concurrency must be positive"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be positive"));
        }

        Ok(())
    }
}

pub(crate) fn invalid(message: &str) -> crate::Error {
    crate::Error::Config(config::ConfigError::Message(message.to_string()))
}

/// Weinstein stage classifier
///
/// Classifies one weekly bar from its distance to the trend indicator and the
/// indicator slope, given the stage of the previous week:
/// - Stage 2 (Advance): well above a rising indicator
/// - Stage 4 (Decline): well below a falling indicator
/// - Stage 3 (Top): indicator flattens after an advance
/// - Stage 1 (Base): indicator flat or falling after a decline
///
/// Rules are checked in a fixed order and the first match wins.
use serde::{Deserialize, Serialize};

use crate::models::{Stage, WeeklyBar};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageThresholds {
    /// |distance| above which price counts as clearly above/below the indicator
    pub price_distance: f64,
    /// Slope needed to enter a trending stage
    pub slope_entry: f64,
    /// Slope needed to stay in a trending stage; also the flat band
    pub slope_exit: f64,
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            price_distance: 0.05,
            slope_entry: 0.02,
            slope_exit: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageClassifier {
    thresholds: StageThresholds,
}

impl StageClassifier {
    pub fn new(thresholds: StageThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> StageThresholds {
        self.thresholds
    }

    /// Classify one week
    ///
    /// Without a usable indicator the previous stage carries over (Base when
    /// there is none).
    pub fn classify(
        &self,
        close: f64,
        trend_indicator: Option<f64>,
        slope: Option<f64>,
        previous: Option<Stage>,
    ) -> Stage {
        let fallback = previous.unwrap_or(Stage::Base);

        let ti = match trend_indicator {
            Some(ti) if ti != 0.0 => ti,
            _ => return fallback,
        };

        let t = &self.thresholds;
        let distance = (close - ti) / ti;
        let above = distance > t.price_distance;
        let below = distance < -t.price_distance;
        let near = !above && !below;

        let (up, down, flat) = match slope {
            None => (false, false, true),
            Some(s) => {
                let up_threshold = if previous == Some(Stage::Advance) {
                    t.slope_exit
                } else {
                    t.slope_entry
                };
                let down_threshold = if previous == Some(Stage::Decline) {
                    t.slope_exit
                } else {
                    t.slope_entry
                };
                (s > up_threshold, s < -down_threshold, s.abs() <= t.slope_exit)
            }
        };

        if above && up {
            return Stage::Advance;
        }
        if below && down {
            return Stage::Decline;
        }
        if (near || above) && flat && matches!(previous, Some(Stage::Advance | Stage::Top)) {
            return Stage::Top;
        }
        if (near || below)
            && (flat || down)
            && matches!(previous, None | Some(Stage::Decline | Stage::Base))
        {
            return Stage::Base;
        }

        fallback
    }

    pub fn classify_bar(&self, bar: &WeeklyBar, previous: Option<Stage>) -> Stage {
        self.classify(bar.close, bar.trend_indicator, bar.trend_slope, previous)
    }
}

/// Classify with default thresholds
pub fn classify_stage(
    close: f64,
    trend_indicator: Option<f64>,
    slope: Option<f64>,
    previous: Option<Stage>,
) -> Stage {
    StageClassifier::default().classify(close, trend_indicator, slope, previous)
}

/// Chronological fold over weekly bars carrying the previous stage
///
/// Seed it with the stage stored just before a window to resume analysis
/// from that checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct StageFold {
    classifier: StageClassifier,
    previous: Option<Stage>,
}

impl StageFold {
    pub fn new(classifier: StageClassifier, seed: Option<Stage>) -> Self {
        Self {
            classifier,
            previous: seed,
        }
    }

    pub fn push(&mut self, bar: &WeeklyBar) -> Stage {
        let stage = self.classifier.classify_bar(bar, self.previous);
        self.previous = Some(stage);
        stage
    }

    pub fn previous(&self) -> Option<Stage> {
        self.previous
    }
}

/// Stages for a chronological series, one per bar
pub fn classify_series(
    classifier: StageClassifier,
    weeks: &[WeeklyBar],
    seed: Option<Stage>,
) -> Vec<Stage> {
    let mut fold = StageFold::new(classifier, seed);
    weeks.iter().map(|bar| fold.push(bar)).collect()
}

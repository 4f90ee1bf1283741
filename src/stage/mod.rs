pub mod analyzer;
pub mod classifier;

pub use analyzer::{StageAnalyzer, StageHistoryEntry, StageSummary};
pub use classifier::{classify_series, classify_stage, StageClassifier, StageFold, StageThresholds};

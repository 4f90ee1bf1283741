// Weekly batch pipeline
// aggregation -> stage analysis -> signal generation, each phase over all active instruments

pub mod batch;

use chrono::NaiveDate;
use serde::Serialize;
use std::time::Instant;

use crate::aggregation::WeeklyAggregator;
use crate::settings::Settings;
use crate::signals::{BreakoutValidator, SignalGenerator};
use crate::stage::{StageAnalyzer, StageClassifier};
use crate::store::Store;
use crate::Result;

pub use batch::{run_batch, BatchOptions, BatchReport};

/// Reports of one full weekly run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub aggregation: BatchReport,
    pub analysis: BatchReport,
    pub signals: BatchReport,
    pub elapsed_secs: f64,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.aggregation.is_clean() && self.analysis.is_clean() && self.signals.is_clean()
    }
}

/// Wires the pipeline components to one store and one configuration
pub struct WeeklyPipeline<'a> {
    store: &'a dyn Store,
    settings: &'a Settings,
    options: BatchOptions,
}

impl<'a> WeeklyPipeline<'a> {
    pub fn new(store: &'a dyn Store, settings: &'a Settings) -> Self {
        Self {
            store,
            settings,
            options: BatchOptions {
                concurrency: settings.batch.concurrency,
                deadline: None,
            },
        }
    }

    pub fn classifier(&self) -> StageClassifier {
        StageClassifier::new(self.settings.analysis.thresholds())
    }

    pub fn aggregator(&self) -> WeeklyAggregator<'a> {
        WeeklyAggregator::new(self.store, &self.settings.analysis).with_options(self.options)
    }

    pub fn analyzer(&self) -> StageAnalyzer<'a> {
        StageAnalyzer::new(self.store, self.classifier()).with_options(self.options)
    }

    pub fn generator(&self) -> SignalGenerator<'a> {
        SignalGenerator::new(
            self.store,
            self.classifier(),
            BreakoutValidator::new(self.settings.breakout.clone()),
            self.settings.regime.clone(),
        )
        .with_options(self.options)
    }

    /// Run all three phases with the configured windows
    ///
    /// The wall-clock budget, if any, covers the whole run. Instruments not
    /// started in time are reported as skipped and picked up by the next run.
    /// A phase that cannot start is reported as aborted and the later phases
    /// still run, so every phase always has a report.
    pub async fn run(&mut self, as_of: NaiveDate) -> PipelineReport {
        let started = Instant::now();
        self.options.deadline = self.settings.batch.budget().map(|budget| started + budget);
        let batch = &self.settings.batch;

        tracing::info!("🚀 Weekly run as of {}", as_of);

        let aggregation = phase_report(
            "weekly aggregation",
            self.aggregator()
                .aggregate_all(batch.aggregate_weeks_back, as_of)
                .await,
        );
        let analysis = phase_report(
            "stage analysis",
            self.analyzer().analyze_all(batch.analyze_weeks_back).await,
        );
        let signals = phase_report(
            "signal generation",
            self.generator()
                .generate_signals_for_all(batch.signal_weeks_back)
                .await,
        );

        let report = PipelineReport {
            aggregation,
            analysis,
            signals,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        tracing::info!(
            "✓ Weekly run finished in {:.1}s: {} weeks aggregated, {} stages changed, {} new signals",
            report.elapsed_secs,
            report.aggregation.changed,
            report.analysis.changed,
            report.signals.changed
        );

        report
    }
}

fn phase_report(phase: &str, result: Result<BatchReport>) -> BatchReport {
    result.unwrap_or_else(|e| {
        tracing::error!("{} aborted: {}", phase, e);
        BatchReport::aborted(&e)
    })
}

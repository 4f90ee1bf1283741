use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::models::Instrument;
use crate::{Error, Result};

/// Outcome of one batch phase over many instruments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<i64>,
    /// Rows written: weeks aggregated, stages changed or signals created
    pub changed: usize,
    /// Instruments not started before the deadline
    pub skipped: usize,
    /// Set when the phase could not start, e.g. the instrument list was unreadable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    /// Report for a phase that failed before touching any instrument
    pub fn aborted(error: &Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Count `instrument_id` as failed unless the batch already did
    pub fn record_failure(&mut self, instrument_id: i64) {
        if !self.failed_ids.contains(&instrument_id) {
            self.total += 1;
            self.failed += 1;
            self.failed_ids.push(instrument_id);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.error.is_none()
    }
}

/// How a batch is driven
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub deadline: Option<Instant>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            deadline: None,
        }
    }
}

impl BatchOptions {
    fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Run `work` for every instrument, at most `concurrency` at a time
///
/// Results are collected in input order. A failure is logged and recorded
/// against its instrument; it never stops the batch.
pub async fn run_batch<'a, F, Fut>(
    phase: &str,
    instruments: &'a [Instrument],
    options: BatchOptions,
    work: F,
) -> BatchReport
where
    F: Fn(&'a Instrument) -> Fut,
    Fut: Future<Output = Result<usize>> + 'a,
{
    let work = &work;
    let outcomes: Vec<(&Instrument, Option<Result<usize>>)> = stream::iter(instruments)
        .map(|instrument| async move {
            if options.expired() {
                return (instrument, None);
            }
            (instrument, Some(work(instrument).await))
        })
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let mut report = BatchReport {
        total: instruments.len(),
        ..Default::default()
    };

    for (instrument, outcome) in outcomes {
        match outcome {
            Some(Ok(changed)) => {
                report.succeeded += 1;
                report.changed += changed;
            }
            Some(Err(e)) => {
                tracing::error!("{} failed for {}: {}", phase, instrument.symbol, e);
                report.failed += 1;
                report.failed_ids.push(instrument.id);
            }
            None => report.skipped += 1,
        }
    }

    if report.skipped > 0 {
        tracing::warn!(
            "{}: budget exhausted, {} instruments left for the next run",
            phase,
            report.skipped
        );
    }

    tracing::info!(
        "✓ {}: {}/{} succeeded, {} failed, {} changed",
        phase,
        report.succeeded,
        report.total,
        report.failed,
        report.changed
    );

    report
}

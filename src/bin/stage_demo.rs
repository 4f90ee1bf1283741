use anyhow::Result;
use chrono::{Duration, NaiveDate};

use stagewatch::pipeline::WeeklyPipeline;
use stagewatch::settings::Settings;
use stagewatch::store::{MemoryStore, SignalStore, WeeklyStore};
use stagewatch::synthetic::{MarketScenario, SyntheticDataGenerator};
use stagewatch::Stage;

const WEEKS: usize = 104;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("stagewatch=warn")
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          STAGEWATCH SYNTHETIC STAGE DEMO              ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap_or_default();
    let as_of = start + Duration::weeks(WEEKS as i64 + 1);

    // Synthetic weekly moves are small, so the slope thresholds are loosened
    let mut settings = Settings::default();
    settings.analysis.slope_entry_threshold = 0.002;
    settings.analysis.slope_exit_threshold = 0.001;
    settings.batch.aggregate_weeks_back = 0;
    settings.batch.analyze_weeks_back = 0;
    settings.batch.signal_weeks_back = 0;

    let store = MemoryStore::new();

    let reference = store.add_instrument(&settings.regime.reference_symbol, Some("Reference market"))?;
    let bars = SyntheticDataGenerator::new(7).generate(MarketScenario::Uptrend, WEEKS, start);
    store.insert_daily_bars(reference.id, &bars)?;

    let mut instruments = Vec::new();
    for (seed, scenario) in MarketScenario::ALL.into_iter().enumerate() {
        let instrument = store.add_instrument(&scenario.name().to_uppercase(), Some(scenario.name()))?;
        let bars = SyntheticDataGenerator::new(42 + seed as u64).generate(scenario, WEEKS, start);
        store.insert_daily_bars(instrument.id, &bars)?;
        instruments.push((scenario, instrument));
    }

    let report = WeeklyPipeline::new(&store, &settings).run(as_of).await;
    println!(
        "\nWeekly run: {} weeks aggregated, {} stage changes, {} signals ({:.2}s)",
        report.aggregation.changed, report.analysis.changed, report.signals.changed, report.elapsed_secs
    );

    for (scenario, instrument) in &instruments {
        let weeks = store.load_weekly_bars(instrument.id).await?;
        let stages: Vec<Stage> = weeks.iter().filter_map(|w| w.stage).collect();

        println!("\n── {} ({} weeks classified) ──", scenario.name(), stages.len());
        println!("  Stages: {}", stage_strip(&stages));
        let runs: Vec<String> = stage_runs(&stages)
            .iter()
            .map(|(stage, weeks)| format!("{}×{}", stage.number(), weeks))
            .collect();
        println!("  Runs:   {}", runs.join(" "));

        let signals = store.load_signals(instrument.id).await?;
        if signals.is_empty() {
            println!("  No signals");
        }
        for signal in signals {
            println!(
                "  {:<12} {:<13} {}→{}  @ {:>8.2}",
                signal.date,
                signal.signal_type,
                signal.stage_from.number(),
                signal.stage_to.number(),
                signal.price
            );
        }
    }

    println!();
    Ok(())
}

/// One character per classified week
fn stage_strip(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| match s {
            Stage::Base => '_',
            Stage::Advance => '/',
            Stage::Top => '^',
            Stage::Decline => '\\',
        })
        .collect()
}

/// Consecutive runs of the same stage
fn stage_runs(stages: &[Stage]) -> Vec<(Stage, usize)> {
    let mut runs: Vec<(Stage, usize)> = Vec::new();
    for &stage in stages {
        match runs.last_mut() {
            Some((last, count)) if *last == stage => *count += 1,
            _ => runs.push((stage, 1)),
        }
    }
    runs
}

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use stagewatch::db::PostgresStore;
use stagewatch::pipeline::{BatchReport, WeeklyPipeline};
use stagewatch::settings::Settings;
use stagewatch::signals::SignalView;
use stagewatch::store::MarketStore;
use stagewatch::{SignalType, Stage};

#[derive(Parser)]
#[command(name = "stagewatch", about = "Weinstein stage analysis over weekly bars")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Fold daily bars into weekly bars, trend indicator and slope
    Aggregate {
        /// Recent weeks to rebuild (defaults to batch.aggregate_weeks_back)
        #[arg(long)]
        weeks_back: Option<usize>,

        /// Reference date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Classify the recent weeks of every active instrument
    Analyze {
        #[arg(long)]
        weeks_back: Option<usize>,
    },
    /// Emit BUY / SELL / STAGE_CHANGE signals from stage transitions
    Signals {
        #[arg(long)]
        weeks_back: Option<usize>,
    },
    /// Run aggregation, analysis and signal generation with the configured windows
    Weekly {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Current stage and recent stage history of one instrument
    Summary {
        symbol: String,

        #[arg(long, default_value_t = 12)]
        weeks: usize,
    },
    /// Active instruments currently in a stage (1 Base, 2 Advance, 3 Top, 4 Decline)
    Stage {
        #[arg(value_parser = clap::value_parser!(i16).range(1..=4))]
        stage: i16,
    },
    /// Signals from the last N days
    Recent {
        #[arg(long, default_value_t = 7)]
        days: i64,

        /// BUY, SELL or STAGE_CHANGE
        #[arg(long = "type")]
        signal_type: Option<SignalType>,
    },
    /// Signals not yet delivered
    Unnotified,
    /// Mark signals as delivered
    MarkNotified {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let store = PostgresStore::connect(&settings.database).await?;

    let today = Utc::now().date_naive();
    let mut pipeline = WeeklyPipeline::new(&store, &settings);

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
        }
        Commands::Aggregate { weeks_back, as_of } => {
            let weeks_back = weeks_back.unwrap_or(settings.batch.aggregate_weeks_back);
            let report = pipeline
                .aggregator()
                .aggregate_all(weeks_back, as_of.unwrap_or(today))
                .await?;
            print_report("Aggregation", &report);
        }
        Commands::Analyze { weeks_back } => {
            let weeks_back = weeks_back.unwrap_or(settings.batch.analyze_weeks_back);
            let report = pipeline.analyzer().analyze_all(weeks_back).await?;
            print_report("Stage analysis", &report);
        }
        Commands::Signals { weeks_back } => {
            let weeks_back = weeks_back.unwrap_or(settings.batch.signal_weeks_back);
            let report = pipeline.generator().generate_signals_for_all(weeks_back).await?;
            print_report("Signal generation", &report);
        }
        Commands::Weekly { as_of } => {
            let report = pipeline.run(as_of.unwrap_or(today)).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            print_report("Aggregation", &report.aggregation);
            print_report("Stage analysis", &report.analysis);
            print_report("Signal generation", &report.signals);
            println!("Finished in {:.1}s", report.elapsed_secs);
            if !report.is_clean() {
                bail!("weekly run finished with failures");
            }
        }
        Commands::Summary { symbol, weeks } => {
            let Some(instrument) = store.find_instrument(&symbol).await? else {
                bail!("unknown symbol: {}", symbol);
            };
            let Some(summary) = pipeline.analyzer().stage_summary(&instrument, weeks).await? else {
                println!("{} has no classified weeks yet", instrument.symbol);
                return Ok(());
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!(
                "\n{}: {} for {} week(s)\n",
                summary.symbol, summary.current_stage, summary.weeks_in_stage
            );
            println!("{:<12} {:<12} {:>10} {:>10} {:>9}", "Week end", "Stage", "Close", "MA", "Slope");
            println!("{}", "─".repeat(57));
            for entry in &summary.history {
                println!(
                    "{:<12} {:<12} {:>10.2} {:>10} {:>9}",
                    entry.week_end_date,
                    entry.stage.label(),
                    entry.close,
                    fmt_opt(entry.trend_indicator, 2),
                    fmt_opt(entry.trend_slope.map(|s| s * 100.0), 2),
                );
            }
        }
        Commands::Stage { stage } => {
            let Some(stage) = Stage::from_number(stage) else {
                bail!("stage must be 1-4");
            };
            let rows = pipeline.analyzer().instruments_in_stage(stage).await?;

            println!("\n{} instrument(s) in {}\n", rows.len(), stage);
            for (instrument, week) in rows {
                println!(
                    "{:<8} {:<12} close {:>10.2}  MA {:>10}",
                    instrument.symbol,
                    week.week_end_date,
                    week.close,
                    fmt_opt(week.trend_indicator, 2)
                );
            }
        }
        Commands::Recent { days, signal_type } => {
            let since = today - Duration::days(days);
            let signals = pipeline.generator().recent_signals(since, signal_type).await?;
            print_signals(&signals, cli.json)?;
        }
        Commands::Unnotified => {
            let signals = pipeline.generator().unnotified_signals().await?;
            print_signals(&signals, cli.json)?;
        }
        Commands::MarkNotified { ids } => {
            let updated = pipeline.generator().mark_notified(&ids).await?;
            println!("Marked {} of {} signal(s) as notified", updated, ids.len());
        }
    }

    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stagewatch=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_report(phase: &str, report: &BatchReport) {
    println!(
        "{:<18} {} instruments: {} ok, {} failed, {} skipped, {} changed",
        phase, report.total, report.succeeded, report.failed, report.skipped, report.changed
    );
    if !report.failed_ids.is_empty() {
        println!("{:<18} failed ids: {:?}", "", report.failed_ids);
    }
    if let Some(error) = &report.error {
        println!("{:<18} aborted: {}", "", error);
    }
}

fn print_signals(signals: &[SignalView], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(signals)?);
        return Ok(());
    }
    if signals.is_empty() {
        println!("No signals");
        return Ok(());
    }

    println!(
        "{:<36} {:<8} {:<12} {:<13} {:>5} {:>10}",
        "Id", "Symbol", "Date", "Type", "Move", "Price"
    );
    println!("{}", "─".repeat(90));
    for view in signals {
        let s = &view.signal;
        println!(
            "{:<36} {:<8} {:<12} {:<13} {:>5} {:>10.2}{}",
            s.id,
            view.symbol,
            s.date,
            s.signal_type,
            format!("{}→{}", s.stage_from.number(), s.stage_to.number()),
            s.price,
            if s.notified { "" } else { "  *" }
        );
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "-".to_string())
}

//! marketwatch: score a synthetic market batch and print ranked alerts.
//!
//! Generates sample observations, runs every scoring stage, then prints the
//! prioritized alerts as a table or JSON. Logs go to stderr so `--json`
//! output can be piped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use marketwatch_compute::{generate_sample_data, Alert, CancelToken, Pipeline, PipelineMetrics, StageReport};
use marketwatch_core::config::load_dotenv;
use marketwatch_core::Config;

// ── CLI ─────────────────────────────────────────────────────────────

/// Multi-method anomaly scoring over synthetic market data.
#[derive(Parser, Debug)]
#[command(name = "marketwatch", version, about)]
struct Cli {
    /// Number of hourly observations to generate.
    #[arg(long, env = "MARKETWATCH_ROWS", default_value_t = 1000)]
    rows: usize,

    /// Seed for the sample data.
    #[arg(long, env = "MARKETWATCH_SEED", default_value_t = 42)]
    seed: u64,

    /// YAML config file. Environment variables are used when omitted.
    #[arg(long, env = "MARKETWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Alert threshold on the combined score.
    #[arg(long)]
    threshold: Option<f64>,

    /// Autoencoder training epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Expected anomaly fraction for the isolation forest.
    #[arg(long)]
    contamination: Option<f64>,

    /// Show at most this many alerts.
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Re-binarize the combined score at this threshold before prioritizing.
    #[arg(long)]
    rebinarize: Option<f64>,
}

#[derive(Serialize)]
struct Output<'a> {
    stages: &'a [StageReport],
    total_alerts: usize,
    alerts: &'a [Alert],
    metrics: &'a PipelineMetrics,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::from_env(),
    };

    if let Some(t) = cli.threshold {
        config.alerts.threshold = t;
    }
    if let Some(e) = cli.epochs {
        config.reconstruction.epochs = e;
    }
    if let Some(c) = cli.contamination {
        config.partition.contamination = c;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_table(reports: &[StageReport], alerts: &[Alert], total: usize) {
    println!("{:<16} {:>8} {:>8} {:>10}", "stage", "rows", "flagged", "ms");
    for r in reports {
        println!(
            "{:<16} {:>8} {:>8} {:>10}",
            r.stage,
            r.rows,
            r.flagged,
            r.duration.as_millis()
        );
    }
    println!();
    println!("{} alert(s), showing {}", total, alerts.len());
    println!(
        "{:>6}  {:<25} {:>8} {:>8}  {}",
        "id", "timestamp", "score", "pattern", "action"
    );
    for a in alerts {
        println!(
            "{:>6}  {:<25} {:>8.3} {:>8}  {}",
            a.id,
            a.timestamp.to_rfc3339(),
            a.anomaly_score,
            a.pattern_alert.map(|p| format!("{:.3}", p)).unwrap_or_else(|| "-".to_string()),
            a.action.map(|x| x.to_string()).unwrap_or_default()
        );
    }
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.log_summary();

    let threshold = config.alerts.threshold;
    let observations = generate_sample_data(cli.rows, cli.seed);
    info!(rows = cli.rows, seed = cli.seed, "sample data generated");

    let mut pipeline = Pipeline::new(observations, config).context("failed to ingest observations")?;
    let reports = pipeline
        .run_all(&CancelToken::new())
        .context("scoring pipeline failed")?;

    if let Some(t) = cli.rebinarize {
        let ones = pipeline.rebinarize(t).context("re-binarization failed")?;
        info!(threshold = t, alerted = ones, "combined score re-binarized");
    }

    let alerts = pipeline.prioritize(threshold).context("prioritization failed")?;
    let shown = &alerts[..alerts.len().min(cli.top)];

    if cli.json {
        let output = Output {
            stages: &reports,
            total_alerts: alerts.len(),
            alerts: shown,
            metrics: pipeline.metrics(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_table(&reports, shown, alerts.len());
    }

    Ok(())
}

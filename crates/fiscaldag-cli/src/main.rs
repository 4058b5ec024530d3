//! Thin command-line front end: loads a scenario bundle, runs it
//! through the engine, and prints the per-period results and
//! validation reports as JSON. An external collaborator, not part of
//! the core engine.

mod bundle;
mod run_options;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bundle::{statement_kind_of, BundleDrivers, BundleFx, ScenarioBundle};
use fiscaldag_engine::{CancellationToken, EngineConfig, Orchestrator, Template};
use run_options::RunOptions;

#[derive(Debug, Parser)]
#[command(name = "fiscaldag", about = "Run a multi-period scenario bundle through the fiscaldag engine")]
struct Cli {
    /// Path to the JSON scenario bundle.
    bundle: PathBuf,

    /// Optional TOML run-configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let bundle_text = std::fs::read_to_string(&cli.bundle)
        .with_context(|| format!("reading scenario bundle {}", cli.bundle.display()))?;
    let bundle: ScenarioBundle =
        serde_json::from_str(&bundle_text).context("parsing scenario bundle JSON")?;

    let mut config = EngineConfig::default();
    if let Some(path) = &cli.config {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading run config {}", path.display()))?;
        let options: RunOptions = toml::from_str(&text).context("parsing run config TOML")?;
        options.apply(&mut config);
    }

    let templates: Vec<Template> = bundle
        .statements
        .iter()
        .cloned()
        .map(|source| Template::from_source_with_tolerance(source, config.default_tolerance))
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("loading template: {e}"))?;
    let template_refs: Vec<(fiscaldag_engine::StatementKind, &Template)> = bundle
        .statements
        .iter()
        .zip(&templates)
        .map(|(source, template)| (statement_kind_of(source), template))
        .collect();

    let drivers = BundleDrivers { scenario_periods: &bundle.drivers };
    let fx = BundleFx { rates: &bundle.fx_rates };

    let orchestrator = Orchestrator::new(
        bundle.entity.clone(),
        config,
        template_refs,
        &drivers,
        &fx,
        bundle.opening_balance_sheet.clone(),
    );

    let cancellation = CancellationToken::new();
    let outcomes = orchestrator.run_many(&bundle.scenarios, &bundle.periods, &cancellation);

    let serializable: rustc_hash::FxHashMap<&str, Vec<&fiscaldag_engine::PeriodResult>> = outcomes
        .iter()
        .map(|(scenario, outcome)| (scenario.as_str(), outcome.results.iter().collect()))
        .collect();

    let output = if cli.pretty {
        serde_json::to_string_pretty(&serializable)?
    } else {
        serde_json::to_string(&serializable)?
    };
    println!("{output}");

    for (scenario, outcome) in &outcomes {
        if let Some(failure) = &outcome.failure {
            tracing::error!(scenario = %scenario, error = %failure, "scenario run failed");
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use bess_saturation::{config, controller, forecast, optimizer, repo, telemetry};
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use telemetry::{init_tracing, LogFormat};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "bess-saturation", version, about = "Estimate the BESS market saturation point")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "BESS_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the output directory from the configuration
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Do not keep per-increment dispatch history
    #[arg(long)]
    no_history: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let mut cfg = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.no_history {
        cfg.sweep.keep_history = false;
    }
    let output_dir = cli.output_dir.unwrap_or_else(|| cfg.output.dir.clone());

    let historical = repo::load_prices(&cfg.inputs.prices_csv)?;
    let shift = cfg.scenario.shift();
    let prices = forecast::extrapolate_prices(&historical, &cfg.coefficients.renewable(), shift);
    info!(delta_points = shift.delta_points(), "extrapolated prices to future RES share");
    let market = repo::load_market(prices.clone(), &cfg.inputs.volumes_csv)?;

    let cost = cfg.costs.annualized_cost_per_mw();
    info!(
        capex_per_mw = cost.capex_per_mw,
        opex_per_mw = cost.opex_per_mw,
        "annualized capacity cost"
    );

    let sweep = controller::CapacitySweep::new(
        optimizer::LpDispatcher::new(cfg.solver.backend),
        market,
        forecast::PriceFeedback::new(cfg.coefficients.price_impact()),
        cfg.battery_params(),
        cost,
        cfg.sweep_settings(),
    )?;
    let report = sweep.run()?;

    let writer = repo::ResultsWriter::create(&output_dir)?;
    let summary = writer.write_report(&report, &prices)?;

    match summary.saturation_estimate_mw {
        Some(mw) => println!("saturation point: {mw:.1} MW"),
        None => println!(
            "no saturation up to {:.0} MW",
            summary.final_capacity_mw
        ),
    }
    println!("results: {}", writer.dir().display());
    Ok(())
}

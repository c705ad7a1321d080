use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;

mod atomic_file;
mod chart_downloader;
mod config;
mod dashboard;
mod dataset_builder;
mod electricity_cleaner;

use chart_downloader::ChartDownloader;
use config::PipelineConfig;
use dashboard::DashboardGenerator;

#[derive(Parser)]
#[command(name = "btc_security_pipeline")]
#[command(about = "Download Bitcoin network data, estimate the hourly cost of a 51% attack and render a dashboard")]
struct Args {
    /// JSON configuration file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First stage to run; later stages always follow
    #[arg(long, value_enum, default_value = "download")]
    from: Stage,

    /// Drop dataset rows before this date (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Stage {
    Download,
    CleanElectricity,
    Merge,
    Dashboard,
}

fn banner(step: usize, title: &str) {
    println!("\n[{}/4] {}", step, title);
    println!("{}", "=".repeat(60));
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(start) = args.start_date {
        config.start_date = Some(start);
    }
    info!("Starting pipeline from stage {:?}", args.from);

    if args.from <= Stage::Download {
        banner(1, "Downloading network charts");
        let downloader = ChartDownloader::new(&config.api_base_url, config.raw_api_dir.clone())?;
        let summary = downloader.download_all(&config.charts)?;
        for (name, reason) in &summary.failed {
            warn!("Chart {} unavailable: {}", name, reason);
        }
    }

    if args.from <= Stage::CleanElectricity {
        banner(2, "Cleaning electricity prices");
        if let Err(e) = electricity_cleaner::clean_electricity_prices(&config) {
            warn!(
                "Electricity cleaning failed, merge will use {} USD/kWh: {:#}",
                config.default_elec_cost_usd_per_kwh, e
            );
        }
    }

    if args.from <= Stage::Merge {
        banner(3, "Merging sources");
        let summary = dataset_builder::build_dataset(&config)?;
        if !summary.skipped.is_empty() {
            println!("  ⚠️  {} source files excluded:", summary.skipped.len());
            for (path, reason) in &summary.skipped {
                println!("     {} ({})", path.display(), reason);
            }
        }
    }

    banner(4, "Rendering dashboard");
    let generator = DashboardGenerator::new(config.dataset_path(), config.dashboard_file.clone());
    let summary = generator.generate()?;
    if summary.placeholders > 0 {
        println!("  ⚠️  {} of {} panels had no data", summary.placeholders, summary.panels);
    }

    println!("\n✅ Pipeline complete: {}", summary.path.display());
    Ok(())
}

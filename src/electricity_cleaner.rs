use crate::atomic_file::write_atomically;
use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use btc_reconciler::electricity::write_clean_csv;
use btc_reconciler::NormalizeReport;
use log::warn;
use std::fs;
use std::path::Path;

/// Turns the raw EIA export into `eia_clean.csv`. A missing export is an error
/// for this stage only; any clean file left by an earlier run is removed so the
/// merge stage falls back to the default price.
pub fn clean_electricity_prices(config: &PipelineConfig) -> Result<NormalizeReport> {
    let result = write_clean_prices(config);
    if result.is_err() {
        discard_stale_output(&config.electricity_clean_path())?;
    }
    result
}

fn discard_stale_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("Removed stale {} from an earlier run", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("cannot remove stale {}", path.display())),
    }
}

fn write_clean_prices(config: &PipelineConfig) -> Result<NormalizeReport> {
    let input = config.electricity_raw_path();
    let output = config.electricity_clean_path();

    println!("🧹 Cleaning electricity prices from {}", input.display());

    let (prices, report) = config.electricity.normalize_file(&input)?;
    if prices.is_empty() {
        anyhow::bail!("{}: no usable month/price rows", input.display());
    }

    write_atomically(&output, |file| write_clean_csv(&prices, file))
        .with_context(|| format!("cannot write {}", output.display()))?;

    println!(
        "  ✅ {} months ({} to {}) saved to {}",
        prices.len(),
        prices[0].month,
        prices[prices.len() - 1].month,
        output.display()
    );
    if report.rejected() > 0 {
        println!("  ⚠️  {} rows rejected", report.rejected());
    }

    Ok(report)
}

use crate::atomic_file::write_atomically;
use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use btc_reconciler::{
    add_derived_metrics, AuxiliaryColumn, DerivedMetric, ReconcileConfig, Reconciler, SeriesLoader,
    SourceRole, SourceSpec, TimeSeries,
};
use log::warn;
use polars::prelude::*;
use std::path::PathBuf;

#[derive(Debug)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub derived: Vec<DerivedMetric>,
    /// Files that were missing or unparseable, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Loads every declared source, reconciles, derives and writes the dataset.
/// Fails without touching the output when no primary source is usable.
pub fn build_dataset(config: &PipelineConfig) -> Result<DatasetSummary> {
    build_dataset_from(&config.source_specs(), config, config.dataset_path())
}

pub fn build_dataset_from(
    specs: &[SourceSpec],
    config: &PipelineConfig,
    output: PathBuf,
) -> Result<DatasetSummary> {
    println!("🔄 Merging {} sources", specs.len());

    let mut primaries: Vec<TimeSeries> = Vec::new();
    let mut auxiliaries: Vec<AuxiliaryColumn> = Vec::new();
    let mut skipped = Vec::new();

    for spec in specs {
        let series = match SeriesLoader::load(spec) {
            Ok(loaded) => {
                println!(
                    "  📊 {}: {} observations ({} rejected)",
                    spec.name,
                    loaded.series.len(),
                    loaded.report.rejected()
                );
                Some(loaded.series)
            }
            Err(e) => {
                warn!("Excluding {}: {:#}", spec.path.display(), e);
                println!("  ⚠️  Excluded {}", spec.path.display());
                skipped.push((spec.path.clone(), format!("{:#}", e)));
                None
            }
        };

        match spec.role {
            SourceRole::Primary => primaries.extend(series),
            SourceRole::Auxiliary => auxiliaries.push(AuxiliaryColumn {
                name: spec.name.clone(),
                series,
                fill: spec.fill,
                default_value: spec.default_value,
            }),
        }
    }

    if primaries.is_empty() {
        let declared = specs.iter().filter(|s| s.role == SourceRole::Primary).count();
        anyhow::bail!("No usable API data: all {} primary sources missing or unparseable", declared);
    }

    let reconciler = Reconciler::new(ReconcileConfig {
        start_date: config.start_date,
    });
    let frame = reconciler.reconcile(primaries, auxiliaries)?;
    if !frame.is_contiguous() || frame.missing_cells() > 0 {
        warn!(
            "Reconciled frame is not dense: {} missing cells",
            frame.missing_cells()
        );
    }

    let (mut df, derived) = add_derived_metrics(frame.to_dataframe()?)?;

    write_atomically(&output, |file| {
        CsvWriter::new(file).include_header(true).finish(&mut df)?;
        Ok(())
    })
    .with_context(|| format!("cannot write {}", output.display()))?;

    let columns = df
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();
    println!(
        "  ✅ {} rows written to {}",
        df.height(),
        output.display()
    );

    Ok(DatasetSummary {
        path: output,
        rows: df.height(),
        columns,
        derived,
        skipped,
    })
}

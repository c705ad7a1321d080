use anyhow::{Context, Result};
use btc_reconciler::models::columns;
use btc_reconciler::{
    ElectricityNormalizer, SourceSpec, DEFAULT_EFFICIENCY_J_TH, DEFAULT_ELEC_COST_USD_PER_KWH,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One chart of the public charts API and the column it becomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSource {
    pub name: String,
    pub chart: String,
}

impl ChartSource {
    fn new(name: &str, chart: &str) -> Self {
        Self {
            name: name.to_string(),
            chart: chart.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api_base_url: String,
    pub charts: Vec<ChartSource>,

    pub raw_api_dir: PathBuf,
    pub manual_dir: PathBuf,
    pub processed_dir: PathBuf,

    pub efficiency_file: String,
    pub electricity_raw_file: String,
    pub electricity_clean_file: String,
    pub dataset_file: String,
    pub dashboard_file: PathBuf,

    pub electricity: ElectricityNormalizer,
    pub start_date: Option<NaiveDate>,
    pub default_efficiency_j_th: f64,
    pub default_elec_cost_usd_per_kwh: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.blockchain.info/charts/".to_string(),
            charts: vec![
                ChartSource::new(columns::PRICE_USD, "market-price"),
                ChartSource::new(columns::MARKET_CAP_USD, "market-cap"),
                ChartSource::new(columns::TRADE_VOLUME_USD, "trade-volume"),
                ChartSource::new(columns::HASHRATE_TH_S, "hash-rate"),
                ChartSource::new(columns::DIFFICULTY, "difficulty"),
                ChartSource::new(columns::MINERS_REVENUE_USD, "miners-revenue"),
                ChartSource::new(columns::N_TRANSACTIONS, "n-transactions"),
                ChartSource::new(columns::TRANSACTIONS_PER_SECOND, "transactions-per-second"),
                ChartSource::new(columns::MEMPOOL_SIZE_BYTES, "mempool-size"),
                ChartSource::new(columns::AVG_BLOCK_SIZE_MB, "avg-block-size"),
                ChartSource::new(columns::N_UNIQUE_ADDRESSES, "n-unique-addresses"),
                ChartSource::new(columns::TOTAL_BITCOINS, "total-bitcoins"),
                ChartSource::new(columns::FEES_TOTAL_BTC, "transaction-fees"),
                ChartSource::new(columns::COST_PER_TX_USD, "cost-per-transaction"),
            ],
            raw_api_dir: PathBuf::from("data/raw_api"),
            manual_dir: PathBuf::from("data/raw_manual"),
            processed_dir: PathBuf::from("data/processed"),
            efficiency_file: "efficiency_manual.csv".to_string(),
            electricity_raw_file: "Average_retail_price_of_electricity_monthly.csv".to_string(),
            electricity_clean_file: "eia_clean.csv".to_string(),
            dataset_file: "dataset_final_btc.csv".to_string(),
            dashboard_file: PathBuf::from("index.html"),
            electricity: ElectricityNormalizer::default(),
            start_date: NaiveDate::from_ymd_opt(2015, 1, 1),
            default_efficiency_j_th: DEFAULT_EFFICIENCY_J_TH,
            default_elec_cost_usd_per_kwh: DEFAULT_ELEC_COST_USD_PER_KWH,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with the JSON file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("cannot open config {}", path.display()))?;
                let config = serde_json::from_reader(std::io::BufReader::new(file))
                    .with_context(|| format!("invalid config {}", path.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn raw_chart_path(&self, name: &str) -> PathBuf {
        self.raw_api_dir.join(format!("{}.csv", name))
    }

    pub fn electricity_raw_path(&self) -> PathBuf {
        self.manual_dir.join(&self.electricity_raw_file)
    }

    pub fn electricity_clean_path(&self) -> PathBuf {
        self.processed_dir.join(&self.electricity_clean_file)
    }

    pub fn efficiency_path(&self) -> PathBuf {
        self.manual_dir.join(&self.efficiency_file)
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.processed_dir.join(&self.dataset_file)
    }

    /// Source descriptors for the merge stage: every chart, then the two
    /// manual series.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        let mut specs: Vec<SourceSpec> = self
            .charts
            .iter()
            .map(|c| SourceSpec::chart(&c.name, self.raw_chart_path(&c.name)))
            .collect();
        specs.push(SourceSpec::efficiency(self.efficiency_path(), self.default_efficiency_j_th));
        specs.push(SourceSpec::electricity(
            self.electricity_clean_path(),
            self.default_elec_cost_usd_per_kwh,
        ));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btc_reconciler::SourceRole;
    use std::io::Write;

    #[test]
    fn test_default_specs() {
        let config = PipelineConfig::default();
        let specs = config.source_specs();

        assert_eq!(specs.len(), 16);
        assert_eq!(specs.iter().filter(|s| s.role == SourceRole::Primary).count(), 14);
        assert_eq!(specs[3].path, PathBuf::from("data/raw_api/hashrate_th_s.csv"));
        let elec = specs.last().unwrap();
        assert_eq!(elec.path, PathBuf::from("data/processed/eia_clean.csv"));
        assert_eq!(elec.default_value, Some(DEFAULT_ELEC_COST_USD_PER_KWH));
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"start_date": "2020-01-01", "default_efficiency_j_th": 30.0, "charts": [{{"name": "price_usd", "chart": "market-price"}}]}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(config.default_efficiency_j_th, 30.0);
        assert_eq!(config.charts.len(), 1);
        assert_eq!(config.dataset_file, "dataset_final_btc.csv");
        assert_eq!(config.electricity.metadata_rows, 4);
    }
}

use crate::atomic_file::write_atomically;
use crate::config::ChartSource;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use reqwest::blocking::Client;
use std::io::Write;
use std::path::PathBuf;

/// Full history, CSV body, unsampled points.
const CHART_QUERY: &str = "timespan=all&format=csv&sampled=false";

#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub saved: Vec<PathBuf>,
    pub failed: Vec<(String, String)>,
}

pub struct ChartDownloader {
    client: Client,
    base_url: String,
    output_dir: PathBuf,
}

pub fn chart_url(base_url: &str, chart: &str) -> String {
    format!("{}{}?{}", base_url, chart, CHART_QUERY)
}

impl ChartDownloader {
    pub fn new(base_url: &str, output_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("cannot build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            output_dir,
        })
    }

    /// Downloads every chart; a failing chart is logged and skipped.
    pub fn download_all(&self, charts: &[ChartSource]) -> Result<DownloadSummary> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("cannot create {}", self.output_dir.display()))?;

        println!("📥 Downloading {} charts into {}", charts.len(), self.output_dir.display());

        let pb = ProgressBar::new(charts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?,
        );

        let mut summary = DownloadSummary::default();
        for source in charts {
            pb.set_message(source.name.clone());
            match self.download(source) {
                Ok(path) => {
                    info!("Saved {} to {}", source.chart, path.display());
                    summary.saved.push(path);
                }
                Err(e) => {
                    warn!("Download of {} ({}) failed: {:#}", source.chart, source.name, e);
                    summary.failed.push((source.name.clone(), format!("{:#}", e)));
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("done");

        println!(
            "  ✅ {} saved, {} failed",
            summary.saved.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    fn download(&self, source: &ChartSource) -> Result<PathBuf> {
        let url = chart_url(&self.base_url, &source.chart);
        let response = self.client.get(&url).send().with_context(|| format!("GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {} returned {}", url, status);
        }

        let body = response.bytes().context("cannot read response body")?;
        let path = self.output_dir.join(format!("{}.csv", source.name));
        write_atomically(&path, |file| Ok(file.write_all(&body)?))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_url() {
        assert_eq!(
            chart_url("https://api.blockchain.info/charts/", "hash-rate"),
            "https://api.blockchain.info/charts/hash-rate?timespan=all&format=csv&sampled=false"
        );
    }

    #[test]
    fn test_unreachable_host_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ChartDownloader::new("http://127.0.0.1:9/charts/", dir.path().join("raw")).unwrap();
        let charts = vec![
            ChartSource {
                name: "price_usd".to_string(),
                chart: "market-price".to_string(),
            },
            ChartSource {
                name: "hashrate_th_s".to_string(),
                chart: "hash-rate".to_string(),
            },
        ];

        let summary = downloader.download_all(&charts).unwrap();

        assert!(summary.saved.is_empty());
        assert_eq!(summary.failed.len(), 2);
        assert!(dir.path().join("raw").is_dir());
    }
}

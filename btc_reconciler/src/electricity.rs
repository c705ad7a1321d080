//! Cleaning of the EIA "Average retail price of electricity" export.
//!
//! The export carries a few lines of title metadata, a header row and one
//! `Month;Price` pair per line. Months come as `Jul-25` or `Apr 2025` and the
//! price is published in cents per kWh.

use crate::data_loader::{parse_number, sniff_delimiter};
use crate::models::{columns, PriceUnit};
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Month strings shorter than this are blank or footer rows.
const MIN_MONTH_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyPrice {
    pub month: NaiveDate,
    pub usd_per_kwh: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub rows_read: usize,
    pub rejected_short_month: usize,
    pub rejected_month_format: usize,
    pub rejected_price: usize,
    pub duplicates: usize,
    pub converted_from_cents: usize,
}

impl NormalizeReport {
    pub fn rejected(&self) -> usize {
        self.rejected_short_month + self.rejected_month_format + self.rejected_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElectricityNormalizer {
    /// Title lines before the header row.
    pub metadata_rows: usize,
    pub has_header: bool,
    /// `None` sniffs the delimiter from the first data line.
    pub delimiter: Option<char>,
    pub unit: PriceUnit,
}

impl Default for ElectricityNormalizer {
    fn default() -> Self {
        Self {
            metadata_rows: 4,
            has_header: true,
            delimiter: Some(';'),
            unit: PriceUnit::Auto,
        }
    }
}

impl ElectricityNormalizer {
    /// Reads back a file written by [`write_clean_csv`].
    pub fn for_clean_output() -> Self {
        Self {
            metadata_rows: 0,
            has_header: true,
            delimiter: Some(','),
            unit: PriceUnit::Auto,
        }
    }

    pub fn normalize_file(&self, path: &Path) -> Result<(Vec<MonthlyPrice>, NormalizeReport)> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("electricity price file {} not readable", path.display()))?;
        let (prices, report) = self.normalize_str(&content)?;

        info!(
            "{}: {} monthly prices from {} rows ({} rejected, {} converted from cents)",
            path.display(),
            prices.len(),
            report.rows_read,
            report.rejected(),
            report.converted_from_cents
        );
        if report.rejected() > 0 {
            warn!(
                "{}: rejected rows: {} short month, {} unknown month format, {} non-numeric price",
                path.display(),
                report.rejected_short_month,
                report.rejected_month_format,
                report.rejected_price
            );
        }

        Ok((prices, report))
    }

    pub fn normalize_str(&self, content: &str) -> Result<(Vec<MonthlyPrice>, NormalizeReport)> {
        let skip = self.metadata_rows + usize::from(self.has_header);
        let body: String = content
            .lines()
            .skip(skip)
            .collect::<Vec<_>>()
            .join("\n");

        let delimiter = match self.delimiter {
            Some(d) => d as u8,
            None => sniff_delimiter(body.lines().find(|l| !l.trim().is_empty()).unwrap_or("")),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut report = NormalizeReport::default();
        let mut prices = Vec::new();

        for record in reader.records() {
            let record = record.context("malformed electricity price row")?;
            report.rows_read += 1;

            let month_raw = record.get(0).unwrap_or("");
            if month_raw.chars().count() < MIN_MONTH_LEN {
                report.rejected_short_month += 1;
                continue;
            }

            let Some(month) = parse_month(month_raw) else {
                report.rejected_month_format += 1;
                continue;
            };

            // `;`-delimited exports may carry a decimal comma
            let decimal_comma = delimiter != b',';
            let Some(price) = record.get(1).and_then(|p| parse_number(p, decimal_comma)) else {
                report.rejected_price += 1;
                continue;
            };

            let usd_per_kwh = self.unit.to_dollars(price);
            if usd_per_kwh != price {
                report.converted_from_cents += 1;
            }

            prices.push(MonthlyPrice { month, usd_per_kwh });
        }

        let before = prices.len();
        prices.sort_by_key(|p| p.month);
        prices.dedup_by_key(|p| p.month);
        report.duplicates = before - prices.len();

        Ok((prices, report))
    }
}

/// `Mon-YY` first, then `Mon YYYY`, then ISO dates. Always the first of the month.
pub fn parse_month(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_matches('"');

    NaiveDate::parse_from_str(&format!("01-{}", raw), "%d-%b-%y")
        .or_else(|_| NaiveDate::parse_from_str(&format!("01 {}", raw), "%d %b %Y"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.with_day0(0))
        })
}

/// Writes `date,elec_cost_usd_per_kwh` rows with ISO dates.
pub fn write_clean_csv<W: Write>(prices: &[MonthlyPrice], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([columns::DATE, columns::ELEC_COST_USD_PER_KWH])?;
    for price in prices {
        writer.write_record([
            price.month.format("%Y-%m-%d").to_string(),
            price.usd_per_kwh.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EIA_EXPORT: &str = "\
Average retail price of electricity, monthly
Source: U.S. Energy Information Administration
cents per kilowatthour

Month;industrial
Jul-25;8.21
Apr 2025;7.95
;
Total
";

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_mixed_month_formats_in_dollars() {
        let (prices, report) = ElectricityNormalizer::default().normalize_str(EIA_EXPORT).unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].month, ymd(2025, 4, 1));
        assert!((prices[0].usd_per_kwh - 0.0795).abs() < 1e-12);
        assert_eq!(prices[1].month, ymd(2025, 7, 1));
        assert!((prices[1].usd_per_kwh - 0.0821).abs() < 1e-12);
        assert_eq!(report.converted_from_cents, 2);
    }

    #[test]
    fn test_short_and_unparseable_months_are_counted() {
        let (_, report) = ElectricityNormalizer::default().normalize_str(EIA_EXPORT).unwrap();

        assert_eq!(report.rows_read, 4);
        assert_eq!(report.rejected_short_month, 1);
        assert_eq!(report.rejected_month_format, 1);
        assert_eq!(report.rejected_price, 0);
    }

    #[test]
    fn test_non_numeric_price_dropped() {
        let content = "Month;Price\nJan-24;--\nFeb-24;8.0\n";
        let normalizer = ElectricityNormalizer {
            metadata_rows: 0,
            ..Default::default()
        };
        let (prices, report) = normalizer.normalize_str(content).unwrap();

        assert_eq!(prices.len(), 1);
        assert_eq!(report.rejected_price, 1);
    }

    #[test]
    fn test_duplicate_months_keep_first() {
        let content = "Month;Price\nJan-24;8.0\nJan 2024;9.0\n";
        let normalizer = ElectricityNormalizer {
            metadata_rows: 0,
            ..Default::default()
        };
        let (prices, report) = normalizer.normalize_str(content).unwrap();

        assert_eq!(prices.len(), 1);
        assert!((prices[0].usd_per_kwh - 0.08).abs() < 1e-12);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_normalizing_own_output_is_idempotent() {
        let (first, _) = ElectricityNormalizer::default().normalize_str(EIA_EXPORT).unwrap();

        let mut buf = Vec::new();
        write_clean_csv(&first, &mut buf).unwrap();
        let clean = String::from_utf8(buf).unwrap();
        assert!(clean.starts_with("date,elec_cost_usd_per_kwh"));

        let (second, report) = ElectricityNormalizer::for_clean_output()
            .normalize_str(&clean)
            .unwrap();

        assert_eq!(second, first);
        assert_eq!(report.converted_from_cents, 0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ElectricityNormalizer::default().normalize_file(&dir.path().join("missing.csv"));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("jul-25"), Some(ymd(2025, 7, 1)));
        assert_eq!(parse_month("Apr 2025"), Some(ymd(2025, 4, 1)));
        assert_eq!(parse_month("2025-04-17"), Some(ymd(2025, 4, 1)));
        assert_eq!(parse_month("Total"), None);
    }
}

use crate::models::{HeaderMode, Observation, SourceSpec, TimeSeries};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use std::fs;
use std::path::Path;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Row accounting for one loaded file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub rows_read: usize,
    pub header_skipped: bool,
    /// Rows the CSV reader could not decode.
    pub rejected_unreadable: usize,
    /// Rows with more than the two `(date, value)` fields.
    pub rejected_layout: usize,
    pub rejected_date: usize,
    pub rejected_value: usize,
    pub rejected_range: usize,
    pub duplicates: usize,
}

impl LoadReport {
    pub fn rejected(&self) -> usize {
        self.rejected_unreadable
            + self.rejected_layout
            + self.rejected_date
            + self.rejected_value
            + self.rejected_range
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: TimeSeries,
    pub report: LoadReport,
}

/// Reads two-column `(date, value)` files according to their declared schema.
pub struct SeriesLoader;

impl SeriesLoader {
    pub fn load(spec: &SourceSpec) -> Result<LoadedSeries> {
        let content = fs::read(&spec.path)
            .with_context(|| format!("cannot read {}", spec.path.display()))?;
        Self::load_bytes(spec, &content)
    }

    pub fn load_str(spec: &SourceSpec, content: &str) -> Result<LoadedSeries> {
        Self::load_bytes(spec, content.as_bytes())
    }

    /// Parses already-read file content. Rows that are not valid UTF-8 are
    /// rejected one by one. Fails when no row yields a value.
    pub fn load_bytes(spec: &SourceSpec, content: &[u8]) -> Result<LoadedSeries> {
        let delimiter = match spec.schema.delimiter {
            Some(d) => d as u8,
            None => {
                let text = String::from_utf8_lossy(content);
                sniff_delimiter(text.lines().find(|l| !l.trim().is_empty()).unwrap_or(""))
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        let date_format = spec.schema.date_format.as_deref();
        let mut report = LoadReport::default();
        let mut observations = Vec::new();

        for (idx, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!("{}: unreadable row {}: {}", spec.path.display(), idx + 1, e);
                    report.rows_read += 1;
                    report.rejected_unreadable += 1;
                    continue;
                }
            };

            let first = record.get(0).unwrap_or("");
            if idx == 0 {
                let is_header = match spec.schema.header {
                    HeaderMode::Present => true,
                    HeaderMode::Absent => false,
                    HeaderMode::Detect => parse_timestamp(first, date_format).is_none(),
                };
                if is_header {
                    report.header_skipped = true;
                    continue;
                }
            }

            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            report.rows_read += 1;

            // a decimal comma inside a `,`-delimited file splits the value
            if record.iter().skip(2).any(|field| !field.is_empty()) {
                report.rejected_layout += 1;
                continue;
            }

            let Some(timestamp) = parse_timestamp(first, date_format) else {
                report.rejected_date += 1;
                continue;
            };

            let Some(value) = record
                .get(1)
                .and_then(|raw| parse_number(raw, spec.schema.decimal_comma))
            else {
                report.rejected_value += 1;
                continue;
            };

            if let Some(range) = &spec.valid_range {
                if !range.contains(value) {
                    report.rejected_range += 1;
                    continue;
                }
            }

            observations.push(Observation { timestamp, value });
        }

        if observations.is_empty() {
            bail!(
                "{}: no numeric observations in {} rows",
                spec.path.display(),
                report.rows_read
            );
        }

        let (series, duplicates) = TimeSeries::from_observations(&spec.name, spec.frequency, observations);
        report.duplicates = duplicates;

        if report.rejected() > 0 || duplicates > 0 {
            warn!(
                "{}: rejected {} of {} rows (unreadable {}, extra fields {}, date {}, value {}, range {}), {} duplicate timestamps",
                file_label(&spec.path),
                report.rejected(),
                report.rows_read,
                report.rejected_unreadable,
                report.rejected_layout,
                report.rejected_date,
                report.rejected_value,
                report.rejected_range,
                duplicates
            );
        }

        Ok(LoadedSeries { series, report })
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Picks the most frequent of `;`, tab and `,` in a sample line, preferring
/// `,` when none occurs.
pub fn sniff_delimiter(sample: &str) -> u8 {
    let candidates = [b';', b'\t', b','];
    let mut best = b',';
    let mut best_count = 0;
    for candidate in candidates {
        let count = sample.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Parses a timestamp with the declared format, or tries the known datetime
/// and date formats. Date-only values land at midnight.
pub fn parse_timestamp(raw: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw.trim().trim_matches('"');
    if raw.is_empty() {
        return None;
    }

    if let Some(format) = format {
        return NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, format)
                    .ok()
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            });
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

/// Coerces a cell to a finite number, `None` otherwise.
pub fn parse_number(raw: &str, decimal_comma: bool) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"');
    if trimmed.is_empty() {
        return None;
    }

    let value = if decimal_comma && trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replace(',', ".").parse::<f64>().ok()?
    } else {
        trimmed.parse::<f64>().ok()?
    };

    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, SourceSchema, ValueRange};

    fn chart_spec() -> SourceSpec {
        SourceSpec::chart("hashrate_th_s", "raw/hashrate_th_s.csv")
    }

    #[test]
    fn test_headerless_chart_body() {
        let body = "2020-01-01 00:00:00,10.5\n2020-01-02 00:00:00,11.0\n";
        let loaded = SeriesLoader::load_str(&chart_spec(), body).unwrap();

        assert_eq!(loaded.series.len(), 2);
        assert!(!loaded.report.header_skipped);
        assert_eq!(loaded.series.observations()[0].value, 10.5);
    }

    #[test]
    fn test_non_numeric_values_become_missing() {
        let body = "2020-01-01,10\n2020-01-02,n/a\n2020-01-03,12\n";
        let loaded = SeriesLoader::load_str(&chart_spec(), body).unwrap();

        assert_eq!(loaded.series.len(), 2);
        assert_eq!(loaded.report.rejected_value, 1);
    }

    #[test]
    fn test_all_non_numeric_fails() {
        let body = "2020-01-01,abc\n2020-01-02,def\n";
        let err = SeriesLoader::load_str(&chart_spec(), body).unwrap_err();
        assert!(err.to_string().contains("no numeric observations"));
    }

    #[test]
    fn test_detect_header() {
        let mut spec = chart_spec();
        spec.schema.header = HeaderMode::Detect;

        let with_header = SeriesLoader::load_str(&spec, "Timestamp,hash-rate\n2020-01-01,5\n").unwrap();
        assert!(with_header.report.header_skipped);
        assert_eq!(with_header.series.len(), 1);

        let without = SeriesLoader::load_str(&spec, "2020-01-01,5\n2020-01-02,6\n").unwrap();
        assert!(!without.report.header_skipped);
        assert_eq!(without.series.len(), 2);
    }

    #[test]
    fn test_efficiency_file_with_decimal_comma() {
        let spec = SourceSpec::efficiency("manual/efficiency_manual.csv", 15.0);
        let body = "date;efficiency_j_th\n2019-01-01;45,5\n2021-06-01;29,5\n";
        let loaded = SeriesLoader::load_str(&spec, body).unwrap();

        assert_eq!(loaded.series.frequency, Frequency::Irregular);
        let values: Vec<f64> = loaded.series.observations().iter().map(|o| o.value).collect();
        assert_eq!(values, vec![45.5, 29.5]);
    }

    #[test]
    fn test_values_outside_declared_range_are_rejected() {
        let spec = SourceSpec {
            valid_range: Some(ValueRange { min: 0.0, max: 1.0 }),
            schema: SourceSchema::chart_api(),
            ..chart_spec()
        };
        let loaded = SeriesLoader::load_str(&spec, "2020-01-01,0.07\n2020-02-01,7.2\n").unwrap();

        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.report.rejected_range, 1);
    }

    #[test]
    fn test_decimal_comma_in_comma_delimited_file_is_rejected() {
        let spec = SourceSpec::efficiency("manual/efficiency_manual.csv", 15.0);
        let body = "date,efficiency_j_th\n2019-01-01,45,5\n2020-01-01,38\n2021-06-01,29,5\n";

        let loaded = SeriesLoader::load_str(&spec, body).unwrap();

        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.series.observations()[0].value, 38.0);
        assert_eq!(loaded.report.rejected_layout, 2);
        assert_eq!(loaded.report.rejected(), 2);

        let only_split = "date,efficiency_j_th\n2019-01-01,45,5\n2021-06-01,29,5\n";
        assert!(SeriesLoader::load_str(&spec, only_split).is_err());
    }

    #[test]
    fn test_trailing_empty_field_is_accepted() {
        let loaded = SeriesLoader::load_str(&chart_spec(), "2020-01-01,10,\n").unwrap();

        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.report.rejected(), 0);
    }

    #[test]
    fn test_invalid_utf8_row_counted_as_unreadable() {
        let mut body = b"2020-01-01,10\n".to_vec();
        body.extend_from_slice(b"2020-01-02,\xff\xfe\n");
        body.extend_from_slice(b"2020-01-03,12\n");

        let loaded = SeriesLoader::load_bytes(&chart_spec(), &body).unwrap();

        assert_eq!(loaded.series.len(), 2);
        assert_eq!(loaded.report.rejected_unreadable, 1);
        assert_eq!(loaded.report.rejected_date, 0);
        assert_eq!(loaded.report.rejected(), 1);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("Month;Price"), b';');
        assert_eq!(sniff_delimiter("date,value"), b',');
        assert_eq!(sniff_delimiter("a\tb"), b'\t');
        assert_eq!(sniff_delimiter("nothing"), b',');
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2009-01-03 00:00:00", None).is_some());
        assert!(parse_timestamp("2021-06-01", None).is_some());
        assert!(parse_timestamp("06/01/2021", None).is_some());
        assert!(parse_timestamp("Timestamp", None).is_none());
        assert!(parse_timestamp("2021-06-01", Some("%Y-%m-%d")).is_some());
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("price_usd.csv");
        std::fs::write(&path, "2020-01-01 00:00:00,7200\n").unwrap();

        let loaded = SeriesLoader::load(&SourceSpec::chart("price_usd", &path)).unwrap();
        assert_eq!(loaded.series.name, "price_usd");

        let missing = SeriesLoader::load(&SourceSpec::chart("x", dir.path().join("x.csv")));
        assert!(missing.is_err());
    }
}

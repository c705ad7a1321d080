//! Daily-calendar reconciliation of heterogeneous series.
//!
//! Primary series are outer-joined and define the calendar. Auxiliary series
//! are densified inside their own span (linear or step), left-joined, and never
//! extend the calendar. The whole frame is then forward-filled, backward-filled,
//! defaulted where a column has no value at all, and cut at the start date.

use crate::models::{columns, FillStrategy, Frequency, TimeSeries};
use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate};
use log::{info, warn};
use polars::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ReconcileConfig {
    /// Rows before this date are dropped after filling.
    pub start_date: Option<NaiveDate>,
}

/// A manual series slot. `series` is `None` when its file was missing or
/// unreadable; the column then falls back to `default_value`.
#[derive(Debug, Clone)]
pub struct AuxiliaryColumn {
    pub name: String,
    pub series: Option<TimeSeries>,
    pub fill: FillStrategy,
    pub default_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Contiguous daily calendar with one column per series.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledFrame {
    dates: Vec<NaiveDate>,
    columns: Vec<FrameColumn>,
}

impl ReconciledFrame {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn missing_cells(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.iter().filter(|v| v.is_none()).count())
            .sum()
    }

    /// True when consecutive dates are exactly one day apart.
    pub fn is_contiguous(&self) -> bool {
        self.dates.windows(2).all(|w| w[1] - w[0] == Duration::days(1))
    }

    /// ISO `date` string column followed by one Float64 column per series.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let dates: Vec<String> = self
            .dates
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();

        let mut series = Vec::with_capacity(self.columns.len() + 1);
        series.push(Series::new(columns::DATE.into(), dates));
        for column in &self.columns {
            series.push(Series::new(column.name.as_str().into(), &column.values));
        }

        DataFrame::new(series)
    }

    fn truncate_before(&mut self, start: NaiveDate) {
        let keep_from = self.dates.partition_point(|d| *d < start);
        self.dates.drain(..keep_from);
        for column in &mut self.columns {
            column.values.drain(..keep_from);
        }
    }
}

pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn reconcile(&self, primaries: Vec<TimeSeries>, auxiliaries: Vec<AuxiliaryColumn>) -> Result<ReconciledFrame> {
        let mut primary_daily: Vec<(String, BTreeMap<NaiveDate, f64>)> = Vec::new();
        for series in primaries {
            if primary_daily.iter().any(|(name, _)| *name == series.name) {
                warn!("Duplicate source '{}' ignored", series.name);
                continue;
            }
            let daily = resample_daily(&series, FillStrategy::None);
            if daily.is_empty() {
                warn!("Source '{}' has no observations, skipping", series.name);
                continue;
            }
            log_coverage(&series.name, series.frequency, &daily);
            primary_daily.push((series.name, daily));
        }

        if primary_daily.is_empty() {
            bail!("No usable primary series to reconcile");
        }

        // Outer join: calendar spans the union of all primary ranges
        let first = primary_daily
            .iter()
            .filter_map(|(_, d)| d.keys().next())
            .min()
            .copied();
        let last = primary_daily
            .iter()
            .filter_map(|(_, d)| d.keys().next_back())
            .max()
            .copied();
        let (Some(first), Some(last)) = (first, last) else {
            bail!("Primary series carry no dates");
        };

        let dates = daily_calendar(first, last);
        let mut columns: Vec<FrameColumn> = primary_daily
            .iter()
            .map(|(name, daily)| FrameColumn {
                name: name.clone(),
                values: dates.iter().map(|d| daily.get(d).copied()).collect(),
            })
            .collect();

        // Left join: auxiliary series only fill days the calendar already has
        let mut defaults = Vec::new();
        for aux in &auxiliaries {
            let values = match &aux.series {
                Some(series) => {
                    let daily = resample_daily(series, aux.fill);
                    let joined: Vec<Option<f64>> = dates.iter().map(|d| daily.get(d).copied()).collect();
                    let overlap = joined.iter().filter(|v| v.is_some()).count();
                    info!(
                        "Auxiliary '{}': {} daily values, {} inside the calendar",
                        aux.name,
                        daily.len(),
                        overlap
                    );
                    joined
                }
                None => vec![None; dates.len()],
            };
            columns.retain(|c| c.name != aux.name);
            columns.push(FrameColumn {
                name: aux.name.clone(),
                values,
            });
            defaults.push((aux.name.clone(), aux.default_value));
        }

        for column in &mut columns {
            fill_forward(&mut column.values);
            fill_backward(&mut column.values);
        }

        for column in &mut columns {
            if column.values.iter().any(|v| v.is_some()) {
                continue;
            }
            let default = defaults
                .iter()
                .find(|(name, _)| *name == column.name)
                .and_then(|(_, value)| *value);
            match default {
                Some(value) => {
                    warn!("No data for '{}', using default {}", column.name, value);
                    column.values.iter_mut().for_each(|v| *v = Some(value));
                }
                None => warn!("No data for '{}' and no default declared", column.name),
            }
        }

        let mut frame = ReconciledFrame { dates, columns };

        if let Some(start) = self.config.start_date {
            frame.truncate_before(start);
            if frame.height() == 0 {
                bail!("No rows on or after start date {}", start);
            }
        }

        info!(
            "Reconciled {} columns over {} days ({} to {})",
            frame.columns.len(),
            frame.height(),
            frame.dates.first().map(|d| d.to_string()).unwrap_or_default(),
            frame.dates.last().map(|d| d.to_string()).unwrap_or_default()
        );

        Ok(frame)
    }
}

fn log_coverage(name: &str, frequency: Frequency, daily: &BTreeMap<NaiveDate, f64>) {
    let (Some(first), Some(last)) = (daily.keys().next(), daily.keys().next_back()) else {
        return;
    };
    let span = (*last - *first).num_days() + 1;
    let coverage = daily.len() as f64 / span as f64;
    if coverage < frequency.expected_coverage() {
        warn!(
            "Source '{}' covers {:.0}% of {} days, sparser than declared {:?}",
            name,
            coverage * 100.0,
            span,
            frequency
        );
    }
}

/// Every date from `first` to `last`, inclusive.
pub fn daily_calendar(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    first.iter_days().take_while(|d| *d <= last).collect()
}

/// Day-mean aggregation, then densification inside the series' own span.
pub fn resample_daily(series: &TimeSeries, fill: FillStrategy) -> BTreeMap<NaiveDate, f64> {
    let daily = series.daily_means();
    match fill {
        FillStrategy::None => daily,
        FillStrategy::Linear => interpolate_linear(&daily),
        FillStrategy::Forward => forward_fill_days(&daily),
    }
}

/// Straight-line values for every day between consecutive known points.
pub fn interpolate_linear(points: &BTreeMap<NaiveDate, f64>) -> BTreeMap<NaiveDate, f64> {
    let mut out = BTreeMap::new();
    let known: Vec<(NaiveDate, f64)> = points.iter().map(|(d, v)| (*d, *v)).collect();

    for pair in known.windows(2) {
        let (d0, v0) = pair[0];
        let (d1, v1) = pair[1];
        let span = (d1 - d0).num_days() as f64;
        for day in daily_calendar(d0, d1) {
            let t = (day - d0).num_days() as f64 / span;
            out.insert(day, v0 + (v1 - v0) * t);
        }
    }

    if let Some((d, v)) = known.last() {
        out.insert(*d, *v);
    }
    out
}

/// Each day from the first to the last point holds the latest known value.
pub fn forward_fill_days(points: &BTreeMap<NaiveDate, f64>) -> BTreeMap<NaiveDate, f64> {
    let (Some(first), Some(last)) = (points.keys().next(), points.keys().next_back()) else {
        return BTreeMap::new();
    };

    let mut out = BTreeMap::new();
    let mut current = None;
    for day in daily_calendar(*first, *last) {
        if let Some(v) = points.get(&day) {
            current = Some(*v);
        }
        if let Some(v) = current {
            out.insert(day, v);
        }
    }
    out
}

pub fn fill_forward(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
}

pub fn fill_backward(values: &mut [Option<f64>]) {
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily(name: &str, points: &[(NaiveDate, f64)]) -> TimeSeries {
        TimeSeries::from_daily(name, Frequency::Daily, points)
    }

    fn reconcile(primaries: Vec<TimeSeries>, auxiliaries: Vec<AuxiliaryColumn>) -> ReconciledFrame {
        Reconciler::new(ReconcileConfig::default())
            .reconcile(primaries, auxiliaries)
            .unwrap()
    }

    #[test]
    fn test_sparse_series_forward_filled() {
        let price = daily(
            "price",
            &(1..=5).map(|d| (ymd(2020, 1, d), 100.0 + d as f64)).collect::<Vec<_>>(),
        );
        let hashrate = daily("hashrate", &[(ymd(2020, 1, 1), 7.0), (ymd(2020, 1, 5), 9.0)]);

        let frame = reconcile(vec![price, hashrate], vec![]);

        assert_eq!(frame.height(), 5);
        let hashrate = frame.column("hashrate").unwrap();
        assert_eq!(hashrate[1..4], [Some(7.0), Some(7.0), Some(7.0)]);
        assert_eq!(hashrate[4], Some(9.0));
        assert_eq!(frame.missing_cells(), 0);
    }

    #[test]
    fn test_calendar_is_union_of_primary_ranges() {
        let a = daily("a", &[(ymd(2020, 1, 1), 1.0), (ymd(2020, 1, 3), 3.0)]);
        let b = daily("b", &[(ymd(2020, 1, 10), 5.0)]);

        let frame = reconcile(vec![a, b], vec![]);

        assert_eq!(frame.dates().first(), Some(&ymd(2020, 1, 1)));
        assert_eq!(frame.dates().last(), Some(&ymd(2020, 1, 10)));
        assert_eq!(frame.height(), 10);
        assert!(frame.is_contiguous());
        // leading gap in `b` borrows its first known value
        assert_eq!(frame.column("b").unwrap()[0], Some(5.0));
        assert_eq!(frame.missing_cells(), 0);
    }

    #[test]
    fn test_auxiliary_does_not_extend_calendar() {
        let price = daily("price", &[(ymd(2020, 1, 1), 1.0), (ymd(2020, 1, 4), 4.0)]);
        let efficiency = TimeSeries::from_daily(
            columns::EFFICIENCY_J_TH,
            Frequency::Irregular,
            &[(ymd(2019, 12, 1), 40.0), (ymd(2020, 2, 1), 30.0)],
        );
        let aux = AuxiliaryColumn {
            name: columns::EFFICIENCY_J_TH.to_string(),
            series: Some(efficiency),
            fill: FillStrategy::Linear,
            default_value: Some(15.0),
        };

        let frame = reconcile(vec![price], vec![aux]);

        assert_eq!(frame.height(), 4);
        let eff = frame.column(columns::EFFICIENCY_J_TH).unwrap();
        // 31 of 62 days between the two readings have elapsed on 2020-01-01
        assert!((eff[0].unwrap() - 35.0).abs() < 1e-9);
        assert!(eff[0].unwrap() > eff[3].unwrap());
    }

    #[test]
    fn test_electricity_step_fill_and_default_fallback() {
        let price = daily(
            "price",
            &(1..=31).map(|d| (ymd(2020, 1, d), 1.0)).collect::<Vec<_>>(),
        );
        let elec = TimeSeries::from_daily(
            columns::ELEC_COST_USD_PER_KWH,
            Frequency::Monthly,
            &[(ymd(2019, 12, 1), 0.07), (ymd(2020, 1, 1), 0.08), (ymd(2020, 2, 1), 0.09)],
        );
        let auxiliaries = vec![
            AuxiliaryColumn {
                name: columns::ELEC_COST_USD_PER_KWH.to_string(),
                series: Some(elec),
                fill: FillStrategy::Forward,
                default_value: Some(0.05),
            },
            AuxiliaryColumn {
                name: columns::EFFICIENCY_J_TH.to_string(),
                series: None,
                fill: FillStrategy::Linear,
                default_value: Some(15.0),
            },
        ];

        let frame = reconcile(vec![price], auxiliaries);

        let elec = frame.column(columns::ELEC_COST_USD_PER_KWH).unwrap();
        assert!(elec.iter().all(|v| *v == Some(0.08)));
        let eff = frame.column(columns::EFFICIENCY_J_TH).unwrap();
        assert!(eff.iter().all(|v| *v == Some(15.0)));
    }

    #[test]
    fn test_start_date_cutoff_after_fill() {
        let a = daily("a", &[(ymd(2014, 12, 30), 1.0), (ymd(2015, 1, 2), 2.0)]);
        let frame = Reconciler::new(ReconcileConfig {
            start_date: Some(ymd(2015, 1, 1)),
        })
        .reconcile(vec![a], vec![])
        .unwrap();

        assert_eq!(frame.dates(), &[ymd(2015, 1, 1), ymd(2015, 1, 2)]);
        assert_eq!(frame.column("a").unwrap(), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_cutoff_past_all_data_fails() {
        let a = daily("a", &[(ymd(2014, 1, 1), 1.0)]);
        let result = Reconciler::new(ReconcileConfig {
            start_date: Some(ymd(2015, 1, 1)),
        })
        .reconcile(vec![a], vec![]);

        assert!(result.is_err());
    }

    #[test]
    fn test_no_primaries_fails() {
        let result = Reconciler::new(ReconcileConfig::default()).reconcile(vec![], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fill_forward_then_backward() {
        let mut values = vec![None, Some(2.0), None, Some(4.0), None];
        fill_forward(&mut values);
        fill_backward(&mut values);
        assert_eq!(values, vec![Some(2.0), Some(2.0), Some(2.0), Some(4.0), Some(4.0)]);
    }

    #[test]
    fn test_to_dataframe_layout() {
        let a = daily("a", &[(ymd(2020, 1, 1), 1.0), (ymd(2020, 1, 2), 2.0)]);
        let df = reconcile(vec![a], vec![]).to_dataframe().unwrap();

        assert_eq!(df.shape(), (2, 2));
        let dates = df.column(columns::DATE).unwrap().str().unwrap();
        assert_eq!(dates.get(0), Some("2020-01-01"));
        let values = df.column("a").unwrap().f64().unwrap();
        assert_eq!(values.get(1), Some(2.0));
    }
}

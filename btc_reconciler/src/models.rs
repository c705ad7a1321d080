use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Fallback efficiency when no efficiency observation reaches the frame.
/// Matches latest-generation ASIC hardware, the same assumption the attack
/// cost is built on.
pub const DEFAULT_EFFICIENCY_J_TH: f64 = 15.0;

/// Fallback U.S. industrial electricity price when the cleaned EIA file is
/// missing or does not overlap the calendar.
pub const DEFAULT_ELEC_COST_USD_PER_KWH: f64 = 0.05;

/// Column names shared by the merge stage, the derived metrics and the dashboard.
pub mod columns {
    pub const DATE: &str = "date";

    pub const PRICE_USD: &str = "price_usd";
    pub const MARKET_CAP_USD: &str = "market_cap_usd";
    pub const TRADE_VOLUME_USD: &str = "trade_volume_usd";
    pub const HASHRATE_TH_S: &str = "hashrate_th_s";
    pub const DIFFICULTY: &str = "difficulty";
    pub const MINERS_REVENUE_USD: &str = "miners_revenue_usd";
    pub const N_TRANSACTIONS: &str = "n_transactions";
    pub const TRANSACTIONS_PER_SECOND: &str = "transactions_per_second";
    pub const MEMPOOL_SIZE_BYTES: &str = "mempool_size_bytes";
    pub const AVG_BLOCK_SIZE_MB: &str = "avg_block_size_mb";
    pub const N_UNIQUE_ADDRESSES: &str = "n_unique_addresses";
    pub const TOTAL_BITCOINS: &str = "total_bitcoins";
    pub const FEES_TOTAL_BTC: &str = "fees_total_btc";
    pub const COST_PER_TX_USD: &str = "cost_per_tx_usd";

    pub const EFFICIENCY_J_TH: &str = "efficiency_j_th";
    pub const ELEC_COST_USD_PER_KWH: &str = "elec_cost_usd_per_kwh";

    pub const ATTACK_HOURLY_COST_USD: &str = "attack_hourly_cost_usd";
    pub const NETWORK_POWER_GW: &str = "network_power_gw";
    pub const MINERS_REVENUE_BTC: &str = "miners_revenue_btc";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Monthly,
    Irregular,
}

/// Daily charts skip weekends and outages on some early ranges; fewer than
/// one observed day in two means the source is not really daily.
pub const MIN_DAILY_COVERAGE: f64 = 0.5;

/// One reading per month, with slack for a late first-of-month entry.
pub const MIN_MONTHLY_COVERAGE: f64 = 1.0 / 40.0;

impl Frequency {
    /// Fraction of calendar days a well-formed source of this frequency covers.
    /// Sparser sources are logged, never rejected.
    pub fn expected_coverage(&self) -> f64 {
        match self {
            Frequency::Daily => MIN_DAILY_COVERAGE,
            Frequency::Monthly => MIN_MONTHLY_COVERAGE,
            Frequency::Irregular => 0.0,
        }
    }
}

/// How a series is densified inside its own date span before joining.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    None,
    Linear,
    Forward,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    Present,
    Absent,
    /// First row is a header iff its first cell does not parse as a date.
    Detect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// API series; outer-joined, defines the calendar.
    Primary,
    /// Manual series; left-joined, never extends the calendar.
    Auxiliary,
}

/// Declared unit of the electricity price column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    Dollars,
    Cents,
    /// Values above 1.0 are cents, the rest are already dollars.
    Auto,
}

impl PriceUnit {
    pub fn to_dollars(&self, price: f64) -> f64 {
        match self {
            PriceUnit::Dollars => price,
            PriceUnit::Cents => price / 100.0,
            PriceUnit::Auto if price > 1.0 => price / 100.0,
            PriceUnit::Auto => price,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSchema {
    pub header: HeaderMode,
    /// `None` sniffs the delimiter from the first line.
    pub delimiter: Option<char>,
    /// chrono format for the date column; `None` tries the known formats.
    pub date_format: Option<String>,
    /// Accept `,` as the decimal separator when a value has no `.`.
    pub decimal_comma: bool,
}

impl SourceSchema {
    /// Headerless `timestamp,value` body returned by the charts API.
    pub fn chart_api() -> Self {
        Self {
            header: HeaderMode::Absent,
            delimiter: Some(','),
            date_format: None,
            decimal_comma: false,
        }
    }

    pub fn with_header() -> Self {
        Self {
            header: HeaderMode::Present,
            delimiter: None,
            date_format: None,
            decimal_comma: true,
        }
    }
}

/// Declarative description of one input file of the merge stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    pub name: String,
    pub path: PathBuf,
    pub role: SourceRole,
    pub frequency: Frequency,
    pub fill: FillStrategy,
    pub schema: SourceSchema,
    pub valid_range: Option<ValueRange>,
    /// Used when the column ends up with no value at all.
    pub default_value: Option<f64>,
}

impl SourceSpec {
    pub fn chart(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            role: SourceRole::Primary,
            frequency: Frequency::Daily,
            fill: FillStrategy::None,
            schema: SourceSchema::chart_api(),
            valid_range: None,
            default_value: None,
        }
    }

    /// Manual ASIC efficiency entries, interpolated linearly between readings.
    pub fn efficiency(path: impl Into<PathBuf>, default_value: f64) -> Self {
        Self {
            name: columns::EFFICIENCY_J_TH.to_string(),
            path: path.into(),
            role: SourceRole::Auxiliary,
            frequency: Frequency::Irregular,
            fill: FillStrategy::Linear,
            schema: SourceSchema::with_header(),
            valid_range: Some(ValueRange { min: 0.1, max: 10_000.0 }),
            default_value: Some(default_value),
        }
    }

    /// Cleaned monthly electricity price, held constant until the next reading.
    pub fn electricity(path: impl Into<PathBuf>, default_value: f64) -> Self {
        Self {
            name: columns::ELEC_COST_USD_PER_KWH.to_string(),
            path: path.into(),
            role: SourceRole::Auxiliary,
            frequency: Frequency::Monthly,
            fill: FillStrategy::Forward,
            schema: SourceSchema {
                header: HeaderMode::Present,
                delimiter: Some(','),
                date_format: Some("%Y-%m-%d".to_string()),
                decimal_comma: false,
            },
            valid_range: Some(ValueRange { min: 0.0, max: 1.0 }),
            default_value: Some(default_value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// A named series with strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub frequency: Frequency,
    observations: Vec<Observation>,
}

impl TimeSeries {
    /// Sorts by timestamp and keeps the first occurrence (in input order) of
    /// every duplicated timestamp. Returns the series and the number dropped.
    pub fn from_observations(
        name: impl Into<String>,
        frequency: Frequency,
        mut observations: Vec<Observation>,
    ) -> (Self, usize) {
        let before = observations.len();
        observations.sort_by_key(|o| o.timestamp);
        observations.dedup_by_key(|o| o.timestamp);
        let duplicates = before - observations.len();

        (
            Self {
                name: name.into(),
                frequency,
                observations,
            },
            duplicates,
        )
    }

    pub fn from_daily(name: impl Into<String>, frequency: Frequency, points: &[(NaiveDate, f64)]) -> Self {
        let observations = points
            .iter()
            .map(|(date, value)| Observation {
                timestamp: date.and_time(chrono::NaiveTime::MIN),
                value: *value,
            })
            .collect();
        Self::from_observations(name, frequency, observations).0
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.observations.first().map(|o| o.timestamp.date())
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.observations.last().map(|o| o.timestamp.date())
    }

    /// One value per calendar day that has observations: the mean of that day.
    pub fn daily_means(&self) -> BTreeMap<NaiveDate, f64> {
        let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for obs in &self.observations {
            let entry = sums.entry(obs.timestamp.date()).or_insert((0.0, 0));
            entry.0 += obs.value;
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(date, (sum, count))| (date, sum / count as f64))
            .collect()
    }
}

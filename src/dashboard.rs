use crate::atomic_file::write_atomically;
use anyhow::{Context, Result};
use btc_reconciler::models::columns;
use chrono::NaiveDate;
use log::{info, warn};
use plotters::prelude::*;
use polars::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const PANEL_SIZE: (u32, u32) = (640, 380);
const ATTACK_COST_SMA_DAYS: usize = 7;
const BOOTSTRAP_CSS: &str = "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css";
const BOOTSTRAP_JS: &str = "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/js/bootstrap.bundle.min.js";

/// One chart of a tab.
#[derive(Debug, Clone)]
pub struct Panel {
    pub column: &'static str,
    pub title: &'static str,
    pub y_desc: &'static str,
    pub color: RGBColor,
    pub log_scale: bool,
    /// Trailing moving average drawn over the series, in days.
    pub moving_average: Option<usize>,
}

impl Panel {
    fn line(column: &'static str, title: &'static str, y_desc: &'static str, color: RGBColor) -> Self {
        Self {
            column,
            title,
            y_desc,
            color,
            log_scale: false,
            moving_average: None,
        }
    }

    fn log(mut self) -> Self {
        self.log_scale = true;
        self
    }

    fn with_moving_average(mut self, days: usize) -> Self {
        self.moving_average = Some(days);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TabLayout {
    pub id: &'static str,
    pub title: &'static str,
    pub intro: &'static str,
    pub note: Option<&'static str>,
    pub panels: Vec<Panel>,
}

const ORANGE: RGBColor = RGBColor(247, 147, 26);
const TEAL: RGBColor = RGBColor(23, 162, 184);
const PURPLE: RGBColor = RGBColor(111, 66, 193);
const CRIMSON: RGBColor = RGBColor(200, 35, 51);
const FOREST: RGBColor = RGBColor(40, 167, 69);
const SLATE: RGBColor = RGBColor(73, 80, 87);

pub fn default_tabs() -> Vec<TabLayout> {
    vec![
        TabLayout {
            id: "project",
            title: "Project",
            intro: "Daily view of what it costs, in electricity alone, to run the whole Bitcoin \
                    network's hashpower for one hour. Network data comes from the public \
                    blockchain.info charts; ASIC efficiency is a manual series and the electricity \
                    price is the U.S. average retail price published by the EIA.",
            note: Some(
                "attack_hourly_cost_usd = hashrate_th_s × efficiency_j_th / 1000 × elec_cost_usd_per_kwh",
            ),
            panels: vec![],
        },
        TabLayout {
            id: "market",
            title: "Market & Usage",
            intro: "Price, capitalisation and on-chain activity.",
            note: None,
            panels: vec![
                Panel::line(columns::PRICE_USD, "Market price", "USD", ORANGE),
                Panel::line(columns::MARKET_CAP_USD, "Market capitalisation", "USD", TEAL),
                Panel::line(columns::TRADE_VOLUME_USD, "Exchange trade volume", "USD", PURPLE),
                Panel::line(columns::N_TRANSACTIONS, "Confirmed transactions", "tx / day", SLATE),
            ],
        },
        TabLayout {
            id: "infrastructure",
            title: "Infrastructure",
            intro: "Hashpower and the state of the chain.",
            note: None,
            panels: vec![
                Panel::line(columns::HASHRATE_TH_S, "Hashrate", "TH/s (log)", ORANGE).log(),
                Panel::line(columns::DIFFICULTY, "Mining difficulty", "difficulty", PURPLE),
                Panel::line(columns::AVG_BLOCK_SIZE_MB, "Average block size", "MB", TEAL),
                Panel::line(columns::MEMPOOL_SIZE_BYTES, "Mempool size", "bytes", SLATE),
            ],
        },
        TabLayout {
            id: "energy",
            title: "Energy & Efficiency",
            intro: "Inputs of the cost model and the network's power draw.",
            note: None,
            panels: vec![
                Panel::line(columns::EFFICIENCY_J_TH, "ASIC efficiency", "J/TH", FOREST),
                Panel::line(columns::ELEC_COST_USD_PER_KWH, "Electricity price", "USD / kWh", TEAL),
                Panel::line(columns::NETWORK_POWER_GW, "Network power", "GW", CRIMSON),
                Panel::line(columns::MINERS_REVENUE_BTC, "Miners revenue", "BTC / day", ORANGE),
            ],
        },
        TabLayout {
            id: "security",
            title: "Security",
            intro: "Hourly electricity cost of matching the network's hashpower, and what miners earn.",
            note: Some(
                "Operating cost only: hardware acquisition (CAPEX), cooling and hosting are not \
                 modelled, so the figure is a lower bound of a real attack's cost.",
            ),
            panels: vec![
                Panel::line(columns::ATTACK_HOURLY_COST_USD, "51% attack cost", "USD / hour (log)", CRIMSON)
                    .log()
                    .with_moving_average(ATTACK_COST_SMA_DAYS),
                Panel::line(columns::MINERS_REVENUE_USD, "Miners revenue", "USD / day", FOREST),
                Panel::line(columns::FEES_TOTAL_BTC, "Transaction fees", "BTC / day", PURPLE),
                Panel::line(columns::COST_PER_TX_USD, "Cost per transaction", "USD", SLATE),
            ],
        },
    ]
}

/// The dataset as plain columns keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    dates: Vec<NaiveDate>,
    columns: HashMap<String, Vec<Option<f64>>>,
}

impl DashboardData {
    pub fn from_csv(path: &Path) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("cannot open dataset {}", path.display()))?
            .finish()
            .with_context(|| format!("cannot parse dataset {}", path.display()))?;
        Self::from_dataframe(&df)
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let dates = df
            .column(columns::DATE)?
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, raw)| {
                raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                    .with_context(|| format!("row {}: invalid date {:?}", row + 1, raw))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = HashMap::new();
        for series in df.get_columns() {
            let name = series.name().to_string();
            if name == columns::DATE || !series.dtype().is_numeric() {
                continue;
            }
            let values = series.cast(&DataType::Float64)?.f64()?.into_iter().collect();
            data.insert(name, values);
        }

        Ok(Self { dates, columns: data })
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn values(&self, column: &str) -> Option<&[Option<f64>]> {
        self.columns.get(column).map(|v| v.as_slice())
    }

    /// Value of the last row.
    pub fn latest(&self, column: &str) -> Option<f64> {
        self.values(column).and_then(|v| v.last().copied().flatten())
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn points(&self, column: &str) -> Vec<(NaiveDate, f64)> {
        match self.values(column) {
            Some(values) => self
                .dates
                .iter()
                .zip(values)
                .filter_map(|(d, v)| v.filter(|x| x.is_finite()).map(|x| (*d, x)))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Headline {
    pub label: &'static str,
    pub value: String,
}

/// KPI boxes from the latest row; absent figures read "n/a".
pub fn headlines(data: &DashboardData) -> Vec<Headline> {
    vec![
        Headline {
            label: "Bitcoin price",
            value: or_na(data.latest(columns::PRICE_USD), |v| format!("${}", group_thousands(v))),
        },
        Headline {
            label: "Hashrate",
            value: or_na(data.latest(columns::HASHRATE_TH_S), |v| format!("{:.1} EH/s", v / 1e6)),
        },
        Headline {
            label: "Network power",
            value: or_na(data.latest(columns::NETWORK_POWER_GW), |v| format!("{:.2} GW", v)),
        },
        Headline {
            label: "51% attack cost",
            value: or_na(data.latest(columns::ATTACK_HOURLY_COST_USD), |v| {
                format!("${}/h", group_thousands(v))
            }),
        },
    ]
}

fn or_na(value: Option<f64>, fmt: impl Fn(f64) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| "n/a".to_string())
}

/// Rounds to a whole number and separates thousands with commas.
pub fn group_thousands(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if rounded < 0.0 {
        out.insert(0, '-');
    }
    out
}

/// Trailing mean over `window` points; the first full window yields the first value.
pub fn rolling_mean(points: &[(NaiveDate, f64)], window: usize) -> PolarsResult<Vec<(NaiveDate, f64)>> {
    if window == 0 || points.len() < window {
        return Ok(Vec::new());
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let out = df!("value" => values)?
        .lazy()
        .select([col("value").rolling_mean(RollingOptionsFixedWindow {
            window_size: window,
            min_periods: window,
            ..Default::default()
        })])
        .collect()?;

    let means = out.column("value")?.f64()?;
    Ok(points
        .iter()
        .zip(means.into_iter())
        .filter_map(|((date, _), mean)| mean.map(|m| (*date, m)))
        .collect())
}

fn compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e12 {
        format!("{:.1}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.1}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}k", value / 1e3)
    } else if abs >= 1.0 || abs == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.3}", value)
    }
}

/// Draws one panel on `root` with the given y coordinate spec. Expanded once
/// for a linear and once for a logarithmic axis.
macro_rules! draw_panel {
    ($root:expr, $panel:expr, $x_range:expr, $y_range:expr, $points:expr, $average:expr) => {{
        let panel: &Panel = $panel;
        let mut chart = ChartBuilder::on($root)
            .caption(panel.title, ("sans-serif", 20).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(60)
            .build_cartesian_2d($x_range, $y_range)?;

        chart
            .configure_mesh()
            .x_labels(8)
            .y_labels(6)
            .x_label_formatter(&|d: &NaiveDate| d.format("%Y").to_string())
            .y_label_formatter(&|v: &f64| compact(*v))
            .y_desc(panel.y_desc)
            .draw()?;

        let color = panel.color;
        chart
            .draw_series(LineSeries::new($points.iter().copied(), color.stroke_width(2)))?
            .label(panel.title)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], color.stroke_width(2)));

        if let Some(days) = panel.moving_average {
            if !$average.is_empty() {
                chart
                    .draw_series(LineSeries::new($average.iter().copied(), &BLACK))?
                    .label(format!("{}-day average", days))
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], &BLACK));
            }
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }};
}

pub fn render_panel_svg(data: &DashboardData, panel: &Panel) -> Result<String> {
    let mut points = data.points(panel.column);
    if points.is_empty() {
        anyhow::bail!("column {} missing or empty", panel.column);
    }
    let mut average = match panel.moving_average {
        Some(days) => rolling_mean(&points, days)?,
        None => Vec::new(),
    };
    if panel.log_scale {
        points.retain(|(_, v)| *v > 0.0);
        average.retain(|(_, v)| *v > 0.0);
        if points.is_empty() {
            anyhow::bail!("column {} has no positive values for a log axis", panel.column);
        }
    }

    let first = points[0].0;
    let mut last = points[points.len() - 1].0;
    if last == first {
        last = first + chrono::Duration::days(1);
    }
    let y_min = points.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let y_max = points.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, PANEL_SIZE).into_drawing_area();
        root.fill(&WHITE)?;

        if panel.log_scale {
            let y_range = (y_min / 1.2)..(y_max * 1.2);
            draw_panel!(&root, panel, first..last, y_range.log_scale(), points, average);
        } else {
            let pad = if y_max > y_min { (y_max - y_min) * 0.05 } else { 1.0 };
            draw_panel!(&root, panel, first..last, (y_min - pad)..(y_max + pad), points, average);
        }

        root.present()?;
    }
    Ok(svg)
}

fn placeholder(panel: &Panel, reason: &str) -> String {
    format!(
        "<div class=\"placeholder border rounded text-muted d-flex align-items-center justify-content-center\" \
         style=\"height:{}px\"><span>{}: {}</span></div>",
        PANEL_SIZE.1,
        escape_html(panel.title),
        escape_html(reason)
    )
}

#[derive(Debug, Clone)]
pub struct RenderedTab {
    pub id: String,
    pub title: String,
    pub intro: String,
    pub note: Option<String>,
    pub panels: Vec<String>,
}

/// Renders every panel of the tab; a panel that cannot be drawn becomes a
/// placeholder. Returns the tab and its placeholder count.
pub fn render_tab(data: &DashboardData, layout: &TabLayout) -> (RenderedTab, usize) {
    let mut placeholders = 0;
    let panels = layout
        .panels
        .iter()
        .map(|panel| match render_panel_svg(data, panel) {
            Ok(svg) => svg,
            Err(e) => {
                warn!("Panel '{}' not rendered: {:#}", panel.title, e);
                placeholders += 1;
                placeholder(panel, "no data")
            }
        })
        .collect();

    let tab = RenderedTab {
        id: layout.id.to_string(),
        title: layout.title.to_string(),
        intro: layout.intro.to_string(),
        note: layout.note.map(|n| n.to_string()),
        panels,
    };
    (tab, placeholders)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Assembles the single-page document. The first tab is active.
pub fn render_html(as_of: Option<NaiveDate>, headlines: &[Headline], tabs: &[RenderedTab]) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str("<title>Bitcoin Security Cost Dashboard</title>\n");
    html.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", BOOTSTRAP_CSS));
    html.push_str("<style>.kpi{font-size:1.6rem;font-weight:600}svg{max-width:100%;height:auto}</style>\n");
    html.push_str("</head>\n<body>\n<div class=\"container-fluid py-3\">\n");
    html.push_str("<h1 class=\"h3\">Bitcoin Security Cost Dashboard</h1>\n");
    if let Some(date) = as_of {
        html.push_str(&format!("<p class=\"text-muted\">Data as of {}</p>\n", date.format("%Y-%m-%d")));
    }

    html.push_str("<div class=\"row g-3 mb-3\">\n");
    for headline in headlines {
        html.push_str(&format!(
            "<div class=\"col-6 col-lg-3\"><div class=\"card\"><div class=\"card-body\">\
             <div class=\"text-muted small\">{}</div><div class=\"kpi\">{}</div></div></div></div>\n",
            escape_html(headline.label),
            escape_html(&headline.value)
        ));
    }
    html.push_str("</div>\n");

    html.push_str("<ul class=\"nav nav-tabs\" role=\"tablist\">\n");
    for (i, tab) in tabs.iter().enumerate() {
        let active = if i == 0 { " active" } else { "" };
        html.push_str(&format!(
            "<li class=\"nav-item\" role=\"presentation\"><button class=\"nav-link{}\" id=\"{id}-tab\" \
             data-bs-toggle=\"tab\" data-bs-target=\"#{id}\" type=\"button\" role=\"tab\">{}</button></li>\n",
            active,
            escape_html(&tab.title),
            id = tab.id
        ));
    }
    html.push_str("</ul>\n<div class=\"tab-content pt-3\">\n");

    for (i, tab) in tabs.iter().enumerate() {
        let active = if i == 0 { " show active" } else { "" };
        html.push_str(&format!(
            "<div class=\"tab-pane fade{}\" id=\"{}\" role=\"tabpanel\">\n<p>{}</p>\n",
            active,
            tab.id,
            escape_html(&tab.intro)
        ));
        if let Some(note) = &tab.note {
            html.push_str(&format!(
                "<div class=\"alert alert-secondary\">{}</div>\n",
                escape_html(note)
            ));
        }
        if !tab.panels.is_empty() {
            html.push_str("<div class=\"row g-3\">\n");
            for panel in &tab.panels {
                // panels are trusted SVG/HTML produced above
                html.push_str(&format!("<div class=\"col-md-6\">{}</div>\n", panel));
            }
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n");
    }

    html.push_str("</div>\n</div>\n");
    html.push_str(&format!("<script src=\"{}\"></script>\n", BOOTSTRAP_JS));
    html.push_str("</body>\n</html>\n");
    html
}

#[derive(Debug, Clone, Default)]
pub struct DashboardSummary {
    pub path: PathBuf,
    pub panels: usize,
    pub placeholders: usize,
}

pub struct DashboardGenerator {
    dataset: PathBuf,
    output: PathBuf,
    tabs: Vec<TabLayout>,
}

impl DashboardGenerator {
    pub fn new(dataset: PathBuf, output: PathBuf) -> Self {
        Self {
            dataset,
            output,
            tabs: default_tabs(),
        }
    }

    pub fn generate(&self) -> Result<DashboardSummary> {
        println!("📊 Rendering dashboard from {}", self.dataset.display());

        let data = DashboardData::from_csv(&self.dataset)?;
        if data.height() == 0 {
            anyhow::bail!("dataset {} has no rows", self.dataset.display());
        }

        let mut summary = DashboardSummary {
            path: self.output.clone(),
            ..Default::default()
        };
        let mut rendered = Vec::with_capacity(self.tabs.len());
        for layout in &self.tabs {
            let (tab, placeholders) = render_tab(&data, layout);
            summary.panels += tab.panels.len();
            summary.placeholders += placeholders;
            rendered.push(tab);
        }

        let html = render_html(data.latest_date(), &headlines(&data), &rendered);
        write_atomically(&self.output, |file| Ok(file.write_all(html.as_bytes())?))
            .with_context(|| format!("cannot write {}", self.output.display()))?;

        info!(
            "Dashboard: {} panels, {} placeholders",
            summary.panels, summary.placeholders
        );
        println!("  ✅ Dashboard written to {}", self.output.display());
        Ok(summary)
    }
}

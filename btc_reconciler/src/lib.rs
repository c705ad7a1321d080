pub mod data_loader;
pub mod electricity;
pub mod metrics;
pub mod models;
pub mod reconciler;

pub use data_loader::{LoadReport, LoadedSeries, SeriesLoader};
pub use electricity::{ElectricityNormalizer, MonthlyPrice, NormalizeReport};
pub use metrics::{add_derived_metrics, DerivedMetric};
pub use models::{
    columns, FillStrategy, Frequency, HeaderMode, PriceUnit, SourceRole, SourceSchema, SourceSpec,
    TimeSeries, ValueRange, DEFAULT_EFFICIENCY_J_TH, DEFAULT_ELEC_COST_USD_PER_KWH,
};
pub use reconciler::{AuxiliaryColumn, ReconcileConfig, ReconciledFrame, Reconciler};

use crate::models::columns;
use log::{info, warn};
use polars::prelude::*;

/// Columns computed from the reconciled frame on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedMetric {
    /// Electricity bill (USD) for one hour of the whole network's hashpower.
    AttackHourlyCost,
    NetworkPowerGw,
    MinersRevenueBtc,
}

impl DerivedMetric {
    pub const ALL: [DerivedMetric; 3] = [
        DerivedMetric::AttackHourlyCost,
        DerivedMetric::NetworkPowerGw,
        DerivedMetric::MinersRevenueBtc,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            DerivedMetric::AttackHourlyCost => columns::ATTACK_HOURLY_COST_USD,
            DerivedMetric::NetworkPowerGw => columns::NETWORK_POWER_GW,
            DerivedMetric::MinersRevenueBtc => columns::MINERS_REVENUE_BTC,
        }
    }

    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            DerivedMetric::AttackHourlyCost => &[
                columns::HASHRATE_TH_S,
                columns::EFFICIENCY_J_TH,
                columns::ELEC_COST_USD_PER_KWH,
            ],
            DerivedMetric::NetworkPowerGw => &[columns::HASHRATE_TH_S, columns::EFFICIENCY_J_TH],
            DerivedMetric::MinersRevenueBtc => &[columns::MINERS_REVENUE_USD, columns::PRICE_USD],
        }
    }

    pub fn expr(&self) -> Expr {
        let expr = match self {
            // TH/s * J/TH = W; / 1000 = kW; * $/kWh = $ per hour
            DerivedMetric::AttackHourlyCost => {
                (col(columns::HASHRATE_TH_S) * col(columns::EFFICIENCY_J_TH) / lit(1000.0))
                    * col(columns::ELEC_COST_USD_PER_KWH)
            }
            DerivedMetric::NetworkPowerGw => {
                col(columns::HASHRATE_TH_S) * col(columns::EFFICIENCY_J_TH) / lit(1e9)
            }
            DerivedMetric::MinersRevenueBtc => when(col(columns::PRICE_USD).gt(lit(0.0)))
                .then(col(columns::MINERS_REVENUE_USD) / col(columns::PRICE_USD))
                .otherwise(lit(0.0)),
        };
        expr.alias(self.column_name())
    }
}

/// Adds every derived column whose inputs are present; the others are skipped.
pub fn add_derived_metrics(df: DataFrame) -> PolarsResult<(DataFrame, Vec<DerivedMetric>)> {
    let mut computed = Vec::new();
    let mut exprs = Vec::new();

    for metric in DerivedMetric::ALL {
        let missing: Vec<&str> = metric
            .required_columns()
            .iter()
            .copied()
            .filter(|name| df.column(name).is_err())
            .collect();

        if missing.is_empty() {
            exprs.push(metric.expr());
            computed.push(metric);
        } else {
            warn!(
                "Skipping {}: missing input columns {:?}",
                metric.column_name(),
                missing
            );
        }
    }

    if exprs.is_empty() {
        return Ok((df, computed));
    }

    let df = df.lazy().with_columns(exprs).collect()?;
    info!("Derived columns: {:?}", computed.iter().map(|m| m.column_name()).collect::<Vec<_>>());
    Ok((df, computed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_attack_cost_and_network_power() {
        let df = df!(
            columns::HASHRATE_TH_S => &[500_000_000.0, 0.0],
            columns::EFFICIENCY_J_TH => &[20.0, 30.0],
            columns::ELEC_COST_USD_PER_KWH => &[0.05, 0.07]
        )
        .unwrap();

        let (out, computed) = add_derived_metrics(df).unwrap();

        assert_eq!(
            computed,
            vec![DerivedMetric::AttackHourlyCost, DerivedMetric::NetworkPowerGw]
        );
        // 5e8 TH/s * 20 J/TH = 1e10 W = 1e7 kW -> $500k per hour, 10 GW
        let cost = values(&out, columns::ATTACK_HOURLY_COST_USD);
        assert!((cost[0].unwrap() - 500_000.0).abs() < 1e-6);
        assert_eq!(cost[1], Some(0.0));
        let power = values(&out, columns::NETWORK_POWER_GW);
        assert!((power[0].unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_attack_cost_non_negative() {
        let df = df!(
            columns::HASHRATE_TH_S => &[0.0, 1.0, 1e9, 3.5e8],
            columns::EFFICIENCY_J_TH => &[15.0, 0.0, 100.0, 21.5],
            columns::ELEC_COST_USD_PER_KWH => &[0.05, 0.1, 0.0, 0.0821]
        )
        .unwrap();

        let (out, _) = add_derived_metrics(df).unwrap();
        assert!(values(&out, columns::ATTACK_HOURLY_COST_USD)
            .iter()
            .all(|v| v.unwrap() >= 0.0));
    }

    #[test]
    fn test_revenue_btc_zero_for_non_positive_price() {
        let df = df!(
            columns::PRICE_USD => &[Some(50_000.0), Some(0.0), Some(-3.0), None],
            columns::MINERS_REVENUE_USD => &[Some(25_000_000.0), Some(1.0), Some(1.0), Some(1.0)]
        )
        .unwrap();

        let (out, computed) = add_derived_metrics(df).unwrap();

        assert_eq!(computed, vec![DerivedMetric::MinersRevenueBtc]);
        let btc = values(&out, columns::MINERS_REVENUE_BTC);
        assert_eq!(btc, vec![Some(500.0), Some(0.0), Some(0.0), Some(0.0)]);
        assert!(btc.iter().all(|v| v.unwrap().is_finite()));
    }

    #[test]
    fn test_missing_inputs_skip_only_that_metric() {
        let df = df!(
            columns::HASHRATE_TH_S => &[1.0],
            columns::EFFICIENCY_J_TH => &[20.0]
        )
        .unwrap();

        let (out, computed) = add_derived_metrics(df).unwrap();

        assert_eq!(computed, vec![DerivedMetric::NetworkPowerGw]);
        assert!(out.column(columns::ATTACK_HOURLY_COST_USD).is_err());
        assert!(out.column(columns::MINERS_REVENUE_BTC).is_err());
    }
}

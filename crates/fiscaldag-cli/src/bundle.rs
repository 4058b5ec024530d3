//! The JSON scenario bundle this binary consumes (spec §6: template +
//! driver input + opening state + period list, as a structured object;
//! the wire format itself is this collaborator's concern, not the
//! engine's). A single `serde`-deserialized struct, adapted at
//! startup into the engine's trait objects.

use rustc_hash::FxHashMap;
use serde::Deserialize;

use fiscaldag_engine::{DriverSource, FxSource, StatementKind, TemplateSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioBundle {
    pub entity: String,
    pub scenarios: Vec<String>,
    pub periods: Vec<String>,
    pub statements: Vec<TemplateSource>,
    /// `scenario -> period -> code -> value`.
    #[serde(default)]
    pub drivers: FxHashMap<String, FxHashMap<String, FxHashMap<String, f64>>>,
    /// `"<from>_<to>" -> rate_type -> rate`.
    #[serde(default)]
    pub fx_rates: FxHashMap<String, FxHashMap<String, f64>>,
    #[serde(default)]
    pub opening_balance_sheet: FxHashMap<String, f64>,
}

/// Adapts the bundle's nested driver map to [`DriverSource`]. Scenario
/// is looked up first since every period/code pair is scoped to one.
pub struct BundleDrivers<'a> {
    pub scenario_periods: &'a FxHashMap<String, FxHashMap<String, FxHashMap<String, f64>>>,
}

impl DriverSource for BundleDrivers<'_> {
    fn driver_value(&self, _entity: &str, scenario: &str, period: &str, code: &str) -> Option<f64> {
        self.scenario_periods.get(scenario)?.get(period)?.get(code).copied()
    }
}

pub struct BundleFx<'a> {
    pub rates: &'a FxHashMap<String, FxHashMap<String, f64>>,
}

impl FxSource for BundleFx<'_> {
    fn fx_rate(&self, from: &str, to: &str, rate_type: &str) -> Option<f64> {
        self.rates.get(&format!("{from}_{to}"))?.get(rate_type).copied()
    }
}

pub fn statement_kind_of(source: &TemplateSource) -> StatementKind {
    source.statement_type
}

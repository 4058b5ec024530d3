//! Multi-period orchestration (spec §4.H): iterates periods in caller
//! order, rolls each period's closing state into the next period's
//! prior-period provider, and supports independent scenario batching
//! (spec §5 "one scenario per worker").

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fiscaldag_common::{EngineError, Severity};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calculator::calculate;
use crate::config::EngineConfig;
use crate::context::{RunContext, StatementKind};
use crate::provider::{
    CrossStatementProvider, DriverProvider, DriverSource, FxProvider, FxSource,
    OpeningBalanceSheetProvider, PriorPeriodProvider, ValueProvider,
};
use crate::template::Template;
use crate::validator::{ValidationFinding, ValidationReport};

/// Checked at period boundaries only (spec §5 "the granularity is one
/// period"); cloneable so the caller can hold a handle while the
/// orchestrator runs on another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One period's output: the combined closing state and validation
/// report across every statement computed that period.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct PeriodResult {
    pub period: String,
    pub period_index: usize,
    pub closing_state: FxHashMap<String, f64>,
    pub validation_report: ValidationReport,
    pub failed: bool,
}

/// The full output of one `run` call: every period produced before
/// either completion, cancellation, or a failure, plus the failure
/// itself when one occurred (spec §7: results up to the failure point
/// are always returned).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<PeriodResult>,
    pub failure: Option<EngineError>,
    pub cancelled: bool,
}

/// Drives one or more statement templates (one per [`StatementKind`])
/// across a period sequence for a single entity. The template set and
/// driver/FX sources are treated as immutable for the run (spec §3).
pub struct Orchestrator<'a> {
    pub entity: String,
    pub config: EngineConfig,
    templates: Vec<(StatementKind, &'a Template)>,
    drivers: &'a dyn DriverSource,
    fx: &'a dyn FxSource,
    opening_balance_sheet: FxHashMap<String, f64>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        entity: impl Into<String>,
        config: EngineConfig,
        templates: Vec<(StatementKind, &'a Template)>,
        drivers: &'a dyn DriverSource,
        fx: &'a dyn FxSource,
        opening_balance_sheet: FxHashMap<String, f64>,
    ) -> Self {
        Self { entity: entity.into(), config, templates, drivers, fx, opening_balance_sheet }
    }

    /// Runs one scenario over `periods`, in the supplied (assumed
    /// chronological) order (spec §4.H contract).
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, periods, cancellation), fields(entity = %self.entity, scenario))
    )]
    pub fn run(&self, scenario: &str, periods: &[String], cancellation: &CancellationToken) -> RunOutcome {
        let mut prior = PriorPeriodProvider::new(self.opening_balance_sheet.clone());
        let driver_provider = DriverProvider::new(self.drivers);
        let opening_provider = OpeningBalanceSheetProvider::new(self.opening_balance_sheet.clone());
        let fx_provider = FxProvider::new(self.fx);

        let mut results = Vec::with_capacity(periods.len());
        for (index, period) in periods.iter().enumerate() {
            if cancellation.is_cancelled() {
                return RunOutcome { results, failure: None, cancelled: true };
            }
            #[cfg(feature = "tracing")]
            let _period_span = tracing::info_span!("period", period = %period, index).entered();

            let mut cross_statement = CrossStatementProvider::new(self.config.statement_order.clone());
            let mut period_closing: FxHashMap<String, f64> = FxHashMap::default();
            let mut combined_report = ValidationReport::new();
            let mut failure = None;

            for statement in &self.config.statement_order {
                let Some((_, template)) = self.templates.iter().find(|(s, _)| s == statement) else {
                    continue;
                };
                let context = RunContext::new(self.entity.clone(), scenario, period.clone(), index, *statement);
                let providers: Vec<&dyn ValueProvider> =
                    vec![&prior, &driver_provider, &opening_provider, &fx_provider, &cross_statement];
                let outcome = calculate(&context, template, &providers);

                cross_statement.record(*statement, outcome.closing_state.clone());
                period_closing.extend(outcome.closing_state);
                combined_report.findings.extend(outcome.validation_report.findings);

                if let Some(err) = outcome.failure {
                    failure = Some(err);
                    break;
                }
            }

            for warning in fx_provider.take_warnings() {
                combined_report.push(ValidationFinding {
                    rule_id: "fx-rate".to_string(),
                    severity: Severity::Warning,
                    message: warning,
                    numeric_residual: 0.0,
                    passed: false,
                });
            }

            let failed = failure.is_some();
            results.push(PeriodResult {
                period: period.clone(),
                period_index: index,
                closing_state: period_closing.clone(),
                validation_report: combined_report,
                failed,
            });

            if failed {
                return RunOutcome { results, failure, cancelled: false };
            }
            prior.push_closing_state(period_closing);
        }
        RunOutcome { results, failure: None, cancelled: false }
    }

    /// Runs every scenario in `scenarios` independently (spec §4.H
    /// "scenarios are independent"). Sequential unless built with the
    /// `parallel` feature and `config.parallel` is set, in which case
    /// each scenario runs on its own worker (spec §5) — the parallel
    /// path always completes every scenario, since a fleet of workers
    /// already in flight cannot be cheaply cancelled mid-batch; the
    /// sequential path honours `continue_on_period_failure` by stopping
    /// the whole batch at the first scenario failure when it's `false`
    /// (spec §7's default "abort... the whole run").
    pub fn run_many(
        &self,
        scenarios: &[String],
        periods: &[String],
        cancellation: &CancellationToken,
    ) -> FxHashMap<String, RunOutcome> {
        #[cfg(feature = "parallel")]
        if self.config.parallel {
            use rayon::prelude::*;
            return scenarios
                .par_iter()
                .map(|s| (s.clone(), self.run(s, periods, cancellation)))
                .collect::<Vec<_>>()
                .into_iter()
                .collect();
        }

        let mut out = FxHashMap::default();
        for scenario in scenarios {
            let outcome = self.run(scenario, periods, cancellation);
            let failed = outcome.failure.is_some();
            out.insert(scenario.clone(), outcome);
            if failed && !self.config.continue_on_period_failure {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{LineItemSource, TemplateSource};

    struct PeriodDrivers(FxHashMap<(String, String), f64>);
    impl DriverSource for PeriodDrivers {
        fn driver_value(&self, _entity: &str, _scenario: &str, period: &str, code: &str) -> Option<f64> {
            self.0.get(&(period.to_string(), code.to_string())).copied()
        }
    }

    struct NoFx;
    impl FxSource for NoFx {
        fn fx_rate(&self, _f: &str, _t: &str, _r: &str) -> Option<f64> {
            None
        }
    }

    fn item(code: &str, formula: Option<&str>, source: Option<&str>, order: i64) -> LineItemSource {
        LineItemSource {
            code: code.to_string(),
            formula: formula.map(str::to_string),
            base_value_source: source.map(str::to_string),
            display_order: order,
            sign_convention: None,
            display_name: None,
            category: None,
            level: None,
            formatting: None,
        }
    }

    #[test]
    fn scenario_2_retained_earnings_rollforward() {
        let pl = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![
                item("REVENUE", None, Some("driver:REVENUE"), 1),
                item("EXPENSES", None, Some("driver:EXPENSES"), 2),
                item("NET_INCOME", Some("REVENUE + EXPENSES"), None, 3),
                item("RETAINED_EARNINGS", Some("RETAINED_EARNINGS[t-1] + NET_INCOME"), None, 4),
            ],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();

        let periods: Vec<String> = (1..=5).map(|i| format!("P{i}")).collect();
        let rev = [100000.0, 110000.0, 120000.0, 130000.0, 140000.0];
        let exp = [-60000.0, -65000.0, -70000.0, -75000.0, -80000.0];
        let mut drivers = FxHashMap::default();
        for (i, period) in periods.iter().enumerate() {
            drivers.insert((period.clone(), "REVENUE".to_string()), rev[i]);
            drivers.insert((period.clone(), "EXPENSES".to_string()), exp[i]);
        }
        let driver_source = PeriodDrivers(drivers);
        let fx = NoFx;

        let mut opening = FxHashMap::default();
        opening.insert("RETAINED_EARNINGS".to_string(), 1000000.0);

        let orchestrator = Orchestrator::new(
            "acme",
            EngineConfig::default(),
            vec![(StatementKind::ProfitAndLoss, &pl)],
            &driver_source,
            &fx,
            opening,
        );

        let outcome = orchestrator.run("base", &periods, &CancellationToken::new());
        assert!(outcome.failure.is_none());
        let closing: Vec<f64> =
            outcome.results.iter().map(|r| r.closing_state["RETAINED_EARNINGS"]).collect();
        assert_eq!(closing, vec![1040000.0, 1085000.0, 1135000.0, 1190000.0, 1250000.0]);
    }

    #[test]
    fn run_many_of_a_singleton_matches_a_single_run() {
        let pl = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("A", None, Some("constant:5"), 1)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();
        let driver_source = PeriodDrivers(FxHashMap::default());
        let fx = NoFx;
        let orchestrator = Orchestrator::new(
            "acme",
            EngineConfig::default(),
            vec![(StatementKind::ProfitAndLoss, &pl)],
            &driver_source,
            &fx,
            FxHashMap::default(),
        );
        let periods = vec!["P1".to_string()];
        let single = orchestrator.run("base", &periods, &CancellationToken::new());
        let batch = orchestrator.run_many(
            &["base".to_string()],
            &periods,
            &CancellationToken::new(),
        );
        assert_eq!(batch["base"].results[0].closing_state["A"], single.results[0].closing_state["A"]);
    }

    #[test]
    fn cancellation_stops_before_the_next_period() {
        let pl = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("A", None, Some("constant:1"), 1)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();
        let driver_source = PeriodDrivers(FxHashMap::default());
        let fx = NoFx;
        let orchestrator = Orchestrator::new(
            "acme",
            EngineConfig::default(),
            vec![(StatementKind::ProfitAndLoss, &pl)],
            &driver_source,
            &fx,
            FxHashMap::default(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let periods = vec!["P1".to_string(), "P2".to_string()];
        let outcome = orchestrator.run("base", &periods, &token);
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
    }
}

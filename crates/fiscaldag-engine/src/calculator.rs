//! Per-period calculation (spec §4.F): walks a template's cached
//! calculation order, resolving each line item's formula or
//! base-value source through the provider chain, then runs the
//! validator over the completed state.

use fiscaldag_common::{EngineError, EngineErrorKind, ErrorContext};
use rustc_hash::FxHashMap;

use crate::context::RunContext;
use crate::evaluator::{evaluate, Resolver};
use crate::provider::{CurrentPeriodProvider, ProviderChain, ValueProvider};
use crate::template::Template;
use crate::validator::{run_rules, ValidationReport};
use std::cell::RefCell;

/// The result of one period's calculation. `failure` is set when a
/// formula error, resolution error, or non-finite value aborted the
/// walk early (spec §4.F "Failure policy") — `closing_state` and
/// `validation_report` still hold whatever was produced up to that
/// point (spec §7: "validation reports are always returned").
pub struct PeriodOutcome {
    pub closing_state: FxHashMap<String, f64>,
    pub validation_report: ValidationReport,
    pub failure: Option<EngineError>,
}

impl PeriodOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Parses a `kind:rest` base-value source (spec §3) into the provider
/// identifier it addresses, or a literal constant.
fn resolve_base_value(
    source: &str,
    chain: &ProviderChain,
    context: &RunContext,
) -> Result<f64, EngineError> {
    let (kind, rest) = source.split_once(':').ok_or_else(|| {
        EngineError::new(EngineErrorKind::MalformedFormula(format!(
            "base_value_source `{source}` is not of the form kind:code"
        )))
    })?;
    match kind {
        "driver" => chain.resolve(&format!("driver:{rest}"), 0, context),
        "opening-balance-sheet" => chain.resolve(&format!("opening-bs:{rest}"), 0, context),
        "fx" => chain.resolve(&format!("fx:{rest}"), 0, context),
        "constant" => rest.parse::<f64>().map_err(|_| {
            EngineError::new(EngineErrorKind::MalformedFormula(format!(
                "constant base_value_source `{rest}` is not a number"
            )))
        }),
        // cross-statement: `rest` is itself a prefixed identifier, e.g. "pl:NET_INCOME".
        "cross-statement" => chain.resolve(rest, 0, context),
        other => Err(EngineError::new(EngineErrorKind::ProviderFailure(format!(
            "unrecognised base_value_source kind `{other}`"
        )))),
    }
}

/// Runs the calculator over `template` for the period described by
/// `context`. `external_providers` supplies everything except the
/// current-period working map, which this function owns for the
/// duration of the call (spec §4.F steps 1-3).
pub fn calculate(
    context: &RunContext,
    template: &Template,
    external_providers: &[&dyn ValueProvider],
) -> PeriodOutcome {
    let current = RefCell::new(CurrentPeriodProvider::new());
    let mut chain_members: Vec<&dyn ValueProvider> = Vec::with_capacity(external_providers.len() + 1);
    chain_members.push(&current);
    chain_members.extend_from_slice(external_providers);
    let chain = ProviderChain::new(chain_members);

    for code in template.calculation_order() {
        let item = template.line_item(code).expect("calculation order only names known codes");

        let result = if let Some(formula) = &item.formula {
            evaluate(formula, &chain, context)
        } else if let Some(source) = &item.base_value_source {
            resolve_base_value(source, &chain, context)
        } else {
            // I4 rejects this combination at template load; a line item
            // reaching here with neither would be a template-loading bug.
            unreachable!("Template::from_source enforces I4 before scheduling")
        };
        // Non-finite intermediates are allowed to propagate through a
        // formula (e.g. `MIN(2^2000, 5)` still resolves to `5.0`); only
        // the line item's own final value is checked (spec §4.A).
        let result = result.and_then(|value| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(EngineError::new(EngineErrorKind::NonFiniteResult))
            }
        });

        match result {
            Ok(value) => current.borrow_mut().set(code, value),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(line_item = %code, error = %err, "line item failed to resolve");
                return PeriodOutcome {
                    closing_state: current.into_inner().into_map(),
                    validation_report: ValidationReport::new(),
                    failure: Some(err.with_context(error_context(context, code))),
                }
            }
        }
    }

    let validation_report = run_rules(&template.validation_rules, &chain, context);
    PeriodOutcome { closing_state: current.into_inner().into_map(), validation_report, failure: None }
}

fn error_context(context: &RunContext, code: &str) -> ErrorContext {
    ErrorContext::new()
        .with_entity(context.entity.clone())
        .with_scenario(context.scenario.clone())
        .with_period(context.period.clone())
        .with_line_item(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StatementKind;
    use crate::provider::{DriverProvider, DriverSource};
    use crate::template::{LineItemSource, TemplateSource};

    struct FixedDrivers(FxHashMap<String, f64>);
    impl DriverSource for FixedDrivers {
        fn driver_value(&self, _e: &str, _s: &str, _p: &str, code: &str) -> Option<f64> {
            self.0.get(code).copied()
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
    fn scenario_1_trivial_pl() {
        let template = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![
                item("REVENUE", None, Some("driver:REVENUE"), 1),
                item("EXPENSES", None, Some("driver:EXPENSES"), 2),
                item("NET_INCOME", Some("REVENUE + EXPENSES"), None, 3),
            ],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();

        let mut drivers = FxHashMap::default();
        drivers.insert("REVENUE".to_string(), 100000.0);
        drivers.insert("EXPENSES".to_string(), -60000.0);
        let driver_source = FixedDrivers(drivers);
        let driver_provider = DriverProvider::new(&driver_source);

        let context = RunContext::new("acme", "base", "P1", 0, StatementKind::ProfitAndLoss);
        let outcome = calculate(&context, &template, &[&driver_provider]);
        assert!(outcome.is_success());
        assert_eq!(outcome.closing_state["NET_INCOME"], 40000.0);
    }

    #[test]
    fn a_non_finite_intermediate_does_not_abort_a_line_item() {
        let template = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("CAPPED", Some("MIN(2 ^ 2000, 5)"), None, 1)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();
        let context = RunContext::new("acme", "base", "P1", 0, StatementKind::ProfitAndLoss);
        let outcome = calculate(&context, &template, &[]);
        assert!(outcome.is_success());
        assert_eq!(outcome.closing_state["CAPPED"], 5.0);
    }

    #[test]
    fn a_non_finite_final_value_aborts_the_line_item() {
        let template = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("HUGE", Some("2 ^ 2000"), None, 1)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();
        let context = RunContext::new("acme", "base", "P1", 0, StatementKind::ProfitAndLoss);
        let outcome = calculate(&context, &template, &[]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure.unwrap().kind, EngineErrorKind::NonFiniteResult);
    }

    #[test]
    fn a_formula_error_aborts_with_a_contextual_diagnostic() {
        let template = Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("BAD", Some("1 / 0"), None, 1)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap();
        let context = RunContext::new("acme", "base", "P1", 0, StatementKind::ProfitAndLoss);
        let outcome = calculate(&context, &template, &[]);
        assert!(!outcome.is_success());
        let err = outcome.failure.unwrap();
        assert_eq!(err.kind, EngineErrorKind::DivisionByZero);
        assert_eq!(err.context.line_item.as_deref(), Some("BAD"));
    }
}

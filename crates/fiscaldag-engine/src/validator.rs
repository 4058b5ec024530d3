//! Declarative validation rules (spec §4.G): equation, boundary, and
//! reconciliation checks run against a period's fully-computed closing
//! state, using the same evaluator and provider chain as the
//! calculator.

use fiscaldag_common::{EngineError, EngineErrorKind, Severity};
use fiscaldag_parse::{parse, Expr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::evaluator::{evaluate, Resolver};

/// Which comparison a rule performs (spec §4.G).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Equation,
    Boundary,
    Reconciliation,
}

/// For a `boundary` rule, which side of zero is acceptable.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDirection {
    GreaterOrEqual,
    LessOrEqual,
}

/// The default tolerance (spec §4.G, §6): `0.01` in the unit of the
/// rule's formula result.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// The wire shape of a validation rule (spec §6).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone)]
pub struct ValidationRuleSource {
    pub rule_id: String,
    pub severity: Severity,
    pub kind: RuleKind,
    pub formula: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tolerance: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub message: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub direction: Option<BoundaryDirection>,
}

/// A parsed, invariant-checked validation rule, cached on the template
/// alongside its line items.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub rule_id: String,
    pub severity: Severity,
    pub kind: RuleKind,
    pub formula: Expr,
    pub raw_formula: String,
    pub tolerance: f64,
    pub message: Option<String>,
    pub direction: BoundaryDirection,
}

impl ValidationRule {
    /// `default_tolerance` is used only when `source.tolerance` is
    /// absent (spec §6: tolerance is overridable per run via
    /// `EngineConfig::default_tolerance`; a rule's own explicit
    /// tolerance, once set, always wins and is round-tripped as-is by
    /// [`ValidationRule::to_source`]).
    pub fn from_source(source: ValidationRuleSource, default_tolerance: f64) -> Result<Self, EngineError> {
        let formula = parse(&source.formula).map_err(|e| {
            EngineError::new(EngineErrorKind::MalformedFormula(e.to_string()))
                .with_context(fiscaldag_common::ErrorContext::new().with_rule(source.rule_id.clone()))
        })?;
        Ok(ValidationRule {
            rule_id: source.rule_id,
            severity: source.severity,
            kind: source.kind,
            raw_formula: source.formula,
            formula,
            tolerance: source.tolerance.unwrap_or(default_tolerance),
            message: source.message,
            direction: source.direction.unwrap_or(BoundaryDirection::GreaterOrEqual),
        })
    }

    pub fn to_source(&self) -> ValidationRuleSource {
        ValidationRuleSource {
            rule_id: self.rule_id.clone(),
            severity: self.severity,
            kind: self.kind,
            formula: self.raw_formula.clone(),
            tolerance: Some(self.tolerance),
            message: self.message.clone(),
            direction: Some(self.direction),
        }
    }
}

/// A single rule evaluated against a period, whether it passed or
/// failed (spec §3 "Validation report").
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    /// `evaluate(formula) - 0` for equation/reconciliation rules, or
    /// the signed excess past the bound for boundary rules. `None` when
    /// the rule passed cleanly and info-level bookkeeping isn't wanted.
    pub numeric_residual: f64,
    pub passed: bool,
}

/// The ordered, append-only sequence of findings for one period (spec
/// §3). Populated up to the point of failure even when the period
/// calculation itself aborts (spec §7).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: ValidationFinding) {
        self.findings.push(finding);
    }

    /// Whether any finding at or above `Severity::Error` is present —
    /// the threshold callers typically use to decide whether to treat a
    /// period as failed (spec §7: "callers decide").
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| !f.passed && f.severity == Severity::Error)
    }
}

/// Evaluates every rule in `rules` against the already-populated
/// closing-state resolver and returns the accumulated report. Never
/// returns `Err`: a rule whose formula itself fails to evaluate is
/// recorded as an `error`-severity finding rather than aborting the
/// whole report (spec §4.G: "A validator error does not prevent the
/// closing state from being returned").
pub fn run_rules(
    rules: &[ValidationRule],
    resolver: &dyn Resolver,
    context: &RunContext,
) -> ValidationReport {
    let mut report = ValidationReport::new();
    for rule in rules {
        report.push(evaluate_rule(rule, resolver, context));
    }
    report
}

fn evaluate_rule(rule: &ValidationRule, resolver: &dyn Resolver, context: &RunContext) -> ValidationFinding {
    let value = match evaluate(&rule.formula, resolver, context) {
        Ok(v) => v,
        Err(e) => {
            return ValidationFinding {
                rule_id: rule.rule_id.clone(),
                severity: Severity::Error,
                message: format!("rule formula failed to evaluate: {e}"),
                numeric_residual: 0.0,
                passed: false,
            }
        }
    };

    let (passed, residual) = match rule.kind {
        RuleKind::Equation | RuleKind::Reconciliation => (value.abs() <= rule.tolerance, value),
        RuleKind::Boundary => match rule.direction {
            BoundaryDirection::GreaterOrEqual => (value >= -rule.tolerance, value.min(0.0)),
            BoundaryDirection::LessOrEqual => (value <= rule.tolerance, value.max(0.0)),
        },
    };

    ValidationFinding {
        rule_id: rule.rule_id.clone(),
        severity: rule.severity,
        message: rule.message.clone().unwrap_or_else(|| rule.rule_id.clone()),
        numeric_residual: residual,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StatementKind;
    use std::collections::HashMap;

    struct MapResolver(HashMap<(String, i32), f64>);

    impl Resolver for MapResolver {
        fn resolve(&self, identifier: &str, offset: i32, _ctx: &RunContext) -> Result<f64, EngineError> {
            self.0
                .get(&(identifier.to_string(), offset))
                .copied()
                .ok_or_else(|| EngineError::new(EngineErrorKind::NotResolvable {
                    identifier: identifier.to_string(),
                    offset,
                }))
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("acme", "base", "2026-Q1", 0, StatementKind::BalanceSheet)
    }

    fn rule(formula: &str, kind: RuleKind) -> ValidationRule {
        ValidationRule::from_source(
            ValidationRuleSource {
                rule_id: "R1".to_string(),
                severity: Severity::Error,
                kind,
                formula: formula.to_string(),
                tolerance: None,
                message: None,
                direction: None,
            },
            DEFAULT_TOLERANCE,
        )
        .unwrap()
    }

    #[test]
    fn a_missing_tolerance_falls_back_to_the_supplied_default() {
        let rule = ValidationRule::from_source(
            ValidationRuleSource {
                rule_id: "R2".to_string(),
                severity: Severity::Error,
                kind: RuleKind::Equation,
                formula: "1".to_string(),
                tolerance: None,
                message: None,
                direction: None,
            },
            5.0,
        )
        .unwrap();
        assert_eq!(rule.tolerance, 5.0);
    }

    #[test]
    fn an_explicit_tolerance_overrides_the_supplied_default() {
        let rule = ValidationRule::from_source(
            ValidationRuleSource {
                rule_id: "R3".to_string(),
                severity: Severity::Error,
                kind: RuleKind::Equation,
                formula: "1".to_string(),
                tolerance: Some(0.5),
                message: None,
                direction: None,
            },
            5.0,
        )
        .unwrap();
        assert_eq!(rule.tolerance, 0.5);
    }

    #[test]
    fn reconciliation_rule_passes_within_tolerance() {
        let mut values = HashMap::new();
        values.insert(("TOTAL_ASSETS".to_string(), 0), 100.0);
        values.insert(("TOTAL_LIABILITIES".to_string(), 0), 60.0);
        values.insert(("TOTAL_EQUITY".to_string(), 0), 40.0);
        let resolver = MapResolver(values);
        let r = rule("TOTAL_ASSETS - TOTAL_LIABILITIES - TOTAL_EQUITY", RuleKind::Reconciliation);
        let finding = evaluate_rule(&r, &resolver, &ctx());
        assert!(finding.passed);
        assert_eq!(finding.numeric_residual, 0.0);
    }

    #[test]
    fn reconciliation_rule_reports_exact_residual_on_perturbation() {
        let mut values = HashMap::new();
        values.insert(("TOTAL_ASSETS".to_string(), 0), 100.0);
        values.insert(("TOTAL_LIABILITIES".to_string(), 0), 65.0);
        values.insert(("TOTAL_EQUITY".to_string(), 0), 40.0);
        let resolver = MapResolver(values);
        let r = rule("TOTAL_ASSETS - TOTAL_LIABILITIES - TOTAL_EQUITY", RuleKind::Reconciliation);
        let finding = evaluate_rule(&r, &resolver, &ctx());
        assert!(!finding.passed);
        assert_eq!(finding.numeric_residual, -5.0);
    }

    #[test]
    fn a_failing_rule_formula_becomes_an_error_finding_not_an_abort() {
        let resolver = MapResolver(HashMap::new());
        let r = rule("UNRESOLVABLE + 1", RuleKind::Equation);
        let finding = evaluate_rule(&r, &resolver, &ctx());
        assert!(!finding.passed);
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn boundary_rule_flags_a_negative_value() {
        let mut values = HashMap::new();
        values.insert(("CASH".to_string(), 0), -10.0);
        let resolver = MapResolver(values);
        let r = rule("CASH", RuleKind::Boundary);
        let finding = evaluate_rule(&r, &resolver, &ctx());
        assert!(!finding.passed);
    }
}

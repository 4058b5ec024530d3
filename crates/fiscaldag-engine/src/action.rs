//! Management actions (spec §4.I): declarative template transformations
//! applied before calculation to produce a scenario-specific variant
//! without mutating the base template.

use fiscaldag_common::EngineError;

use crate::template::{LineItemOverride, Template};

/// One declarative transformation. A bundle of these applied together
/// is a "management action" (spec §4.I).
#[derive(Debug, Clone)]
pub enum Action {
    FormulaOverride { line_item_code: String, new_formula: String },
    BaseValueSourceOverride { line_item_code: String, new_source: String },
    SignFlip { line_item_code: String },
}

/// Applies `actions` left-to-right against `base`, producing a derived
/// template through [`Template::with_overrides`]. Conflicting overrides
/// on the same line item take the last one — `with_overrides` already
/// gives this for free since it folds its input into a map keyed by
/// code. Re-scheduling happens inside `with_overrides`, so a cycle
/// introduced by an action surfaces as a template error here, not
/// later at calculation time.
pub fn apply(base: &Template, actions: &[Action]) -> Result<Template, EngineError> {
    let overrides = actions.iter().map(|action| match action {
        Action::FormulaOverride { line_item_code, new_formula } => {
            (line_item_code.clone(), LineItemOverride::Formula(new_formula.clone()))
        }
        Action::BaseValueSourceOverride { line_item_code, new_source } => {
            (line_item_code.clone(), LineItemOverride::BaseValueSource(new_source.clone()))
        }
        Action::SignFlip { line_item_code } => {
            (line_item_code.clone(), LineItemOverride::SignFlip)
        }
    });
    base.with_overrides(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StatementKind;
    use crate::template::{LineItemSource, TemplateSource};
    use fiscaldag_common::EngineErrorKind;

    fn item(code: &str, formula: &str, order: i64) -> LineItemSource {
        LineItemSource {
            code: code.to_string(),
            formula: Some(formula.to_string()),
            base_value_source: None,
            display_order: order,
            sign_convention: None,
            display_name: None,
            category: None,
            level: None,
            formatting: None,
        }
    }

    fn base() -> Template {
        Template::from_source(TemplateSource {
            code: "PL".to_string(),
            version: "1".to_string(),
            statement_type: StatementKind::ProfitAndLoss,
            line_items: vec![item("A", "1", 1), item("B", "A + 1", 2)],
            validation_rules: Vec::new(),
            calculation_order: None,
        })
        .unwrap()
    }

    #[test]
    fn zero_actions_leaves_the_template_equivalent() {
        let t = base();
        let variant = apply(&t, &[]).unwrap();
        assert_eq!(variant.calculation_order(), t.calculation_order());
        assert_eq!(
            variant.line_item("B").unwrap().formula.as_ref().unwrap().to_string(),
            t.line_item("B").unwrap().formula.as_ref().unwrap().to_string(),
        );
    }

    #[test]
    fn conflicting_overrides_on_the_same_code_take_the_last() {
        let t = base();
        let variant = apply(
            &t,
            &[
                Action::FormulaOverride { line_item_code: "A".to_string(), new_formula: "10".to_string() },
                Action::FormulaOverride { line_item_code: "A".to_string(), new_formula: "20".to_string() },
            ],
        )
        .unwrap();
        assert_eq!(variant.line_item("A").unwrap().formula.as_ref().unwrap().to_string(), "20");
    }

    #[test]
    fn an_action_introduced_cycle_is_a_template_error() {
        let t = base();
        let err = apply(
            &t,
            &[Action::FormulaOverride { line_item_code: "A".to_string(), new_formula: "B + 1".to_string() }],
        )
        .unwrap_err();
        assert!(matches!(err.kind, EngineErrorKind::CycleDetected(_)));
    }
}

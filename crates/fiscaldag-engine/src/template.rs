//! In-memory template model (spec §4.D): line items, validation rules,
//! and the cached calculation order, loaded from a structured source
//! object (spec §6) and checked against the four load-time invariants
//! from spec §3 (unique codes, resolvable identifiers, an acyclic
//! current-period graph, and exactly one value origin per line item).
//!
//! A `Template` is produced once from its source and shared read-only
//! by every calculation that consults it.

use std::fmt;

use fiscaldag_common::{EngineError, EngineErrorKind, SignConvention};
use fiscaldag_parse::{parse, Expr};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::context::StatementKind;
use crate::dependency::{extract, split_prefix};
use crate::graph::DependencyGraph;
use crate::validator::{ValidationRule, ValidationRuleSource};

/// One line item, parsed and invariant-checked (spec §3).
#[derive(Debug, Clone)]
pub struct LineItem {
    pub code: String,
    pub formula: Option<Expr>,
    /// Only consulted when `formula` is `None` (I4: formula wins when
    /// both are present).
    pub base_value_source: Option<String>,
    pub sign_convention: SignConvention,
    pub display_order: i64,
    pub display_name: Option<String>,
    pub category: Option<String>,
    pub level: Option<i32>,
    pub formatting: Option<String>,
}

/// The wire shape of a line item (spec §6). Field names are
/// contractual.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone)]
pub struct LineItemSource {
    pub code: String,
    pub formula: Option<String>,
    pub base_value_source: Option<String>,
    pub display_order: i64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sign_convention: Option<SignConvention>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub display_name: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub level: Option<i32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub formatting: Option<String>,
}

/// The wire shape of a whole template (spec §6).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub code: String,
    pub version: String,
    pub statement_type: StatementKind,
    pub line_items: Vec<LineItemSource>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub validation_rules: Vec<ValidationRuleSource>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub calculation_order: Option<Vec<String>>,
}

/// A single transformation applied by [`Template::with_overrides`]; the
/// mechanism §4.I's management actions and the orchestrator's scenario
/// variants both build on.
#[derive(Debug, Clone)]
pub enum LineItemOverride {
    Formula(String),
    BaseValueSource(String),
    SignFlip,
}

/// An immutable, invariant-checked template. Produced once from a
/// [`TemplateSource`] and shared by every calculation that consults it
/// (spec §3 "Ownership and lifecycle").
pub struct Template {
    pub code: String,
    pub version: String,
    pub statement_type: StatementKind,
    pub validation_rules: Vec<ValidationRule>,
    line_items: Vec<LineItem>,
    index: FxHashMap<String, usize>,
    explicit_order: Option<Vec<String>>,
    calculation_order: OnceCell<Vec<String>>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("code", &self.code)
            .field("version", &self.version)
            .field("line_items", &self.line_items.len())
            .finish()
    }
}

impl Template {
    /// Parses and invariant-checks `source` into an in-memory template
    /// (spec §4.D "Load from source"), falling back to the module
    /// default tolerance for any validation rule that doesn't specify
    /// its own. This is where parser errors and I1-I4 surface as
    /// template errors.
    pub fn from_source(source: TemplateSource) -> Result<Self, EngineError> {
        Self::from_source_with_tolerance(source, crate::validator::DEFAULT_TOLERANCE)
    }

    /// As [`Template::from_source`], but `default_tolerance` (typically
    /// `EngineConfig::default_tolerance`) is used as the fallback for
    /// any validation rule that doesn't specify its own (spec §6:
    /// tolerance is overridable per run).
    pub fn from_source_with_tolerance(
        source: TemplateSource,
        default_tolerance: f64,
    ) -> Result<Self, EngineError> {
        let mut line_items = Vec::with_capacity(source.line_items.len());
        let mut index = FxHashMap::default();

        for raw in source.line_items {
            if index.contains_key(&raw.code) {
                return Err(EngineError::new(EngineErrorKind::DuplicateLineItemCode(raw.code)));
            }

            let formula = match &raw.formula {
                Some(text) => Some(parse(text).map_err(|e| {
                    EngineError::new(EngineErrorKind::MalformedFormula(e.to_string()))
                        .with_context(
                            fiscaldag_common::ErrorContext::new().with_line_item(raw.code.clone()),
                        )
                })?),
                None => None,
            };

            if formula.is_none() && raw.base_value_source.is_none() {
                return Err(EngineError::new(EngineErrorKind::MissingValueSource(raw.code)));
            }

            index.insert(raw.code.clone(), line_items.len());
            line_items.push(LineItem {
                code: raw.code,
                formula,
                base_value_source: raw.base_value_source,
                sign_convention: raw.sign_convention.unwrap_or_default(),
                display_order: raw.display_order,
                display_name: raw.display_name,
                category: raw.category,
                level: raw.level,
                formatting: raw.formatting,
            });
        }

        let validation_rules = source
            .validation_rules
            .into_iter()
            .map(|rule| ValidationRule::from_source(rule, default_tolerance))
            .collect::<Result<Vec<_>, _>>()?;

        let mut template = Template {
            code: source.code,
            version: source.version,
            statement_type: source.statement_type,
            validation_rules,
            line_items,
            index,
            explicit_order: source.calculation_order,
            calculation_order: OnceCell::new(),
        };
        template.check_identifiers_and_build_order()?;
        Ok(template)
    }

    /// I2 (every referenced identifier resolves) and I3 (the induced
    /// graph is acyclic), then computes and caches the calculation
    /// order — either the validated explicit one or the scheduler's.
    fn check_identifiers_and_build_order(&mut self) -> Result<(), EngineError> {
        let mut graph = DependencyGraph::new();
        for item in &self.line_items {
            graph.add_node(&item.code);
            let Some(formula) = &item.formula else { continue };
            let deps = extract(formula);
            for name in deps.current {
                if let Some((_, suffix)) = split_prefix(&name) {
                    // A cross-statement reference only participates in
                    // this template's graph when its suffix names a
                    // line item of the same (unified) template (spec
                    // §4.B); otherwise it is externally supplied.
                    if self.index.contains_key(suffix) {
                        graph.add_edge(&item.code, suffix);
                    }
                    continue;
                }
                if self.index.contains_key(&name) {
                    graph.add_edge(&item.code, &name);
                } else {
                    return Err(EngineError::new(EngineErrorKind::UnresolvableIdentifier(name))
                        .with_context(
                            fiscaldag_common::ErrorContext::new()
                                .with_line_item(item.code.clone()),
                        ));
                }
            }
        }

        for rule in &self.validation_rules {
            for name in extract(&rule.formula).current {
                if split_prefix(&name).is_some() {
                    // Same treatment as a line item's formula: a prefixed
                    // reference is always externally resolvable, never a
                    // load-time error.
                    continue;
                }
                if !self.index.contains_key(&name) {
                    return Err(EngineError::new(EngineErrorKind::UnresolvableIdentifier(name))
                        .with_context(
                            fiscaldag_common::ErrorContext::new().with_rule(rule.rule_id.clone()),
                        ));
                }
            }
        }

        let display_order = |code: &str| -> i64 {
            self.index.get(code).map(|&i| self.line_items[i].display_order).unwrap_or(0)
        };
        let computed = graph.topological_order(display_order)?;

        if let Some(explicit) = &self.explicit_order {
            if explicit.len() != self.line_items.len()
                || !explicit.iter().all(|c| self.index.contains_key(c))
            {
                return Err(EngineError::new(EngineErrorKind::InvalidCalculationOrder(
                    "calculation_order must list every line item exactly once".to_string(),
                )));
            }
            let mut position = FxHashMap::default();
            for (i, code) in explicit.iter().enumerate() {
                position.insert(code.clone(), i);
            }
            for item in &self.line_items {
                let Some(formula) = &item.formula else { continue };
                for name in extract(formula).current {
                    let dep_code = split_prefix(&name).map(|(_, s)| s.to_string()).unwrap_or(name);
                    if let (Some(&dep_pos), Some(&item_pos)) =
                        (position.get(&dep_code), position.get(&item.code))
                    {
                        if dep_pos > item_pos {
                            return Err(EngineError::new(EngineErrorKind::InvalidCalculationOrder(
                                format!("`{}` appears before its dependency `{dep_code}`", item.code),
                            )));
                        }
                    }
                }
            }
            self.calculation_order.set(explicit.clone()).ok();
        } else {
            self.calculation_order.set(computed).ok();
        }
        Ok(())
    }

    pub fn line_item(&self, code: &str) -> Option<&LineItem> {
        self.index.get(code).map(|&i| &self.line_items[i])
    }

    /// All line items in display order (spec §4.D "iteration in display
    /// order"), for rendering.
    pub fn iter_display_order(&self) -> impl Iterator<Item = &LineItem> {
        let mut items: Vec<&LineItem> = self.line_items.iter().collect();
        items.sort_by(|a, b| a.display_order.cmp(&b.display_order).then_with(|| a.code.cmp(&b.code)));
        items.into_iter()
    }

    /// The cached calculation order (spec §4.D "Cached calculation
    /// order: computed once, reused").
    pub fn calculation_order(&self) -> &[String] {
        self.calculation_order.get().expect("computed during from_source")
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    /// Produces a derived template with a subset of line items
    /// overridden, without mutating `self` (spec §4.D "Variant with
    /// overrides"). Re-runs invariant checking and scheduling, so a
    /// cycle introduced by an override surfaces as a template error
    /// (spec §4.I).
    pub fn with_overrides(
        &self,
        overrides: impl IntoIterator<Item = (String, LineItemOverride)>,
    ) -> Result<Template, EngineError> {
        let mut by_code: FxHashMap<String, LineItemOverride> = FxHashMap::default();
        for (code, change) in overrides {
            // Conflicting overrides on the same line item: last one wins.
            by_code.insert(code, change);
        }

        let mut line_items = Vec::with_capacity(self.line_items.len());
        for item in &self.line_items {
            let raw = match by_code.remove(&item.code) {
                None => LineItemSource {
                    code: item.code.clone(),
                    formula: item.formula.as_ref().map(|f| f.to_string()),
                    base_value_source: item.base_value_source.clone(),
                    display_order: item.display_order,
                    sign_convention: Some(item.sign_convention),
                    display_name: item.display_name.clone(),
                    category: item.category.clone(),
                    level: item.level,
                    formatting: item.formatting.clone(),
                },
                Some(LineItemOverride::Formula(new_formula)) => LineItemSource {
                    code: item.code.clone(),
                    formula: Some(new_formula),
                    base_value_source: None,
                    display_order: item.display_order,
                    sign_convention: Some(item.sign_convention),
                    display_name: item.display_name.clone(),
                    category: item.category.clone(),
                    level: item.level,
                    formatting: item.formatting.clone(),
                },
                Some(LineItemOverride::BaseValueSource(new_source)) => LineItemSource {
                    code: item.code.clone(),
                    formula: None,
                    base_value_source: Some(new_source),
                    display_order: item.display_order,
                    sign_convention: Some(item.sign_convention),
                    display_name: item.display_name.clone(),
                    category: item.category.clone(),
                    level: item.level,
                    formatting: item.formatting.clone(),
                },
                Some(LineItemOverride::SignFlip) => LineItemSource {
                    code: item.code.clone(),
                    formula: item.formula.as_ref().map(|f| f.to_string()),
                    base_value_source: item.base_value_source.clone(),
                    display_order: item.display_order,
                    sign_convention: Some(match item.sign_convention {
                        SignConvention::Positive => SignConvention::Negative,
                        SignConvention::Negative => SignConvention::Positive,
                        SignConvention::Neutral => SignConvention::Neutral,
                    }),
                    display_name: item.display_name.clone(),
                    category: item.category.clone(),
                    level: item.level,
                    formatting: item.formatting.clone(),
                },
            };
            line_items.push(raw);
        }

        Template::from_source(TemplateSource {
            code: self.code.clone(),
            version: self.version.clone(),
            statement_type: self.statement_type,
            line_items,
            validation_rules: self.validation_rules.iter().map(|r| r.to_source()).collect(),
            calculation_order: None,
        })
    }
}

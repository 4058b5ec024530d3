//! A single rich error type shared by every stage of the engine: a
//! canonical `kind`, an optional human `message`, and a lightweight,
//! engine-agnostic `context` describing *where* the error happened.
//!
//! - **`EngineErrorKind`**: the canonical taxonomy from spec §7.
//! - **`ErrorContext`**: the `(entity, scenario, period, line item / rule)`
//!   triple every user-visible error must carry per spec §7.
//! - **`EngineError`**: glues the two together.
//!
//! Template errors halt a run before period 1; resolution and formula
//! errors abort the current period (and, by default, the whole run).
//! Validation findings are not `EngineError`s at all — see
//! `fiscaldag-engine::validator::ValidationFinding` — because they never
//! abort anything.

use std::{error::Error, fmt};

/// The three error families from spec §7. Template errors are raised at
/// load/action-application time; resolution and formula errors are
/// raised per period during calculation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    Template,
    Resolution,
    Formula,
}

/// All recognised error kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineErrorKind {
    // --- Template errors (spec §7, §3 I1-I4) ---
    DuplicateLineItemCode(String),
    UnresolvableIdentifier(String),
    MissingValueSource(String),
    InvalidCalculationOrder(String),
    CycleDetected(Vec<String>),
    MalformedFormula(String),

    // --- Resolution errors (spec §7) ---
    NotResolvable { identifier: String, offset: i32 },
    NoPriorPeriod { identifier: String },
    ForwardStatementReference { identifier: String },
    ProviderFailure(String),

    // --- Formula errors (spec §4.A, §7) ---
    DivisionByZero,
    NonFiniteResult,
    UnknownFunction(String),
    WrongArity { function: String, expected: String, got: usize },
}

impl EngineErrorKind {
    pub fn family(&self) -> ErrorFamily {
        use EngineErrorKind::*;
        match self {
            DuplicateLineItemCode(_)
            | UnresolvableIdentifier(_)
            | MissingValueSource(_)
            | InvalidCalculationOrder(_)
            | CycleDetected(_)
            | MalformedFormula(_) => ErrorFamily::Template,

            NotResolvable { .. }
            | NoPriorPeriod { .. }
            | ForwardStatementReference { .. }
            | ProviderFailure(_) => ErrorFamily::Resolution,

            DivisionByZero | NonFiniteResult | UnknownFunction(_) | WrongArity { .. } => {
                ErrorFamily::Formula
            }
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use EngineErrorKind::*;
        match self {
            DuplicateLineItemCode(c) => write!(f, "duplicate line item code `{c}`"),
            UnresolvableIdentifier(id) => write!(f, "unresolvable identifier `{id}`"),
            MissingValueSource(c) => {
                write!(f, "line item `{c}` has neither a formula nor a base value source")
            }
            InvalidCalculationOrder(msg) => write!(f, "invalid calculation_order: {msg}"),
            CycleDetected(path) => write!(f, "dependency cycle: {}", path.join(" -> ")),
            MalformedFormula(msg) => write!(f, "malformed formula: {msg}"),
            NotResolvable { identifier, offset } => {
                write!(f, "no provider resolved `{identifier}` at offset {offset}")
            }
            NoPriorPeriod { identifier } => {
                write!(f, "`{identifier}` referenced a prior period that does not exist")
            }
            ForwardStatementReference { identifier } => write!(
                f,
                "`{identifier}` refers to a statement later in the computation order at [t]"
            ),
            ProviderFailure(msg) => write!(f, "provider failure: {msg}"),
            DivisionByZero => write!(f, "division by zero"),
            NonFiniteResult => write!(f, "formula produced a non-finite result"),
            UnknownFunction(name) => write!(f, "unknown function `{name}`"),
            WrongArity { function, expected, got } => {
                write!(f, "`{function}` expects {expected} argument(s), got {got}")
            }
        }
    }
}

/// Where an error happened. Every user-visible error carries this triple
/// per spec §7 ("every error carries the (scenario, period, line-item or
/// rule) triple responsible").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    pub entity: Option<String>,
    pub scenario: Option<String>,
    pub period: Option<String>,
    pub line_item: Option<String>,
    pub rule_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn with_line_item(mut self, code: impl Into<String>) -> Self {
        self.line_item = Some(code.into());
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(e) = &self.entity {
            parts.push(format!("entity={e}"));
        }
        if let Some(s) = &self.scenario {
            parts.push(format!("scenario={s}"));
        }
        if let Some(p) = &self.period {
            parts.push(format!("period={p}"));
        }
        if let Some(li) = &self.line_item {
            parts.push(format!("line_item={li}"));
        }
        if let Some(r) = &self.rule_id {
            parts.push(format!("rule={r}"));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// The single error struct passed around the engine. Combines a
/// canonical `kind`, an optional human `message`, and a `context`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: Option<String>,
    pub context: ErrorContext,
}

impl From<EngineErrorKind> for EngineError {
    fn from(kind: EngineErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: ErrorContext::new(),
        }
    }
}

impl EngineError {
    pub fn new(kind: EngineErrorKind) -> Self {
        kind.into()
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn family(&self) -> ErrorFamily {
        self.kind.family()
    }

    pub fn is_template_error(&self) -> bool {
        self.family() == ErrorFamily::Template
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        let ctx = self.context.to_string();
        if !ctx.is_empty() {
            write!(f, " ({ctx})")?;
        }
        Ok(())
    }
}

impl Error for EngineError {}

/// Severity of a validation finding (spec §3, §4.G). Distinct from
/// `EngineError` because findings never abort a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Sign convention metadata (spec §3). Purely informational: the source
/// system documents an early bug where this was applied as a
/// transformation, then un-applied it. This type exists only so
/// templates can carry and round-trip the annotation; nothing in the
/// evaluator ever reads it to flip a sign.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SignConvention {
    Positive,
    Negative,
    #[default]
    Neutral,
}

//! The `(entity, scenario, period)` triple threaded explicitly through
//! every stage of a calculation.
//!
//! Spec §9 design note: "the source relies on a process-wide database
//! handle and registries. In a systems-language reimplementation, pass
//! these explicitly (a 'run context' value threaded through the
//! orchestrator) to keep the engine pure and testable." `RunContext` is
//! that value; nothing in this crate reaches for global/thread-local
//! state.

use std::fmt;

/// The statement-computation order within a single period (spec §4.E
/// "cross-statement ordering rule"). A statement may read `[t]` values
/// from any statement earlier in this order, and `[t-1]` values from
/// any statement regardless of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StatementKind {
    ProfitAndLoss,
    BalanceSheet,
    CashFlow,
    Auxiliary,
}

impl StatementKind {
    /// Default statement order (spec §6: "PL -> BS -> CF -> auxiliary").
    pub const DEFAULT_ORDER: [StatementKind; 4] = [
        StatementKind::ProfitAndLoss,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
        StatementKind::Auxiliary,
    ];

    /// The prefix a provider uses for this statement's cross-statement
    /// references (spec §4.E: `pl:CODE`, `bs:CODE`, `carbon:CODE`).
    pub fn prefix(&self) -> &'static str {
        match self {
            StatementKind::ProfitAndLoss => "pl",
            StatementKind::BalanceSheet => "bs",
            StatementKind::CashFlow => "cf",
            StatementKind::Auxiliary => "carbon",
        }
    }

    fn rank(&self, order: &[StatementKind]) -> Option<usize> {
        order.iter().position(|s| s == self)
    }

    /// Whether `other` is computed strictly before `self` in `order`.
    pub fn is_before(&self, other: &StatementKind, order: &[StatementKind]) -> bool {
        match (self.rank(order), other.rank(order)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The `(entity, scenario, period)` context every resolver call and
/// evaluation carries (spec §4.A: "`context` carries the current
/// `(scenario, period, entity)` so the resolver can fetch correctly").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunContext {
    pub entity: String,
    pub scenario: String,
    /// The period identifier (e.g. "2026-Q1"). Periods are ordered by
    /// the caller-supplied period list, not by parsing this string.
    pub period: String,
    /// 0-based index of `period` within the orchestrator's period list,
    /// used by the prior-period provider to look up `period_index + offset`.
    pub period_index: usize,
    pub statement: StatementKind,
}

impl RunContext {
    pub fn new(
        entity: impl Into<String>,
        scenario: impl Into<String>,
        period: impl Into<String>,
        period_index: usize,
        statement: StatementKind,
    ) -> Self {
        Self {
            entity: entity.into(),
            scenario: scenario.into(),
            period: period.into(),
            period_index,
            statement,
        }
    }

    pub fn with_statement(&self, statement: StatementKind) -> Self {
        Self { statement, ..self.clone() }
    }
}

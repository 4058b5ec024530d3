//! Value providers (spec §4.E): a capability-polymorphic set of sources
//! resolving `(identifier, time_offset)` to a number, consulted by the
//! calculator and the validator through one ordered [`ProviderChain`].
//!
//! Spec §9 design note: "re-architect as a closed set of variants...
//! or as a trait/interface holding the capability pair `{has_value,
//! get_value}`." The provider *kinds* here are fixed (driver, current,
//! prior, opening balance sheet, FX, cross-statement), so each is a
//! concrete struct behind one `ValueProvider` trait object, chained in
//! priority order — the open-extension case spec §9 flags as the
//! alternative is not needed.

use std::cell::RefCell;

use fiscaldag_common::{EngineError, EngineErrorKind};
use rustc_hash::FxHashMap;

use crate::context::{RunContext, StatementKind};
use crate::dependency::split_prefix;
use crate::evaluator::Resolver;

/// A single source of values. `has_value` lets the chain skip a
/// provider cheaply before committing to `get_value`.
pub trait ValueProvider {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool;
    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError>;
}

/// Provider #1: the mutable current-period working map, fed by the
/// calculator as each line item finishes. Serves unprefixed references
/// and references whose prefix matches `context.statement`.
#[derive(Debug, Default)]
pub struct CurrentPeriodProvider {
    values: FxHashMap<String, f64>,
}

impl CurrentPeriodProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, code: &str, value: f64) {
        self.values.insert(code.to_string(), value);
    }

    pub fn into_map(self) -> FxHashMap<String, f64> {
        self.values
    }

    pub fn as_map(&self) -> &FxHashMap<String, f64> {
        &self.values
    }

    fn local_code<'a>(&self, identifier: &'a str, context: &RunContext) -> Option<&'a str> {
        match split_prefix(identifier) {
            None => Some(identifier),
            Some((prefix, suffix)) if prefix == context.statement.prefix() => Some(suffix),
            Some(_) => None,
        }
    }
}

impl ValueProvider for CurrentPeriodProvider {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool {
        offset == 0
            && self
                .local_code(identifier, context)
                .is_some_and(|code| self.values.contains_key(code))
    }

    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        let code = self.local_code(identifier, context).unwrap_or(identifier);
        self.values.get(code).copied().ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
        })
    }
}

/// Provider #2: historical closing states, plus the run's opening
/// balance sheet standing in for "period -1" (spec §3: "the first
/// period's prior state is supplied as an opening balance sheet").
/// Only ever consulted for `offset < 0`.
#[derive(Debug, Default)]
pub struct PriorPeriodProvider {
    opening_state: FxHashMap<String, f64>,
    closing_states: Vec<FxHashMap<String, f64>>,
}

impl PriorPeriodProvider {
    pub fn new(opening_state: FxHashMap<String, f64>) -> Self {
        Self { opening_state, closing_states: Vec::new() }
    }

    /// Called by the orchestrator once a period's closing state is
    /// known, so the next period can reach back to it.
    pub fn push_closing_state(&mut self, state: FxHashMap<String, f64>) {
        self.closing_states.push(state);
    }

    fn lookup(&self, code: &str, target_index: i64) -> Option<f64> {
        if target_index < 0 {
            self.opening_state.get(code).copied()
        } else {
            self.closing_states.get(target_index as usize).and_then(|m| m.get(code)).copied()
        }
    }
}

impl ValueProvider for PriorPeriodProvider {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool {
        if offset >= 0 {
            return false;
        }
        let code = split_prefix(identifier).map(|(_, s)| s).unwrap_or(identifier);
        let target = context.period_index as i64 + offset as i64;
        self.lookup(code, target).is_some()
    }

    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        let code = split_prefix(identifier).map(|(_, s)| s).unwrap_or(identifier);
        let target = context.period_index as i64 + offset as i64;
        self.lookup(code, target).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NoPriorPeriod { identifier: identifier.to_string() })
        })
    }
}

/// `(entity, scenario, period, code) -> number`, owned by the
/// collaborator supplying driver input (spec §3, §6); the engine only
/// ever reads through this trait.
pub trait DriverSource {
    fn driver_value(&self, entity: &str, scenario: &str, period: &str, code: &str) -> Option<f64>;
}

/// Provider #3: resolves `driver:<code>` at `offset == 0`.
pub struct DriverProvider<'a> {
    source: &'a dyn DriverSource,
}

impl<'a> DriverProvider<'a> {
    pub fn new(source: &'a dyn DriverSource) -> Self {
        Self { source }
    }

    fn code<'b>(identifier: &'b str) -> Option<&'b str> {
        split_prefix(identifier).filter(|(p, _)| *p == "driver").map(|(_, s)| s)
    }
}

impl ValueProvider for DriverProvider<'_> {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool {
        offset == 0
            && Self::code(identifier).is_some_and(|code| {
                self.source.driver_value(&context.entity, &context.scenario, &context.period, code).is_some()
            })
    }

    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        let code = Self::code(identifier).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
        })?;
        self.source
            .driver_value(&context.entity, &context.scenario, &context.period, code)
            .ok_or_else(|| {
                EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
            })
    }
}

/// Provider #4: resolves `opening-bs:<code>` explicitly, any time in
/// the run (not only in period 0), distinct from the implicit opening
/// fallback inside [`PriorPeriodProvider`].
#[derive(Debug, Default)]
pub struct OpeningBalanceSheetProvider {
    state: FxHashMap<String, f64>,
}

impl OpeningBalanceSheetProvider {
    pub fn new(state: FxHashMap<String, f64>) -> Self {
        Self { state }
    }
}

impl ValueProvider for OpeningBalanceSheetProvider {
    fn has_value(&self, identifier: &str, offset: i32, _context: &RunContext) -> bool {
        offset == 0
            && split_prefix(identifier)
                .filter(|(p, _)| *p == "opening-bs")
                .is_some_and(|(_, code)| self.state.contains_key(code))
    }

    fn get_value(&self, identifier: &str, offset: i32, _context: &RunContext) -> Result<f64, EngineError> {
        let code = split_prefix(identifier)
            .filter(|(p, _)| *p == "opening-bs")
            .map(|(_, c)| c)
            .ok_or_else(|| {
                EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
            })?;
        self.state.get(code).copied().ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
        })
    }
}

/// `(from, to, rate_type) -> rate`, owned by the FX collaborator.
pub trait FxSource {
    fn fx_rate(&self, from: &str, to: &str, rate_type: &str) -> Option<f64>;
}

/// Provider #5: resolves `fx:<from>_<to>[_<rate-type>]`. A missing rate
/// is never a failure — it resolves to `1.0` and is logged as a warning
/// (spec §4.E), recorded here rather than returned, since `Resolver`
/// has no side channel; callers drain [`FxProvider::take_warnings`]
/// after a period completes.
pub struct FxProvider<'a> {
    source: &'a dyn FxSource,
    warnings: RefCell<Vec<String>>,
}

impl<'a> FxProvider<'a> {
    pub fn new(source: &'a dyn FxSource) -> Self {
        Self { source, warnings: RefCell::new(Vec::new()) }
    }

    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.borrow_mut())
    }

    fn parse_pair(suffix: &str) -> Option<(&str, &str, &str)> {
        let mut parts = suffix.splitn(3, '_');
        let from = parts.next()?;
        let to = parts.next()?;
        let rate_type = parts.next().unwrap_or("average");
        Some((from, to, rate_type))
    }
}

impl ValueProvider for FxProvider<'_> {
    fn has_value(&self, identifier: &str, offset: i32, _context: &RunContext) -> bool {
        offset == 0 && split_prefix(identifier).filter(|(p, _)| *p == "fx").is_some()
    }

    fn get_value(&self, identifier: &str, _offset: i32, _context: &RunContext) -> Result<f64, EngineError> {
        let (_, suffix) = split_prefix(identifier).filter(|(p, _)| *p == "fx").ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable {
                identifier: identifier.to_string(),
                offset: 0,
            })
        })?;
        let Some((from, to, rate_type)) = Self::parse_pair(suffix) else {
            return Ok(1.0);
        };
        match self.source.fx_rate(from, to, rate_type) {
            Some(rate) => Ok(rate),
            None => {
                self.warnings.borrow_mut().push(format!("no {rate_type} fx rate for {from}_{to}, defaulting to 1.0"));
                Ok(1.0)
            }
        }
    }
}

/// Provider #6: resolves `pl:CODE`, `bs:CODE`, `carbon:CODE` against
/// statements already computed earlier in this period's fixed order
/// (spec §4.E "cross-statement ordering rule"). A reference to a
/// statement later in the order at `[t]` is a resolution error, not
/// silently skipped.
#[derive(Debug, Default)]
pub struct CrossStatementProvider {
    order: Vec<StatementKind>,
    computed: FxHashMap<StatementKind, FxHashMap<String, f64>>,
}

impl CrossStatementProvider {
    pub fn new(order: Vec<StatementKind>) -> Self {
        Self { order, computed: FxHashMap::default() }
    }

    pub fn record(&mut self, statement: StatementKind, state: FxHashMap<String, f64>) {
        self.computed.insert(statement, state);
    }

    fn statement_for_prefix(prefix: &str) -> Option<StatementKind> {
        match prefix {
            "pl" => Some(StatementKind::ProfitAndLoss),
            "bs" => Some(StatementKind::BalanceSheet),
            "cf" => Some(StatementKind::CashFlow),
            "carbon" => Some(StatementKind::Auxiliary),
            _ => None,
        }
    }
}

impl ValueProvider for CrossStatementProvider {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool {
        if offset != 0 {
            return false;
        }
        let Some((prefix, code)) = split_prefix(identifier) else { return false };
        let Some(statement) = Self::statement_for_prefix(prefix) else { return false };
        statement.is_before(&context.statement, &self.order)
            && self.computed.get(&statement).is_some_and(|m| m.contains_key(code))
    }

    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        let (prefix, code) = split_prefix(identifier).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
        })?;
        let statement = Self::statement_for_prefix(prefix).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
        })?;
        if !statement.is_before(&context.statement, &self.order) {
            return Err(EngineError::new(EngineErrorKind::ForwardStatementReference {
                identifier: identifier.to_string(),
            }));
        }
        self.computed
            .get(&statement)
            .and_then(|m| m.get(code))
            .copied()
            .ok_or_else(|| {
                EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset })
            })
    }
}

/// Lets the calculator hand out `&current` as a chain member while
/// still mutating it after each line item completes.
impl ValueProvider for RefCell<CurrentPeriodProvider> {
    fn has_value(&self, identifier: &str, offset: i32, context: &RunContext) -> bool {
        self.borrow().has_value(identifier, offset, context)
    }

    fn get_value(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        self.borrow().get_value(identifier, offset, context)
    }
}

/// The ordered chain the calculator and validator resolve references
/// through: the first provider reporting `has_value` serves the read.
pub struct ProviderChain<'a> {
    providers: Vec<&'a dyn ValueProvider>,
}

impl<'a> ProviderChain<'a> {
    pub fn new(providers: Vec<&'a dyn ValueProvider>) -> Self {
        Self { providers }
    }
}

impl Resolver for ProviderChain<'_> {
    fn resolve(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError> {
        for provider in &self.providers {
            if provider.has_value(identifier, offset, context) {
                return provider.get_value(identifier, offset, context);
            }
        }
        Err(EngineError::new(EngineErrorKind::NotResolvable { identifier: identifier.to_string(), offset }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(index: usize, statement: StatementKind) -> RunContext {
        RunContext::new("acme", "base", "2026-Q1", index, statement)
    }

    #[test]
    fn current_period_provider_serves_unprefixed_current_offset() {
        let mut p = CurrentPeriodProvider::new();
        p.set("REVENUE", 100.0);
        let c = ctx(0, StatementKind::ProfitAndLoss);
        assert!(p.has_value("REVENUE", 0, &c));
        assert_eq!(p.get_value("REVENUE", 0, &c).unwrap(), 100.0);
        assert!(!p.has_value("REVENUE", -1, &c));
    }

    #[test]
    fn prior_period_provider_falls_back_to_opening_state() {
        let mut opening = FxHashMap::default();
        opening.insert("CASH".to_string(), 5000.0);
        let provider = PriorPeriodProvider::new(opening);
        let c = ctx(0, StatementKind::BalanceSheet);
        assert_eq!(provider.get_value("CASH", -1, &c).unwrap(), 5000.0);
    }

    #[test]
    fn prior_period_provider_reads_historical_closing_states() {
        let mut provider = PriorPeriodProvider::new(FxHashMap::default());
        let mut period0 = FxHashMap::default();
        period0.insert("CASH".to_string(), 7000.0);
        provider.push_closing_state(period0);
        let c = ctx(1, StatementKind::BalanceSheet);
        assert_eq!(provider.get_value("CASH", -1, &c).unwrap(), 7000.0);
    }

    struct FixedDrivers;
    impl DriverSource for FixedDrivers {
        fn driver_value(&self, _e: &str, _s: &str, _p: &str, code: &str) -> Option<f64> {
            if code == "REVENUE" { Some(100000.0) } else { None }
        }
    }

    #[test]
    fn driver_provider_resolves_prefixed_code() {
        let source = FixedDrivers;
        let provider = DriverProvider::new(&source);
        let c = ctx(0, StatementKind::ProfitAndLoss);
        assert_eq!(provider.get_value("driver:REVENUE", 0, &c).unwrap(), 100000.0);
    }

    struct NoRates;
    impl FxSource for NoRates {
        fn fx_rate(&self, _f: &str, _t: &str, _r: &str) -> Option<f64> {
            None
        }
    }

    #[test]
    fn fx_provider_defaults_to_one_and_warns_on_missing_rate() {
        let source = NoRates;
        let provider = FxProvider::new(&source);
        let c = ctx(0, StatementKind::ProfitAndLoss);
        assert_eq!(provider.get_value("fx:USD_EUR", 0, &c).unwrap(), 1.0);
        assert_eq!(provider.take_warnings().len(), 1);
    }

    #[test]
    fn cross_statement_provider_rejects_forward_reference() {
        let order = vec![StatementKind::ProfitAndLoss, StatementKind::BalanceSheet];
        let provider = CrossStatementProvider::new(order);
        let c = ctx(0, StatementKind::ProfitAndLoss);
        let err = provider.get_value("bs:TOTAL_ASSETS", 0, &c).unwrap_err();
        assert!(matches!(err.kind, EngineErrorKind::ForwardStatementReference { .. }));
    }

    #[test]
    fn cross_statement_provider_serves_an_earlier_statement() {
        let order = vec![StatementKind::ProfitAndLoss, StatementKind::BalanceSheet];
        let mut provider = CrossStatementProvider::new(order);
        let mut pl = FxHashMap::default();
        pl.insert("NET_INCOME".to_string(), 500.0);
        provider.record(StatementKind::ProfitAndLoss, pl);
        let c = ctx(0, StatementKind::BalanceSheet);
        assert_eq!(provider.get_value("pl:NET_INCOME", 0, &c).unwrap(), 500.0);
    }

    #[test]
    fn chain_tries_providers_in_order() {
        let mut current = CurrentPeriodProvider::new();
        current.set("REVENUE", 999.0);
        let opening = PriorPeriodProvider::new(FxHashMap::default());
        let chain = ProviderChain::new(vec![&current, &opening]);
        let c = ctx(0, StatementKind::ProfitAndLoss);
        assert_eq!(chain.resolve("REVENUE", 0, &c).unwrap(), 999.0);
    }
}

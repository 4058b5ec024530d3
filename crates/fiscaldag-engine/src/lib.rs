//! Unified mega-DAG calculation engine: formula evaluation, dependency
//! scheduling, layered value resolution, per-period calculation,
//! validation, and multi-period orchestration over declarative
//! statement templates.

pub mod action;
pub mod calculator;
pub mod config;
pub mod context;
pub mod dependency;
pub mod evaluator;
pub mod graph;
pub mod orchestrator;
pub mod provider;
pub mod template;
pub mod validator;

pub use action::{apply as apply_actions, Action};
pub use calculator::{calculate, PeriodOutcome};
pub use config::EngineConfig;
pub use context::{RunContext, StatementKind};
pub use dependency::{extract as extract_dependencies, Dependencies};
pub use evaluator::{evaluate, is_builtin_function, Resolver};
pub use graph::DependencyGraph;
pub use orchestrator::{CancellationToken, Orchestrator, PeriodResult, RunOutcome};
pub use provider::{
    CrossStatementProvider, CurrentPeriodProvider, DriverProvider, DriverSource, FxProvider,
    FxSource, OpeningBalanceSheetProvider, PriorPeriodProvider, ProviderChain, ValueProvider,
};
pub use template::{LineItem, LineItemOverride, LineItemSource, Template, TemplateSource};
pub use validator::{
    BoundaryDirection, RuleKind, ValidationFinding, ValidationReport, ValidationRule,
    ValidationRuleSource,
};

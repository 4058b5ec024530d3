//! Run-level configuration (spec §6: "the only core-level configuration
//! is the `tolerance` default and the statement-order policy... both
//! should be overridable per run"). Loading this from a file or CLI
//! flags is a collaborator's concern; this crate only defines the
//! shape and its defaults.

use crate::context::StatementKind;
use crate::validator::DEFAULT_TOLERANCE;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub default_tolerance: f64,
    pub statement_order: Vec<StatementKind>,
    /// Spec §7 "Propagation policy... configurable to 'continue with
    /// next scenario'". Applies to `run_many`: within one scenario's
    /// own period sequence a failed period always stops that
    /// scenario's run; this flag only decides whether the batch as a
    /// whole keeps going to the next scenario.
    pub continue_on_period_failure: bool,
    /// Whether `run_many` may evaluate scenarios concurrently (spec §5
    /// "a straightforward parallelisation unit is 'one scenario per
    /// worker'"). Only takes effect when this crate is built with the
    /// `parallel` feature; otherwise scenarios always run sequentially.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tolerance: DEFAULT_TOLERANCE,
            statement_order: StatementKind::DEFAULT_ORDER.to_vec(),
            continue_on_period_failure: false,
            parallel: false,
        }
    }
}

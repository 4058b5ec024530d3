//! Dependency extraction over a parsed formula AST (spec §4.B).
//!
//! Walks an [`fiscaldag_parse::Expr`] and returns the *set* of
//! `(identifier, time_offset)` pairs it references. `time_offset == 0`
//! participates in the current-period dependency graph; `time_offset <
//! 0` is a prior-period reference and never produces a graph edge.

use std::collections::BTreeSet;

use fiscaldag_parse::{Expr, ExprKind};

/// Recognised provider prefixes (spec §3 I2, §4.B, §4.E). An identifier
/// carrying one of these is an *opaque* externally-supplied reference
/// unless the suffix after the prefix names a line item in the same
/// template (a cross-statement reference within a unified template).
pub const PROVIDER_PREFIXES: &[&str] =
    &["driver", "fx", "bs", "pl", "opening-bs", "carbon"];

/// Splits `identifier` into `(prefix, suffix)` if it carries one of
/// [`PROVIDER_PREFIXES`].
pub fn split_prefix(identifier: &str) -> Option<(&str, &str)> {
    identifier.split_once(':').filter(|(p, _)| PROVIDER_PREFIXES.contains(p))
}

/// The dependency set collected from a single formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Current-period references (`time_offset == 0`). These participate
    /// in scheduling when they name a line item of the same template.
    pub current: BTreeSet<String>,
    /// Prior-period references (`time_offset < 0`), paired with the
    /// (negative) offset. These never produce a graph edge.
    pub prior: BTreeSet<(String, i32)>,
}

impl Dependencies {
    pub fn merge(&mut self, other: Dependencies) {
        self.current.extend(other.current);
        self.prior.extend(other.prior);
    }
}

/// Collects every identifier reference in `expr`. Function names (spec
/// §4.B: "Function names are not collected as variable references") and
/// built-ins are skipped; everything else is deduplicated (`BTreeSet`).
pub fn extract(expr: &Expr) -> Dependencies {
    let mut deps = Dependencies::default();
    walk(expr, &mut deps);
    deps
}

fn walk(expr: &Expr, deps: &mut Dependencies) {
    match &expr.kind {
        ExprKind::Number(_) => {}
        ExprKind::Reference { name, offset } => {
            if *offset == 0 {
                deps.current.insert(name.clone());
            } else {
                deps.prior.insert((name.clone(), *offset));
            }
        }
        ExprKind::Negate(inner) => walk(inner, deps),
        ExprKind::Binary { left, right, .. } => {
            walk(left, deps);
            walk(right, deps);
        }
        ExprKind::Call { args, .. } => {
            // The call name itself is never a variable reference, built-in
            // or not; an unknown function is caught at evaluation time.
            for arg in args {
                walk(arg, deps);
            }
        }
    }
}

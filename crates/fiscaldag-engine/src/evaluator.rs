//! Formula evaluation (spec §4.A): `evaluate(expr, resolver, context) ->
//! number | formula error`. The evaluator itself holds no state and
//! touches nothing but its arguments — it is pure and safely reentrant,
//! so a single `Expr` can be evaluated concurrently across scenarios
//! (spec §5) without synchronization.
//!
//! `Resolver` is the seam between formula evaluation and value lookup:
//! evaluation never touches storage directly, it only ever asks a
//! resolver for an identifier at a given time offset.

use fiscaldag_common::{EngineError, EngineErrorKind};
use fiscaldag_parse::{BinaryOp, Expr, ExprKind};

use crate::context::RunContext;

/// Built-in function names (spec §4.A). Reserved: a formula may not use
/// one of these as a variable reference, and an unknown call name is a
/// formula error rather than silently resolving as an identifier.
const BUILTIN_FUNCTIONS: &[&str] = &["MIN", "MAX", "ABS", "IF"];

pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

/// Supplies the current value of an identifier at a given time offset
/// relative to the context's period. `offset == 0` is the current
/// period; negative offsets reach into prior periods. Implementations
/// compose providers (spec §4.E) and are themselves responsible for
/// resolving prefixed identifiers (`driver:`, `fx:`, `bs:`, ...).
pub trait Resolver {
    fn resolve(&self, identifier: &str, offset: i32, context: &RunContext) -> Result<f64, EngineError>;
}

/// Evaluates `expr` under `resolver` in `context`. Division by zero is
/// a formula error. Non-finite intermediate results (e.g. an
/// overflowing power) are *not* rejected here — they propagate like
/// any other value, since a later operation (`MIN`, `IF`, ...) may
/// still resolve to a finite number from them. Only the final value of
/// a line item's top-level formula is checked for finiteness, by the
/// caller (spec §4.A: "a non-finite *result* is a formula error", not
/// a non-finite intermediate).
pub fn evaluate(
    expr: &Expr,
    resolver: &dyn Resolver,
    context: &RunContext,
) -> Result<f64, EngineError> {
    match &expr.kind {
        ExprKind::Number(n) => Ok(*n),
        ExprKind::Reference { name, offset } => resolver.resolve(name, *offset, context),
        ExprKind::Negate(inner) => Ok(-evaluate(inner, resolver, context)?),
        ExprKind::Binary { op, left, right } => {
            let l = evaluate(left, resolver, context)?;
            let r = evaluate(right, resolver, context)?;
            apply_binary(*op, l, r)
        }
        ExprKind::Call { name, args } => evaluate_call(name, args, resolver, context),
    }
}

fn apply_binary(op: BinaryOp, l: f64, r: f64) -> Result<f64, EngineError> {
    match op {
        BinaryOp::Add => Ok(l + r),
        BinaryOp::Sub => Ok(l - r),
        BinaryOp::Mul => Ok(l * r),
        BinaryOp::Div => {
            if r == 0.0 {
                Err(EngineError::new(EngineErrorKind::DivisionByZero))
            } else {
                Ok(l / r)
            }
        }
        BinaryOp::Pow => Ok(l.powf(r)),
    }
}

fn evaluate_call(
    name: &str,
    args: &[Expr],
    resolver: &dyn Resolver,
    context: &RunContext,
) -> Result<f64, EngineError> {
    let values = || -> Result<Vec<f64>, EngineError> {
        args.iter().map(|a| evaluate(a, resolver, context)).collect()
    };
    match name {
        "MIN" => {
            let v = values()?;
            expect_arity(name, &v, 2)?;
            Ok(v[0].min(v[1]))
        }
        "MAX" => {
            let v = values()?;
            expect_arity(name, &v, 2)?;
            Ok(v[0].max(v[1]))
        }
        "ABS" => {
            let v = values()?;
            expect_arity(name, &v, 1)?;
            Ok(v[0].abs())
        }
        "IF" => {
            if args.len() != 3 {
                return Err(EngineError::new(EngineErrorKind::WrongArity {
                    function: "IF".to_string(),
                    expected: "3".to_string(),
                    got: args.len(),
                }));
            }
            let cond = evaluate(&args[0], resolver, context)?;
            if cond != 0.0 {
                evaluate(&args[1], resolver, context)
            } else {
                evaluate(&args[2], resolver, context)
            }
        }
        other => Err(EngineError::new(EngineErrorKind::UnknownFunction(other.to_string()))),
    }
}

fn expect_arity(function: &str, got: &[f64], expected: usize) -> Result<(), EngineError> {
    if got.len() == expected {
        Ok(())
    } else {
        Err(EngineError::new(EngineErrorKind::WrongArity {
            function: function.to_string(),
            expected: expected.to_string(),
            got: got.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscaldag_parse::parse;
    use std::collections::HashMap;

    use crate::context::StatementKind;

    struct MapResolver(HashMap<(String, i32), f64>);

    impl Resolver for MapResolver {
        fn resolve(&self, identifier: &str, offset: i32, _ctx: &RunContext) -> Result<f64, EngineError> {
            self.0
                .get(&(identifier.to_string(), offset))
                .copied()
                .ok_or_else(|| {
                    EngineError::new(EngineErrorKind::NotResolvable {
                        identifier: identifier.to_string(),
                        offset,
                    })
                })
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("acme", "base", "2026-Q1", 0, StatementKind::ProfitAndLoss)
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let expr = parse("2 + 3 * 4").unwrap();
        let resolver = MapResolver(HashMap::new());
        assert_eq!(evaluate(&expr, &resolver, &ctx()).unwrap(), 14.0);
    }

    #[test]
    fn resolves_current_and_prior_references() {
        let expr = parse("REVENUE - REVENUE[t-1]").unwrap();
        let mut values = HashMap::new();
        values.insert(("REVENUE".to_string(), 0), 120.0);
        values.insert(("REVENUE".to_string(), -1), 100.0);
        let resolver = MapResolver(values);
        assert_eq!(evaluate(&expr, &resolver, &ctx()).unwrap(), 20.0);
    }

    #[test]
    fn division_by_zero_is_a_formula_error() {
        let expr = parse("1 / 0").unwrap();
        let resolver = MapResolver(HashMap::new());
        let err = evaluate(&expr, &resolver, &ctx()).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::DivisionByZero);
    }

    #[test]
    fn if_only_evaluates_the_taken_branch() {
        let expr = parse("IF(1, 10, UNRESOLVABLE)").unwrap();
        let resolver = MapResolver(HashMap::new());
        assert_eq!(evaluate(&expr, &resolver, &ctx()).unwrap(), 10.0);
    }

    #[test]
    fn min_max_abs_behave() {
        let resolver = MapResolver(HashMap::new());
        assert_eq!(evaluate(&parse("MIN(3, 5)").unwrap(), &resolver, &ctx()).unwrap(), 3.0);
        assert_eq!(evaluate(&parse("MAX(3, 5)").unwrap(), &resolver, &ctx()).unwrap(), 5.0);
        assert_eq!(evaluate(&parse("ABS(0 - 7)").unwrap(), &resolver, &ctx()).unwrap(), 7.0);
    }

    #[test]
    fn unknown_function_is_a_formula_error() {
        let expr = parse("NOPE(1)").unwrap();
        let resolver = MapResolver(HashMap::new());
        let err = evaluate(&expr, &resolver, &ctx()).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::UnknownFunction("NOPE".to_string()));
    }

    #[test]
    fn wrong_arity_is_a_formula_error() {
        let expr = parse("ABS(1, 2)").unwrap();
        let resolver = MapResolver(HashMap::new());
        let err = evaluate(&expr, &resolver, &ctx()).unwrap_err();
        assert!(matches!(err.kind, EngineErrorKind::WrongArity { .. }));
    }

    #[test]
    fn a_non_finite_intermediate_may_still_yield_a_finite_result() {
        let expr = parse("MIN(2 ^ 2000, 5)").unwrap();
        let resolver = MapResolver(HashMap::new());
        assert_eq!(evaluate(&expr, &resolver, &ctx()).unwrap(), 5.0);
    }

    #[test]
    fn is_builtin_function_recognises_the_reserved_set() {
        assert!(is_builtin_function("IF"));
        assert!(!is_builtin_function("REVENUE"));
    }
}

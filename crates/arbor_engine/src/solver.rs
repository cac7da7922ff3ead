//! Encodes constraint systems into Z3 arithmetic over the reals and solves them.
//!
//! Every call builds its own Z3 context, so independent solves may run concurrently.

use arbor_common::config::{Domain, SolverOptions};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, Zero};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use z3::ast::{Ast, Bool, Real};
use z3::{Config, Context, Model, Optimize, Params, SatResult, Solver};

use crate::coefficient::{Coefficient, Solution, Unknown};
use crate::constraint::{Constraint, ConstraintKind};

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("the solver could not decide {name}: {reason}")]
    Unknown { name: String, reason: String },
    #[error("the solver returned a value for {unknown} that cannot be read back: {value}")]
    Decode { unknown: String, value: String },
    #[error("could not write solver instance to {path}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
    Solved(Solution),
    /// The reasons of an unsatisfiable subset of the constraints.
    Unsat { core: Vec<String> },
}

impl SolveOutcome {
    pub fn is_solved(&self) -> bool {
        matches!(self, SolveOutcome::Solved(_))
    }

    /// Combines the outcomes of independent systems: unsatisfiability wins, otherwise the
    /// assignments are joined.
    pub fn merge(self, other: SolveOutcome) -> SolveOutcome {
        match (self, other) {
            (SolveOutcome::Unsat { mut core }, SolveOutcome::Unsat { core: other }) => {
                core.extend(other);
                SolveOutcome::Unsat { core }
            }
            (unsat @ SolveOutcome::Unsat { .. }, _) | (_, unsat @ SolveOutcome::Unsat { .. }) => {
                unsat
            }
            (SolveOutcome::Solved(mut solution), SolveOutcome::Solved(other)) => {
                solution.extend(other);
                SolveOutcome::Solved(solution)
            }
        }
    }
}

/// One real constant per canonical unknown.
struct Variables<'ctx> {
    ctx: &'ctx Context,
    reals: BTreeMap<Unknown, Real<'ctx>>,
}

impl<'ctx> Variables<'ctx> {
    fn new<'c>(
        ctx: &'ctx Context,
        constraints: impl IntoIterator<Item = &'c Constraint>,
        targets: &[Unknown],
    ) -> Self {
        let mut reals = BTreeMap::new();
        let mut add = |unknown: Unknown| {
            reals
                .entry(unknown)
                .or_insert_with_key(|unknown| Real::new_const(ctx, format!("u{}", unknown.id)));
        };
        for constraint in constraints {
            constraint.occurring_coefficients().into_iter().for_each(&mut add);
        }
        targets.iter().map(Unknown::canonical).for_each(add);
        Variables { ctx, reals }
    }

    fn zero(&self) -> Real<'ctx> {
        Real::from_real(self.ctx, 0, 1)
    }

    fn encode(&self, coefficient: &Coefficient) -> Real<'ctx> {
        match coefficient {
            Coefficient::Known(value) => rational(self.ctx, value),
            Coefficient::Unknown(unknown) => {
                let real = self
                    .reals
                    .get(&unknown.canonical())
                    .unwrap_or_else(|| bug!("no solver variable for {}", unknown))
                    .clone();
                if unknown.negated {
                    real.unary_minus()
                } else {
                    real
                }
            }
        }
    }

    fn sum(&self, summands: &[Coefficient]) -> Real<'ctx> {
        if summands.is_empty() {
            return self.zero();
        }
        let summands: Vec<_> = summands.iter().map(|summand| self.encode(summand)).collect();
        Real::add(self.ctx, &summands)
    }

    /// Non-negativity, and integrality in the integer domain.
    fn domain_constraints(&self, domain: Domain) -> Vec<Bool<'ctx>> {
        let zero = self.zero();
        let mut result = Vec::new();
        for (unknown, real) in &self.reals {
            if !unknown.maybe_negative {
                result.push(real.ge(&zero));
            }
            if domain == Domain::Integer {
                result.push(real.is_int());
            }
        }
        result
    }
}

/// An exact numeral, however large its numerator and denominator are.
fn rational<'ctx>(ctx: &'ctx Context, value: &BigRational) -> Real<'ctx> {
    let magnitude = value.abs();
    let real = Real::from_real_str(
        ctx,
        &magnitude.numer().to_str_radix(10),
        &magnitude.denom().to_str_radix(10),
    )
    .unwrap_or_else(|| bug!("Z3 rejected the numeral {}", value));
    if value.is_negative() {
        real.unary_minus()
    } else {
        real
    }
}

/// Reads a numeral as Z3 prints it: `3.0`, `(/ 1.0 3.0)` or `(- ...)`.
fn parse_numeral(text: &str) -> Option<BigRational> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("(-").and_then(|rest| rest.strip_suffix(')')) {
        return parse_numeral(inner).map(|value| -value);
    }
    if let Some(inner) = text.strip_prefix("(/").and_then(|rest| rest.strip_suffix(')')) {
        let (numer, denom) = inner.trim().split_once(char::is_whitespace)?;
        let denom = parse_numeral(denom)?;
        if denom.is_zero() {
            return None;
        }
        return Some(parse_numeral(numer)? / denom);
    }
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits: BigInt = format!("{}{}", whole, fraction).parse().ok()?;
    let scale = num_traits::pow(BigInt::from(10), fraction.len());
    Some(BigRational::new(digits, scale))
}

fn numeral(value: &Real) -> Option<BigRational> {
    match value.as_real() {
        Some((numer, denom)) if denom != 0 => {
            Some(BigRational::new(BigInt::from(numer), BigInt::from(denom)))
        }
        // Too large for the machine-sized accessor.
        _ => parse_numeral(&value.to_string()),
    }
}

impl Constraint {
    fn encode<'ctx>(&self, vars: &Variables<'ctx>) -> Bool<'ctx> {
        match &self.kind {
            ConstraintKind::Equality(left, right) => vars.encode(left)._eq(&vars.encode(right)),
            ConstraintKind::GreaterOrEqual(left, right) => {
                vars.encode(left).ge(&vars.encode(right))
            }
            ConstraintKind::LessOrEqual(left, right) => vars.encode(left).le(&vars.encode(right)),
            ConstraintKind::EqualsSum(left, summands) => {
                vars.encode(left)._eq(&vars.sum(summands))
            }
            ConstraintKind::EqualsAbs(left, right) => {
                let right = vars.encode(right);
                let abs = right.ge(&vars.zero()).ite(&right, &right.unary_minus());
                vars.encode(left)._eq(&abs)
            }
            ConstraintKind::Disjunctive(alternatives) => {
                let alternatives: Vec<_> = alternatives
                    .iter()
                    .map(|alternative| alternative.encode(vars))
                    .collect();
                Bool::or(vars.ctx, &alternatives)
            }
            ConstraintKind::Unsatisfiable => Bool::from_bool(vars.ctx, false),
        }
    }
}

fn decode(vars: &Variables, model: &Model) -> Result<Solution, SolveError> {
    let mut solution = Solution::new();
    for (unknown, real) in &vars.reals {
        let value = model.eval(real, true);
        let Some(parsed) = value.as_ref().and_then(numeral) else {
            return Err(SolveError::Decode {
                unknown: unknown.to_string(),
                value: value.map_or_else(|| "nothing".to_owned(), |value| value.to_string()),
            });
        };
        solution.insert(unknown.clone(), parsed);
    }
    Ok(solution)
}

fn timeout_params<'ctx>(ctx: &'ctx Context, options: &SolverOptions) -> Params<'ctx> {
    let mut params = Params::new(ctx);
    let millis = u32::try_from(options.timeout.as_millis()).unwrap_or(u32::MAX);
    params.set_u32("timeout", millis.max(1));
    params
}

fn dump_instance(path: &Path, instance: &str) -> Result<(), SolveError> {
    fs::write(path, instance).map_err(|source| SolveError::Dump {
        path: path.to_owned(),
        source,
    })
}

/// Checks with every constraint tracked, to learn an unsatisfiable core.
fn check_tracked(
    name: &str,
    constraints: &[Constraint],
    vars: &Variables,
    options: &SolverOptions,
    dump: Option<&Path>,
) -> Result<SolveOutcome, SolveError> {
    let solver = Solver::new(vars.ctx);
    solver.set_params(&timeout_params(vars.ctx, options));
    for assertion in vars.domain_constraints(options.domain) {
        solver.assert(&assertion);
    }
    for (position, constraint) in constraints.iter().enumerate() {
        solver.assert_and_track(
            &constraint.encode(vars),
            &Bool::new_const(vars.ctx, Constraint::label(position)),
        );
    }
    if let Some(path) = dump {
        dump_instance(path, &solver.to_string())?;
    }

    match solver.check() {
        SatResult::Sat => {
            let model = solver.get_model().ok_or_else(|| SolveError::Unknown {
                name: name.to_owned(),
                reason: "no model".to_owned(),
            })?;
            Ok(SolveOutcome::Solved(decode(vars, &model)?))
        }
        SatResult::Unsat => {
            let labels: BTreeMap<_, _> = constraints
                .iter()
                .enumerate()
                .map(|(position, constraint)| (Constraint::label(position), constraint))
                .collect();
            let core: Vec<_> = solver
                .get_unsat_core()
                .iter()
                .filter_map(|label| labels.get(label.to_string().trim_matches('|')))
                .map(|constraint| constraint.to_string())
                .collect();
            tracing::warn!(instance = name, size = core.len(), "unsatisfiable core");
            for constraint in &core {
                tracing::warn!(instance = name, "  {}", constraint);
            }
            Ok(SolveOutcome::Unsat { core })
        }
        SatResult::Unknown => Err(SolveError::Unknown {
            name: name.to_owned(),
            reason: solver
                .get_reason_unknown()
                .unwrap_or_else(|| "unknown".to_owned()),
        }),
    }
}

/// Solves `constraints`, minimising the sum of `targets` if there are any.
pub fn solve(
    name: &str,
    constraints: &[Constraint],
    targets: &[Unknown],
    options: &SolverOptions,
    dump: Option<&Path>,
) -> Result<SolveOutcome, SolveError> {
    let ctx = Context::new(&Config::new());
    let vars = Variables::new(&ctx, constraints, targets);
    tracing::debug!(
        instance = name,
        constraints = constraints.len(),
        unknowns = vars.reals.len(),
        targets = targets.len(),
        "solving"
    );

    if targets.is_empty() {
        return check_tracked(name, constraints, &vars, options, dump);
    }

    let optimize = Optimize::new(&ctx);
    optimize.set_params(&timeout_params(&ctx, options));
    for assertion in vars.domain_constraints(options.domain) {
        optimize.assert(&assertion);
    }
    for constraint in constraints {
        optimize.assert(&constraint.encode(&vars));
    }
    let objective: Vec<_> = targets
        .iter()
        .map(|target| Coefficient::Unknown(target.canonical()))
        .collect();
    optimize.minimize(&vars.sum(&objective));
    if let Some(path) = dump {
        dump_instance(path, &optimize.to_string())?;
    }

    match optimize.check(&[]) {
        SatResult::Sat => {
            let model = optimize.get_model().ok_or_else(|| SolveError::Unknown {
                name: name.to_owned(),
                reason: "no model".to_owned(),
            })?;
            Ok(SolveOutcome::Solved(decode(&vars, &model)?))
        }
        SatResult::Unsat => check_tracked(name, constraints, &vars, options, None),
        SatResult::Unknown => Err(SolveError::Unknown {
            name: name.to_owned(),
            reason: optimize
                .get_reason_unknown()
                .unwrap_or_else(|| "unknown".to_owned()),
        }),
    }
}

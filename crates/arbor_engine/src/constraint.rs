//! Linear constraints over annotation coefficients, as generated by the typing rules and handed
//! to the solver. Each carries a human-readable reason, which names it in unsatisfiable cores.

use std::collections::BTreeSet;
use std::fmt;

use crate::coefficient::{Coefficient, Solution, Unknown};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Equality(Coefficient, Coefficient),
    GreaterOrEqual(Coefficient, Coefficient),
    LessOrEqual(Coefficient, Coefficient),
    EqualsSum(Coefficient, Vec<Coefficient>),
    /// `left = |right|`
    EqualsAbs(Coefficient, Coefficient),
    /// At least one of the constraints holds. Empty means false.
    Disjunctive(Vec<Constraint>),
    Unsatisfiable,
}

/// A linear constraint over coefficients, with the reason it was generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub reason: String,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, reason: impl Into<String>) -> Self {
        Constraint {
            kind,
            reason: reason.into(),
        }
    }

    pub fn eq(left: Coefficient, right: Coefficient, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::Equality(left, right), reason)
    }

    pub fn ge(left: Coefficient, right: Coefficient, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::GreaterOrEqual(left, right), reason)
    }

    pub fn le(left: Coefficient, right: Coefficient, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::LessOrEqual(left, right), reason)
    }

    pub fn sum(left: Coefficient, summands: Vec<Coefficient>, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::EqualsSum(left, summands), reason)
    }

    pub fn abs(left: Coefficient, right: Coefficient, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::EqualsAbs(left, right), reason)
    }

    pub fn or(alternatives: Vec<Constraint>, reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::Disjunctive(alternatives), reason)
    }

    pub fn unsatisfiable(reason: impl Into<String>) -> Self {
        Constraint::new(ConstraintKind::Unsatisfiable, reason)
    }

    /// Every coefficient mentioned, including those inside disjunctions.
    fn for_each_coefficient(&self, f: &mut impl FnMut(&Coefficient)) {
        match &self.kind {
            ConstraintKind::Equality(left, right)
            | ConstraintKind::GreaterOrEqual(left, right)
            | ConstraintKind::LessOrEqual(left, right)
            | ConstraintKind::EqualsAbs(left, right) => {
                f(left);
                f(right);
            }
            ConstraintKind::EqualsSum(left, summands) => {
                f(left);
                summands.iter().for_each(&mut *f);
            }
            ConstraintKind::Disjunctive(alternatives) => {
                for alternative in alternatives {
                    alternative.for_each_coefficient(f);
                }
            }
            ConstraintKind::Unsatisfiable => {}
        }
    }

    /// The canonical form of every unknown this constraint mentions.
    pub fn occurring_coefficients(&self) -> BTreeSet<Unknown> {
        let mut unknowns = BTreeSet::new();
        self.for_each_coefficient(&mut |coefficient| {
            if let Some(unknown) = coefficient.unknown() {
                unknowns.insert(unknown.canonical());
            }
        });
        unknowns
    }

    fn map_coefficients(&self, f: &impl Fn(&Coefficient) -> Coefficient) -> Constraint {
        let kind = match &self.kind {
            ConstraintKind::Equality(left, right) => ConstraintKind::Equality(f(left), f(right)),
            ConstraintKind::GreaterOrEqual(left, right) => {
                ConstraintKind::GreaterOrEqual(f(left), f(right))
            }
            ConstraintKind::LessOrEqual(left, right) => {
                ConstraintKind::LessOrEqual(f(left), f(right))
            }
            ConstraintKind::EqualsSum(left, summands) => {
                ConstraintKind::EqualsSum(f(left), summands.iter().map(f).collect())
            }
            ConstraintKind::EqualsAbs(left, right) => ConstraintKind::EqualsAbs(f(left), f(right)),
            ConstraintKind::Disjunctive(alternatives) => ConstraintKind::Disjunctive(
                alternatives
                    .iter()
                    .map(|alternative| alternative.map_coefficients(f))
                    .collect(),
            ),
            ConstraintKind::Unsatisfiable => ConstraintKind::Unsatisfiable,
        };
        Constraint::new(kind, self.reason.clone())
    }

    pub fn replace(&self, target: &Unknown, with: &Coefficient) -> Constraint {
        self.map_coefficients(&|coefficient| coefficient.replace(target, with))
    }

    pub fn substitute(&self, solution: &Solution) -> Constraint {
        self.map_coefficients(&|coefficient| coefficient.substitute(solution))
    }

    /// The name under which the solver tracks the constraint at `position` for unsat cores.
    pub fn label(position: usize) -> String {
        format!("c{}", position)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ConstraintKind::Equality(left, right) => write!(f, "{} = {}", left, right)?,
            ConstraintKind::GreaterOrEqual(left, right) => write!(f, "{} ≥ {}", left, right)?,
            ConstraintKind::LessOrEqual(left, right) => write!(f, "{} ≤ {}", left, right)?,
            ConstraintKind::EqualsSum(left, summands) => {
                write!(f, "{} = ", left)?;
                if summands.is_empty() {
                    f.write_str("0")?;
                }
                for (i, summand) in summands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{}", summand)?;
                }
            }
            ConstraintKind::EqualsAbs(left, right) => write!(f, "{} = |{}|", left, right)?,
            ConstraintKind::Disjunctive(alternatives) => {
                if alternatives.is_empty() {
                    f.write_str("false")?;
                }
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ∨ ")?;
                    }
                    write!(f, "({})", alternative)?;
                }
            }
            ConstraintKind::Unsatisfiable => f.write_str("false")?,
        }
        write!(f, " [{}]", self.reason)
    }
}

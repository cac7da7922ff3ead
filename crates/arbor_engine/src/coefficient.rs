//! Coefficients of potential functions: exact rationals, or solver unknowns still to be
//! determined.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

/// A coefficient the solver has to find a value for.
///
/// Two unknowns are the same variable exactly when their ids agree; the `negated` flag says that
/// the coefficient stands for the negation of that variable.
#[derive(Clone, Debug)]
pub struct Unknown {
    pub id: u64,
    pub name: Arc<str>,
    pub negated: bool,
    pub maybe_negative: bool,
}

impl Unknown {
    /// The lookup form, with the negation stripped.
    pub fn canonical(&self) -> Unknown {
        Unknown {
            negated: false,
            ..self.clone()
        }
    }
}

impl PartialEq for Unknown {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.negated == other.negated
    }
}

impl Eq for Unknown {}

impl PartialOrd for Unknown {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Unknown {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.negated).cmp(&(other.id, other.negated))
    }
}

impl Hash for Unknown {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.negated.hash(state);
    }
}

impl fmt::Display for Unknown {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negated {
            f.write_str("-")?;
        }
        f.write_str(&self.name)
    }
}

/// Values found by the solver, keyed by canonical unknowns.
pub type Solution = BTreeMap<Unknown, BigRational>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Coefficient {
    Known(BigRational),
    Unknown(Unknown),
}

impl Coefficient {
    pub fn zero() -> Self {
        Coefficient::Known(BigRational::zero())
    }

    pub fn one() -> Self {
        Coefficient::Known(BigRational::one())
    }

    pub fn from_integer(value: i64) -> Self {
        Coefficient::Known(BigRational::from_integer(BigInt::from(value)))
    }

    pub fn is_known_zero(&self) -> bool {
        matches!(self, Coefficient::Known(value) if value.is_zero())
    }

    pub fn known(&self) -> Option<&BigRational> {
        match self {
            Coefficient::Known(value) => Some(value),
            Coefficient::Unknown(_) => None,
        }
    }

    pub fn unknown(&self) -> Option<&Unknown> {
        match self {
            Coefficient::Known(_) => None,
            Coefficient::Unknown(unknown) => Some(unknown),
        }
    }

    pub fn negate(&self) -> Coefficient {
        match self {
            Coefficient::Known(value) => Coefficient::Known(-value),
            Coefficient::Unknown(unknown) => Coefficient::Unknown(Unknown {
                negated: !unknown.negated,
                ..unknown.clone()
            }),
        }
    }

    /// Strips the negation of an unknown; known values are left alone.
    pub fn canonical(&self) -> Coefficient {
        match self {
            Coefficient::Known(_) => self.clone(),
            Coefficient::Unknown(unknown) => Coefficient::Unknown(unknown.canonical()),
        }
    }

    /// Replaces every occurrence of the variable `target`, respecting negation.
    pub fn replace(&self, target: &Unknown, with: &Coefficient) -> Coefficient {
        match self {
            Coefficient::Unknown(unknown) if unknown.id == target.id => {
                if unknown.negated == target.negated {
                    with.clone()
                } else {
                    with.negate()
                }
            }
            _ => self.clone(),
        }
    }

    /// Unknowns missing from the solution stay unknown.
    pub fn substitute(&self, solution: &Solution) -> Coefficient {
        match self {
            Coefficient::Known(_) => self.clone(),
            Coefficient::Unknown(unknown) => match solution.get(&unknown.canonical()) {
                Some(value) if unknown.negated => Coefficient::Known(-value),
                Some(value) => Coefficient::Known(value.clone()),
                None => self.clone(),
            },
        }
    }
}

impl From<BigRational> for Coefficient {
    fn from(value: BigRational) -> Self {
        Coefficient::Known(value)
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Coefficient::Known(value) if value.is_negative() => write!(f, "({})", value),
            Coefficient::Known(value) => write!(f, "{}", value),
            Coefficient::Unknown(unknown) => write!(f, "{}", unknown),
        }
    }
}

/// Source of fresh unknowns. Clones share one counter, so unknowns made by different provers
/// never collide.
#[derive(Clone, Debug, Default)]
pub struct UnknownGen {
    next: Arc<AtomicU64>,
}

impl UnknownGen {
    pub fn new() -> Self {
        UnknownGen::default()
    }

    fn make(&self, prefix: &str, maybe_negative: bool) -> Coefficient {
        let id = self.next.fetch_add(1, atomic::Ordering::Relaxed);
        Coefficient::Unknown(Unknown {
            id,
            name: format!("{}_{}", prefix, id).into(),
            negated: false,
            maybe_negative,
        })
    }

    pub fn fresh(&self, prefix: &str) -> Coefficient {
        self.make(prefix, false)
    }

    pub fn fresh_maybe_negative(&self, prefix: &str) -> Coefficient {
        self.make(prefix, true)
    }
}

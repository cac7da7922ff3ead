//! Amortised resource analysis of tree-manipulating programs: derivations in a potential-based
//! type system, their linear constraints, and the solver that discharges them.

/// Aborts on a broken internal invariant.
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("bug: {}", format_args!($($arg)*))
    };
}

pub mod annotation;
pub mod coefficient;
pub mod constraint;
pub mod fixed;
pub mod heuristic;
pub mod obligation;
pub mod program;
pub mod proof;
pub mod prover;
pub mod rules;
pub mod scheduler;
pub mod solver;
pub mod tactic;

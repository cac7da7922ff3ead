//! Hand-written derivations. A tactic names the rule for each obligation and may hand parts of
//! the derivation back to automatic proving.
//!
//! ```json
//! { "apply": { "rule": "match", "name": "top", "next": [
//!     { "auto": { "auto": true } },
//!     { "fix": { "to": { "ranks": [1] }, "next": "hole" } }
//! ] } }
//! ```

use arbor_common::config::ProverOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, io};

use crate::fixed::{FixError, FixedAnnotation};
use crate::obligation::ObligationId;
use crate::prover::{ProveError, Prover};
use crate::rules::Rule;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tactic {
    Apply {
        rule: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        next: Vec<Tactic>,
    },
    Fix {
        #[serde(default)]
        from: Option<FixedAnnotation>,
        #[serde(default)]
        to: Option<FixedAnnotation>,
        next: Box<Tactic>,
    },
    Auto {
        #[serde(default)]
        weaken: bool,
        #[serde(default = "default_tree_cf")]
        tree_cf: bool,
        #[serde(default)]
        auto: bool,
    },
    Hole,
}

fn default_tree_cf() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum TacticError {
    #[error("({rule}) has {actual} continuations, but the tactic gives {expected}")]
    BranchMismatch {
        rule: Rule,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Prove(#[from] ProveError),
    #[error(transparent)]
    Fix(#[from] FixError),
    #[error("could not read tactic {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed tactic {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn parse(src: &str, path: &Path) -> Result<Tactic, TacticError> {
    serde_json::from_str(src).map_err(|source| TacticError::Parse {
        path: path.to_owned(),
        source,
    })
}

pub fn load(path: &Path) -> Result<Tactic, TacticError> {
    let src = fs::read_to_string(path).map_err(|source| TacticError::Read {
        path: path.to_owned(),
        source,
    })?;
    parse(&src, path)
}

/// Builds the derivation of `id` as `tactic` prescribes.
pub fn follow(prover: &mut Prover, tactic: &Tactic, id: ObligationId) -> Result<(), TacticError> {
    match tactic {
        Tactic::Apply { rule, name, next } => {
            // Names refer to the derivation with costs. The same tactic may also be followed for
            // cost-free derivations of the function, which leave them alone.
            if let Some(name) = name {
                if prover.proof()[id].cost {
                    prover.record(name, id)?;
                }
            }
            let rule =
                Rule::from_name(rule).ok_or_else(|| ProveError::UnknownRule(rule.clone()))?;
            let current = if rule == Rule::WVar {
                id
            } else {
                prover.weaken_variables(id)
            };
            let results = prover.apply(current, rule);

            // The cost-free side derivations of (let:tree:cf) follow its two continuations and
            // are not part of the tactic.
            let main = if rule == Rule::LetTreeCf {
                results.len().min(2)
            } else {
                results.len()
            };
            let (continued, sides) = results.split_at(main);
            if continued.len() != next.len() {
                return Err(TacticError::BranchMismatch {
                    rule,
                    expected: next.len(),
                    actual: continued.len(),
                });
            }
            for &side in sides {
                prover.prove(side);
            }
            for (&result, tactic) in continued.iter().zip(next) {
                follow(prover, tactic, result)?;
            }
            Ok(())
        }

        Tactic::Fix { from, to, next } => {
            let obligation = &prover.proof()[id];
            let mut constraints = Vec::new();
            if let Some(from) = from {
                let context = obligation.context.reorder_lexicographically();
                let fixed = from.to_annotation("fixed Q", context.size())?;
                constraints.extend(context.annotation.equate(&fixed, "(fix) context"));
            }
            if let Some(to) = to {
                let fixed = to.to_annotation("fixed Q'", obligation.result.size())?;
                constraints.extend(obligation.result.equate(&fixed, "(fix) result"));
            }
            prover.add_external_constraints(constraints);
            follow(prover, next, id)
        }

        Tactic::Auto {
            weaken,
            tree_cf,
            auto,
        } => {
            let saved = prover.options();
            prover.set_options(ProverOptions {
                weaken_before_terminal: *weaken,
                tree_cf: *tree_cf,
                auto: *auto,
                ..saved
            });
            prover.prove(id);
            prover.set_options(saved);
            Ok(())
        }

        Tactic::Hole => {
            tracing::warn!(
                prover = prover.name(),
                "hole left in derivation at {}",
                prover.proof()[id]
            );
            Ok(())
        }
    }
}

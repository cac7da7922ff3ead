//! The syntax-directed rules of the type system. Each rule turns one obligation into
//! sub-obligations plus the linear constraints that relate their annotations.

use arbor_common::data::typed_ast::{self as typed, FuncId, Ident};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::annotation::{CombinedFunctionAnnotation, Index};
use crate::coefficient::UnknownGen;
use crate::constraint::Constraint;
use crate::heuristic::SmartRange;
use crate::obligation::Obligation;

mod app;
mod cmp;
mod ite;
mod leaf;
mod let_gen;
mod let_tree;
mod match_tree;
mod node;
mod share;
mod tick;
mod var;
mod weaken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
    Var,
    Leaf,
    Node,
    App,
    Ite,
    Match,
    LetTree,
    LetTreeCf,
    LetGen,
    Share,
    Tick,
    Cmp,
    W,
    WVar,
}

static RULES_BY_NAME: Lazy<BTreeMap<&'static str, Rule>> =
    Lazy::new(|| Rule::ALL.iter().map(|&rule| (rule.name(), rule)).collect());

impl Rule {
    pub const ALL: [Rule; 14] = [
        Rule::Var,
        Rule::Leaf,
        Rule::Node,
        Rule::App,
        Rule::Ite,
        Rule::Match,
        Rule::LetTree,
        Rule::LetTreeCf,
        Rule::LetGen,
        Rule::Share,
        Rule::Tick,
        Rule::Cmp,
        Rule::W,
        Rule::WVar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rule::Var => "var",
            Rule::Leaf => "leaf",
            Rule::Node => "node",
            Rule::App => "app",
            Rule::Ite => "ite",
            Rule::Match => "match",
            Rule::LetTree => "let:tree",
            Rule::LetTreeCf => "let:tree:cf",
            Rule::LetGen => "let:gen",
            Rule::Share => "share",
            Rule::Tick => "tick",
            Rule::Cmp => "cmp",
            Rule::W => "w",
            Rule::WVar => "w:var",
        }
    }

    pub fn from_name(name: &str) -> Option<Rule> {
        RULES_BY_NAME.get(name).copied()
    }

    pub fn apply(self, obligation: &Obligation, globals: &Globals) -> ApplicationResult {
        match self {
            Rule::Var => var::apply(obligation),
            Rule::Leaf => leaf::apply(obligation),
            Rule::Node => node::apply(obligation),
            Rule::App => app::apply(obligation, globals),
            Rule::Ite => ite::apply(obligation),
            Rule::Match => match_tree::apply(obligation, globals),
            Rule::LetTree => let_tree::apply(obligation, globals, false),
            Rule::LetTreeCf => let_tree::apply(obligation, globals, true),
            Rule::LetGen => let_gen::apply(obligation, globals),
            Rule::Share => share::apply(obligation, globals),
            Rule::Tick => tick::apply(obligation, globals),
            Rule::Cmp => cmp::apply(obligation),
            Rule::W => weaken::apply(obligation, globals),
            Rule::WVar => weaken::apply_var(obligation, globals),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What every rule application may consult.
#[derive(Clone, Copy)]
pub struct Globals<'a> {
    /// Annotations of every function that may be called: solved ones for earlier components,
    /// unknown stubs for the component being proved.
    pub signatures: &'a BTreeMap<FuncId, CombinedFunctionAnnotation>,
    pub heuristic: &'a SmartRange,
    pub unknowns: &'a UnknownGen,
}

#[derive(Clone, Debug, Default)]
pub struct ApplicationResult {
    pub obligations: Vec<Obligation>,
    /// One list per obligation, in the same order.
    pub constraints: Vec<Vec<Constraint>>,
    /// Constraints relating several obligations.
    pub general: Vec<Constraint>,
}

impl ApplicationResult {
    /// An application which closes its obligation.
    pub fn closed(general: Vec<Constraint>) -> Self {
        ApplicationResult {
            obligations: Vec::new(),
            constraints: Vec::new(),
            general,
        }
    }

    pub fn single(obligation: Obligation, constraints: Vec<Constraint>) -> Self {
        ApplicationResult {
            obligations: vec![obligation],
            constraints: vec![constraints],
            general: Vec::new(),
        }
    }
}

/// `q_(0̄,c) = q'_(c)` for a result that is not a tree: only constant potential survives, and
/// whatever the context holds on its trees is given up.
fn base_result(obligation: &Obligation, rule: Rule) -> Vec<Constraint> {
    let q = &obligation.context.annotation;
    let result = &obligation.result;
    if result.size() != 0 {
        bug!("({}) result {} of a base value is over trees", rule, result);
    }
    let mut offsets: BTreeSet<_> = result.indices().map(Index::offset).collect();
    offsets.insert(2);
    offsets
        .into_iter()
        .map(|c| {
            Constraint::eq(
                q.coefficient_or_zero(&Index::constant(q.size(), c)),
                result.coefficient_or_zero(&Index::constant(0, c)),
                format!("({}) q_(0,{}) = q'_({})", rule, c, c),
            )
        })
        .collect()
}

/// The split of a let's context into the variables of the bound value (Γ) and the rest (Δ),
/// both in context order.
struct LetSplit {
    gamma: Vec<Ident>,
    gamma_positions: Vec<usize>,
    delta: Vec<Ident>,
    delta_positions: Vec<usize>,
}

fn split_let(
    obligation: &Obligation,
    binder: &Ident,
    value: &typed::Expr,
    body: &typed::Expr,
    rule: Rule,
) -> LetSplit {
    let value_free = value.free_trees();
    let mut body_free = body.free_trees();
    body_free.remove(binder);

    let mut split = LetSplit {
        gamma: Vec::new(),
        gamma_positions: Vec::new(),
        delta: Vec::new(),
        delta_positions: Vec::new(),
    };
    for (pos, id) in obligation.context.ids.iter().enumerate() {
        if value_free.contains(id) {
            split.gamma.push(id.clone());
            split.gamma_positions.push(pos);
        } else {
            split.delta.push(id.clone());
            split.delta_positions.push(pos);
        }
    }

    if split.gamma.len() != value_free.len() {
        bug!("({}) bound value uses variables missing from {}", rule, obligation);
    }
    let delta: BTreeSet<_> = split.delta.iter().collect();
    if let Some(missing) = body_free.iter().find(|id| !delta.contains(id)) {
        bug!(
            "({}) body uses '{}', which is not available to it in {}",
            rule,
            missing,
            obligation
        );
    }
    if let Some(shared) = value_free.intersection(&body_free).next() {
        bug!("({}) '{}' is used by both value and body", rule, shared);
    }
    split
}

#[cfg(test)]
mod test;

use arbor_common::data::typed_ast as typed;
use std::collections::BTreeMap;

use super::ApplicationResult;
use crate::annotation::Index;
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// `⊢ leaf : Q'` with `rk(leaf) = 1` and `|leaf| = 1`, so `q'_(a,b)` contributes
/// `log₂(a + b)` and the rank contributes 1 = log₂ 2.
pub(super) fn apply(obligation: &Obligation) -> ApplicationResult {
    if !matches!(obligation.expr.kind, typed::ExprKind::Leaf) {
        bug!("(leaf) applied to {}", obligation.expr);
    }
    if obligation.context.size() != 0 {
        bug!("(leaf) needs an empty context: {}", obligation);
    }
    let q = &obligation.context.annotation;
    let result = &obligation.result;
    if result.size() != 1 {
        bug!("(leaf) result annotation {} is not over one tree", result);
    }

    // Offsets below 2 carry no potential.
    let mut summands: BTreeMap<u32, Vec<_>> = q
        .indices()
        .map(|index| index.offset())
        .filter(|&c| c >= 2)
        .map(|c| (c, Vec::new()))
        .collect();
    summands.entry(2).or_default().push(result.rank(0).clone());
    for (index, coefficient) in result.coefficients() {
        let c = index.param(0) + index.offset();
        if c >= 2 {
            summands.entry(c).or_default().push(coefficient.clone());
        }
    }

    let constraints = summands
        .into_iter()
        .map(|(c, summands)| {
            Constraint::sum(
                q.coefficient_or_zero(&Index::constant(0, c)),
                summands,
                format!("(leaf) q_({}) = Σ_(a+b={}) q'_(a,b)", c, c),
            )
        })
        .collect();
    ApplicationResult::closed(constraints)
}

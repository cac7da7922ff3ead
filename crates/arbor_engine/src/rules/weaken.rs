use super::{ApplicationResult, Globals};
use crate::annotation::{AnnotatingContext, Annotation};
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// Structural weakening: continue with less potential before and more potential after.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let q = &obligation.context.annotation;
    let q_result = &obligation.result;
    let p = globals
        .heuristic
        .generate_like(&format!("{}w", q.name), q, globals.unknowns);
    let p_result = globals
        .heuristic
        .generate_like(&format!("{}w", q_result.name), q_result, globals.unknowns);

    let mut constraints = Vec::new();
    let mut at_most = |smaller: &Annotation, larger: &Annotation, what: &str| {
        for (small, large) in smaller.ranks().iter().zip(larger.ranks()) {
            constraints.push(Constraint::le(
                small.clone(),
                large.clone(),
                format!("(w) {} rank", what),
            ));
        }
        for index in smaller.union_indices(larger) {
            constraints.push(Constraint::le(
                smaller.coefficient_or_zero(&index),
                larger.coefficient_or_zero(&index),
                format!("(w) {} {}", what, index),
            ));
        }
    };
    at_most(&p, q, "p ≤ q");
    at_most(q_result, &p_result, "q' ≤ p'");

    ApplicationResult::single(
        obligation.keep_cost(
            AnnotatingContext::new(obligation.context.ids.clone(), p),
            obligation.expr.clone(),
            p_result,
        ),
        constraints,
    )
}

/// Drops the first variable of the context the expression does not use, together with all
/// potential that depends on it.
pub(super) fn apply_var(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let context = &obligation.context;
    let free = obligation.expr.free_trees();
    let Some(dropped) = context.ids.iter().position(|id| !free.contains(id)) else {
        bug!("(w:var) nothing to drop in {}", obligation);
    };
    let kept: Vec<_> = (0..context.size()).filter(|&pos| pos != dropped).collect();
    let q = &context.annotation;

    let mut r = Annotation::fresh(
        kept.len(),
        format!("{}\\{}", q.name, context.ids[dropped]),
        globals.unknowns,
    );
    let mut constraints = Vec::new();
    for (i, &pos) in kept.iter().enumerate() {
        constraints.push(Constraint::eq(
            r.rank(i).clone(),
            q.rank(pos).clone(),
            "(w:var) r_i = q_i",
        ));
    }
    for (index, coefficient) in q.coefficients() {
        if index.param(dropped) != 0 {
            continue;
        }
        let target = r.define(index.project(&kept), globals.unknowns);
        constraints.push(Constraint::eq(
            target,
            coefficient.clone(),
            format!("(w:var) r = q{}", index),
        ));
    }

    let ids = kept.iter().map(|&pos| context.ids[pos].clone()).collect();
    ApplicationResult::single(
        obligation.keep_result(AnnotatingContext::new(ids, r), obligation.expr.clone()),
        constraints,
    )
}

use arbor_common::data::typed_ast as typed;

use super::{ApplicationResult, Globals};
use crate::annotation::{AnnotatingContext, Annotation, Index};
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// `Γ, x | Q ⊢ share x as (x1, x2) in e : Q'`, splitting every factor of `x` between the copies.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let typed::ExprKind::Share(shared, (copy1, copy2), body) = &obligation.expr.kind else {
        bug!("(share) applied to {}", obligation.expr);
    };
    let context = &obligation.context;
    let q = &context.annotation;
    let x = context.expect_position(&shared.name);
    let gamma: Vec<_> = (0..context.size()).filter(|&pos| pos != x).collect();
    let n = gamma.len();

    let mut ids: Vec<_> = gamma.iter().map(|&pos| context.ids[pos].clone()).collect();
    ids.push(copy1.clone());
    ids.push(copy2.clone());
    let mut p = Annotation::fresh(n + 2, format!("P({})", shared.name), globals.unknowns);

    let mut constraints = vec![Constraint::sum(
        q.rank(x).clone(),
        vec![p.rank(n).clone(), p.rank(n + 1).clone()],
        "(share) q_x = p_x1 + p_x2",
    )];
    for (i, &pos) in gamma.iter().enumerate() {
        constraints.push(Constraint::eq(
            p.rank(i).clone(),
            q.rank(pos).clone(),
            "(share) p_i = q_i",
        ));
    }
    for (index, coefficient) in q.coefficients() {
        let a = index.param(x);
        let rest = index.project(&gamma);
        let summands = (0..=a)
            .map(|a1| {
                let mut params = rest.params().to_vec();
                params.extend([a1, a - a1]);
                p.define(Index::new(params, index.offset()), globals.unknowns)
            })
            .collect();
        constraints.push(Constraint::sum(
            coefficient.clone(),
            summands,
            format!("(share) q{} = Σ_(a1+a2={}) p_(a,a1,a2,c)", index, a),
        ));
    }

    ApplicationResult::single(
        obligation.keep_result(AnnotatingContext::new(ids, p), (**body).clone()),
        constraints,
    )
}

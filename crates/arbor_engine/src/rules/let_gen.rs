use arbor_common::data::typed_ast as typed;

use super::{split_let, ApplicationResult, Globals, Rule};
use crate::annotation::{AnnotatingContext, Annotation, Index};
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// `Γ, Δ | Q ⊢ let x = e1 in e2 : Q'` where `x` is not a tree.
///
/// The value is typed under `Γ | P` with an empty result, the body under `Δ | R`. Potential over
/// Γ alone goes to P, potential over Δ alone goes to R, and the unit constant is split between
/// the two.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let typed::ExprKind::Let(binder, value, body) = &obligation.expr.kind else {
        bug!("(let:gen) applied to {}", obligation.expr);
    };
    if binder.is_tree() {
        bug!("(let:gen) cannot bind the tree '{}'", binder.name);
    }
    let split = split_let(obligation, &binder.name, value, body, Rule::LetGen);
    let q = &obligation.context.annotation;

    let mut p = Annotation::fresh(
        split.gamma.len(),
        format!("P({})", binder.name),
        globals.unknowns,
    );
    let mut r = Annotation::fresh(
        split.delta.len(),
        format!("R({})", binder.name),
        globals.unknowns,
    );
    let mut p_constraints = Vec::new();
    let mut r_constraints = Vec::new();

    for (i, &pos) in split.gamma_positions.iter().enumerate() {
        p_constraints.push(Constraint::eq(
            p.rank(i).clone(),
            q.rank(pos).clone(),
            "(let:gen) p_i = q_i",
        ));
    }
    for (j, &pos) in split.delta_positions.iter().enumerate() {
        r_constraints.push(Constraint::eq(
            r.rank(j).clone(),
            q.rank(pos).clone(),
            "(let:gen) r_j = q_j",
        ));
    }

    let unit = Index::unit(q.size());
    for (index, coefficient) in q.coefficients() {
        if index == &unit {
            continue;
        }
        let on_gamma = !index.zero_on(&split.gamma_positions);
        let on_delta = !index.zero_on(&split.delta_positions);
        if on_gamma && !on_delta {
            let target = p.define(index.project(&split.gamma_positions), globals.unknowns);
            p_constraints.push(Constraint::eq(
                target,
                coefficient.clone(),
                format!("(let:gen) p_(a,c) = q{}", index),
            ));
        } else if !on_gamma {
            let target = r.define(index.project(&split.delta_positions), globals.unknowns);
            r_constraints.push(Constraint::eq(
                target,
                coefficient.clone(),
                format!("(let:gen) r_(b,c) = q{}", index),
            ));
        }
    }

    let p_unit = p.define(Index::unit(split.gamma.len()), globals.unknowns);
    let r_unit = r.define(Index::unit(split.delta.len()), globals.unknowns);
    let general = vec![Constraint::sum(
        q.coefficient_or_zero(&unit),
        vec![p_unit, r_unit],
        "(let:gen) q_unit = p_unit + r_unit",
    )];

    ApplicationResult {
        obligations: vec![
            obligation.keep_cost(
                AnnotatingContext::new(split.gamma, p),
                (**value).clone(),
                Annotation::zero(0),
            ),
            obligation.keep_result(AnnotatingContext::new(split.delta, r), (**body).clone()),
        ],
        constraints: vec![p_constraints, r_constraints],
        general,
    }
}

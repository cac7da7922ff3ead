use arbor_common::data::typed_ast as typed;
use std::collections::BTreeMap;

use super::{ApplicationResult, Globals};
use crate::annotation::{AnnotatingContext, Annotation, Index};
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// `Γ, x | Q ⊢ match x with | leaf -> e1 | node l m r -> e2 : Q'`
///
/// The leaf branch sees `x = leaf`, so the potential of `x` collapses into constants. The node
/// branch splits the potential of `x` between `l` and `r`.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let typed::ExprKind::Match(scrutinee, leaf_case, pat, node_case) = &obligation.expr.kind else {
        bug!("(match) applied to {}", obligation.expr);
    };
    let context = &obligation.context;
    let q = &context.annotation;
    let x = context.expect_position(&scrutinee.name);
    let rank_x = q.rank(x);

    let gamma_positions: Vec<_> = (0..context.size()).filter(|&pos| pos != x).collect();
    let gamma: Vec<_> = gamma_positions
        .iter()
        .map(|&pos| context.ids[pos].clone())
        .collect();
    let n = gamma.len();

    // Leaf branch, Γ | R.
    let mut r = Annotation::fresh(n, format!("R_leaf({})", scrutinee.name), globals.unknowns);
    let mut leaf_constraints = Vec::new();
    for (i, &pos) in gamma_positions.iter().enumerate() {
        leaf_constraints.push(Constraint::eq(
            r.rank(i).clone(),
            q.rank(pos).clone(),
            "(match) r_i = q_i",
        ));
    }
    let mut collapsed: BTreeMap<Index, Vec<_>> = BTreeMap::new();
    for (index, coefficient) in q.coefficients() {
        let target = index
            .project(&gamma_positions)
            .with_offset(index.param(x) + index.offset());
        collapsed
            .entry(target)
            .or_default()
            .push(coefficient.clone());
    }
    collapsed
        .entry(Index::unit(n))
        .or_default()
        .push(rank_x.clone());
    for (index, summands) in collapsed {
        let target = r.define(index.clone(), globals.unknowns);
        leaf_constraints.push(Constraint::sum(
            target,
            summands,
            format!("(match) r{} = Σ_(b+d={}) q_(a,b,d)", index, index.offset()),
        ));
    }
    let leaf_obligation = obligation.keep_result(
        AnnotatingContext::new(gamma.clone(), r),
        (**leaf_case).clone(),
    );

    // Node branch, Γ, l, r | P.
    let mut node_ids = gamma;
    node_ids.push(pat.left.clone());
    node_ids.push(pat.right.clone());
    let mut p = Annotation::fresh(
        n + 2,
        format!("P_node({})", scrutinee.name),
        globals.unknowns,
    );
    let mut node_constraints = Vec::new();
    for (i, &pos) in gamma_positions.iter().enumerate() {
        node_constraints.push(Constraint::eq(
            p.rank(i).clone(),
            q.rank(pos).clone(),
            "(match) p_i = q_i",
        ));
    }
    node_constraints.push(Constraint::eq(
        p.rank(n).clone(),
        rank_x.clone(),
        "(match) p_l = q_x",
    ));
    node_constraints.push(Constraint::eq(
        p.rank(n + 1).clone(),
        rank_x.clone(),
        "(match) p_r = q_x",
    ));
    for (index, coefficient) in q.coefficients() {
        let a = index.param(x);
        let mut params = index.project(&gamma_positions).params().to_vec();
        params.extend([a, a]);
        let target = p.define(Index::new(params, index.offset()), globals.unknowns);
        node_constraints.push(Constraint::eq(
            target,
            coefficient.clone(),
            format!("(match) p_(a,{},{},c) = q_(a,{},c)", a, a, a),
        ));
    }
    for (d, e) in [(1, 0), (0, 1)] {
        let index = Index::new(std::iter::repeat(0).take(n).chain([d, e]), 0);
        let target = p.define(index.clone(), globals.unknowns);
        node_constraints.push(Constraint::eq(
            target,
            rank_x.clone(),
            format!("(match) p{} = q_x", index),
        ));
    }
    let node_obligation = obligation.keep_result(
        AnnotatingContext::new(node_ids, p),
        (**node_case).clone(),
    );

    ApplicationResult {
        obligations: vec![leaf_obligation, node_obligation],
        constraints: vec![leaf_constraints, node_constraints],
        general: Vec::new(),
    }
}

use arbor_common::data::typed_ast as typed;
use std::collections::{BTreeMap, BTreeSet};

use super::{split_let, ApplicationResult, Globals, Rule};
use crate::annotation::{AnnotatingContext, Annotation, Index};
use crate::coefficient::Coefficient;
use crate::constraint::Constraint;
use crate::obligation::Obligation;

const D_RANGE: [u32; 2] = [0, 1];
const E_RANGE: [u32; 2] = [0, 2];

/// `Γ, Δ | Q ⊢ let x = e1 in e2 : Q'` where `x` is a tree.
///
/// The value is typed under `Γ | P` with result P', the body under `Δ, x | R`. Potential of the
/// new tree comes from P'. Without `cost_free`, potential mixing Γ and Δ is lost; with it, every
/// such coefficient is handed to cost-free derivations of the value that move it onto indices
/// mixing Δ and `x`.
pub(super) fn apply(obligation: &Obligation, globals: &Globals, cost_free: bool) -> ApplicationResult {
    let rule = if cost_free {
        Rule::LetTreeCf
    } else {
        Rule::LetTree
    };
    let typed::ExprKind::Let(binder, value, body) = &obligation.expr.kind else {
        bug!("({}) applied to {}", rule, obligation.expr);
    };
    if !binder.is_tree() {
        bug!("({}) cannot bind the base value '{}'", rule, binder.name);
    }
    let x = &binder.name;
    let split = split_let(obligation, x, value, body, rule);
    let q = &obligation.context.annotation;
    let gamma = &split.gamma_positions;
    let delta = &split.delta_positions;
    let m = split.delta.len();

    let mut p = Annotation::fresh(split.gamma.len(), format!("P({})", x), globals.unknowns);
    let p_result = globals
        .heuristic
        .generate(&format!("P'({})", x), 1, globals.unknowns);
    let mut r = Annotation::fresh(m + 1, format!("R({})", x), globals.unknowns);
    let mut p_constraints = Vec::new();
    let mut r_constraints = Vec::new();
    let mut general = Vec::new();

    for (i, &pos) in gamma.iter().enumerate() {
        p_constraints.push(Constraint::eq(
            p.rank(i).clone(),
            q.rank(pos).clone(),
            format!("({}) p_i = q_i", rule),
        ));
    }
    for (j, &pos) in delta.iter().enumerate() {
        r_constraints.push(Constraint::eq(
            r.rank(j).clone(),
            q.rank(pos).clone(),
            format!("({}) r_j = q_j", rule),
        ));
    }
    general.push(Constraint::eq(
        r.rank(m).clone(),
        p_result.rank(0).clone(),
        format!("({}) r_x = p'_*", rule),
    ));

    // Indices of R over Δ, x.
    let with_x = |index: &Index, d: u32, e: u32| {
        let mut params = index.project(delta).params().to_vec();
        params.push(d);
        Index::new(params, e)
    };

    for (index, coefficient) in q.coefficients() {
        let on_gamma = !index.zero_on(gamma);
        let on_delta = !index.zero_on(delta);
        if !on_delta && (on_gamma || index.offset() > 0) {
            let target = p.define(index.project(gamma), globals.unknowns);
            p_constraints.push(Constraint::eq(
                target,
                coefficient.clone(),
                format!("({}) p_(a,c) = q{}", rule, index),
            ));
        } else if on_delta && !on_gamma {
            let target = r.define(with_x(index, 0, index.offset()), globals.unknowns);
            general.push(Constraint::eq(
                target,
                coefficient.clone(),
                format!("({}) r_(b,0,e) = q{}", rule, index),
            ));
        }
    }

    for (index, coefficient) in p_result.coefficients() {
        let target = r.define(
            Index::new(
                std::iter::repeat(0).take(m).chain([index.param(0)]),
                index.offset(),
            ),
            globals.unknowns,
        );
        general.push(Constraint::eq(
            target,
            coefficient.clone(),
            format!("({}) r_(0,d,e) = p'{}", rule, index),
        ));
    }

    let side = if cost_free && m > 0 && !gamma.is_empty() {
        cost_free_sides(
            obligation,
            globals,
            &split.gamma,
            gamma,
            delta,
            value,
            &mut r,
            &mut general,
        )
    } else {
        Vec::new()
    };

    let mut obligations = vec![
        obligation.keep_cost(
            AnnotatingContext::new(split.gamma.clone(), p),
            (**value).clone(),
            p_result,
        ),
        {
            let mut ids = split.delta.clone();
            ids.push(x.clone());
            obligation.keep_result(AnnotatingContext::new(ids, r), (**body).clone())
        },
    ];
    let mut constraints = vec![p_constraints, r_constraints];
    for (side_obligation, side_constraints) in side {
        obligations.push(side_obligation);
        constraints.push(side_constraints);
    }

    ApplicationResult {
        obligations,
        constraints,
        general,
    }
}

struct Side {
    context: Annotation,
    result: Annotation,
    constraints: Vec<Constraint>,
}

impl Side {
    /// Both annotations start with zero ranks and no coefficients.
    fn new(bde: &Index, gamma_size: usize) -> Self {
        Side {
            context: Annotation::new(
                format!("P{}", bde),
                vec![Coefficient::zero(); gamma_size],
                BTreeMap::new(),
            ),
            result: Annotation::new(format!("P'{}", bde), vec![Coefficient::zero()], BTreeMap::new()),
            constraints: Vec::new(),
        }
    }
}

/// Builds cost-free derivations `Γ | P^bde ⊢ e1 : P'^bde` for the indices `(b, d, e)` of R whose
/// Δ part `b` agrees with some coefficient of Q mixing Γ and Δ.
#[allow(clippy::too_many_arguments)]
fn cost_free_sides(
    obligation: &Obligation,
    globals: &Globals,
    gamma_ids: &[typed::Ident],
    gamma: &[usize],
    delta: &[usize],
    value: &typed::Expr,
    r: &mut Annotation,
    general: &mut Vec<Constraint>,
) -> Vec<(Obligation, Vec<Constraint>)> {
    let q = &obligation.context.annotation;
    let x = r.size() - 1;

    let bdes: BTreeSet<Index> = q
        .indices()
        .filter(|index| !index.zero_on(delta))
        .flat_map(|index| {
            let b = index.project(delta).params().to_vec();
            D_RANGE.into_iter().flat_map(move |d| {
                let b = b.clone();
                E_RANGE.into_iter().map(move |e| {
                    let mut params = b.clone();
                    params.push(d);
                    Index::new(params, e)
                })
            })
        })
        .collect();

    let mut sides: BTreeMap<Index, Side> = BTreeMap::new();

    // Coefficients mixing Γ and Δ are distributed over the derivations agreeing on Δ.
    for (index, coefficient) in q.coefficients() {
        if index.zero_on(delta) || index.zero_on(gamma) {
            continue;
        }
        let b = index.project(delta);
        let a = index.project(gamma);
        let mut summands = Vec::new();
        for bde in bdes
            .iter()
            .filter(|bde| bde.params()[..delta.len()] == b.params()[..])
        {
            let side = sides
                .entry(bde.clone())
                .or_insert_with(|| Side::new(bde, gamma.len()));
            summands.push(side.context.define(a.clone(), globals.unknowns));
        }
        general.push(Constraint::sum(
            coefficient.clone(),
            summands,
            format!("(let:tree:cf) q{} = Σ_(d,e) p^(b,d,e)_(a,c)", index),
        ));
    }

    for bde in &bdes {
        let d = bde.param(x);
        let e = bde.offset();
        let Some(side) = sides.get_mut(bde) else {
            continue;
        };
        if d == 0 && e == 0 {
            continue;
        }
        let moved = side.result.define(Index::new([d], e), globals.unknowns);
        side.constraints.push(Constraint::eq(
            r.define(bde.clone(), globals.unknowns),
            moved.clone(),
            format!("(let:tree:cf) r{} = p'^bde_({},{})", bde, d, e),
        ));
        let entries: Vec<_> = side.context.coefficients().map(|(_, c)| c.clone()).collect();
        for entry in entries {
            side.constraints.push(Constraint::or(
                vec![
                    Constraint::eq(entry.clone(), Coefficient::zero(), "p^bde = 0"),
                    Constraint::le(moved.clone(), entry, "p'^bde ≤ p^bde"),
                ],
                format!("(let:tree:cf) p^{} = 0 or p'^{}_({},{}) ≤ p^{}", bde, bde, d, e, bde),
            ));
        }
    }

    sides
        .into_values()
        .map(|side| {
            (
                Obligation::cost_free(
                    AnnotatingContext::new(gamma_ids.to_vec(), side.context),
                    value.clone(),
                    side.result,
                )
                .with_coin(obligation.coin),
                side.constraints,
            )
        })
        .collect()
}

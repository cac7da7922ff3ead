use arbor_common::data::typed_ast as typed;
use std::collections::BTreeSet;

use super::{ApplicationResult, Globals};
use crate::annotation::{FunctionAnnotation, Index};
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// Charges the call to the callee's annotations: in cost mode its cost annotation plus all
/// cost-free companions, in cost-free mode only the companions.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let typed::ExprKind::Call(func, args) = &obligation.expr.kind else {
        bug!("(app) applied to {}", obligation.expr);
    };
    let signature = globals
        .signatures
        .get(&func.id)
        .unwrap_or_else(|| bug!("(app) no annotation for '{}'", func.name));

    let context = &obligation.context;
    let tree_args: Vec<_> = args.iter().filter(|arg| arg.is_tree()).collect();
    if context.size() != tree_args.len() {
        bug!(
            "(app) context does not match the {} tree arguments: {}",
            tree_args.len(),
            obligation
        );
    }
    // Context position of each tree parameter of the callee.
    let positions: Vec<_> = tree_args
        .iter()
        .map(|arg| context.expect_position(&arg.name))
        .collect();

    let summands: Vec<&FunctionAnnotation> = if obligation.cost {
        std::iter::once(&signature.with_cost)
            .chain(&signature.cost_free)
            .collect()
    } else if signature.cost_free.is_empty() {
        vec![&signature.with_cost]
    } else {
        signature.cost_free.iter().collect()
    };
    for summand in &summands {
        if summand.from.size() != positions.len() {
            bug!(
                "(app) annotation {} of '{}' does not fit {} tree arguments",
                summand.from,
                func.name,
                positions.len()
            );
        }
    }

    let to_context = |index: &Index| {
        let mut params = vec![0; positions.len()];
        for (param, &pos) in positions.iter().enumerate() {
            params[pos] = index.param(param);
        }
        Index::new(params, index.offset())
    };
    let to_callee = |index: &Index| index.project(&positions);

    let mut general = Vec::new();
    for (param, &pos) in positions.iter().enumerate() {
        general.push(Constraint::sum(
            context.annotation.rank(pos).clone(),
            summands.iter().map(|s| s.from.rank(param).clone()).collect(),
            format!("(app) q_{} = Σ p_{} for '{}'", pos, param, func.name),
        ));
    }
    let mut from_indices: BTreeSet<Index> = summands
        .iter()
        .flat_map(|s| s.from.indices())
        .map(to_context)
        .collect();
    from_indices.extend(context.annotation.indices().cloned());
    for index in from_indices {
        let callee_index = to_callee(&index);
        general.push(Constraint::sum(
            context.annotation.coefficient_or_zero(&index),
            summands
                .iter()
                .map(|s| s.from.coefficient_or_zero(&callee_index))
                .collect(),
            format!("(app) q{} = Σ p{} for '{}'", index, callee_index, func.name),
        ));
    }

    let result = &obligation.result;
    for summand in &summands {
        if summand.to.size() != result.size() {
            bug!(
                "(app) result annotation {} of '{}' does not fit {}",
                summand.to,
                func.name,
                result
            );
        }
    }
    for param in 0..result.size() {
        general.push(Constraint::sum(
            result.rank(param).clone(),
            summands.iter().map(|s| s.to.rank(param).clone()).collect(),
            format!("(app) q'_* = Σ p'_* for '{}'", func.name),
        ));
    }
    let mut to_indices: BTreeSet<Index> = summands
        .iter()
        .flat_map(|s| s.to.indices().cloned())
        .collect();
    to_indices.extend(result.indices().cloned());
    for index in to_indices {
        general.push(Constraint::sum(
            result.coefficient_or_zero(&index),
            summands
                .iter()
                .map(|s| s.to.coefficient_or_zero(&index))
                .collect(),
            format!("(app) q'{} = Σ p'{} for '{}'", index, index, func.name),
        ));
    }

    ApplicationResult::closed(general)
}

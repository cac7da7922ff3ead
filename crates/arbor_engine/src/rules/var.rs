use arbor_common::data::typed_ast as typed;

use super::{base_result, ApplicationResult, Rule};
use crate::obligation::Obligation;

pub(super) fn apply(obligation: &Obligation) -> ApplicationResult {
    match &obligation.expr.kind {
        typed::ExprKind::Var(_) | typed::ExprKind::Coin | typed::ExprKind::BoolLit(_) => {}
        _ => bug!("(var) applied to {}", obligation.expr),
    }

    if !obligation.expr.ty.is_tree() {
        if obligation.context.size() != 0 {
            bug!("(var) needs an empty context for a base value: {}", obligation);
        }
        return ApplicationResult::closed(base_result(obligation, Rule::Var));
    }

    if obligation.context.size() != 1 {
        bug!("(var) needs exactly one variable in context: {}", obligation);
    }
    ApplicationResult::closed(
        obligation
            .context
            .annotation
            .equate(&obligation.result, "(var) q = q'"),
    )
}

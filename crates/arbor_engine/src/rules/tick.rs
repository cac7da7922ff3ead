use arbor_common::data::typed_ast as typed;

use super::{ApplicationResult, Globals};
use crate::annotation::AnnotatingContext;
use crate::obligation::Obligation;

/// `Γ | Q ⊢ ~c e : Q'` pays `c` from the unit coefficient, unless costs are not counted.
pub(super) fn apply(obligation: &Obligation, globals: &Globals) -> ApplicationResult {
    let typed::ExprKind::Tick(cost, body) = &obligation.expr.kind else {
        bug!("(tick) applied to {}", obligation.expr);
    };
    if !obligation.cost {
        return ApplicationResult::single(
            obligation.keep_result(obligation.context.clone(), (**body).clone()),
            Vec::new(),
        );
    }

    let q = &obligation.context.annotation;
    let rest = globals
        .heuristic
        .generate_like(&format!("{}~", q.name), q, globals.unknowns);
    let constraints = q.increment(&rest, cost, "(tick)");
    ApplicationResult::single(
        obligation.keep_result(
            AnnotatingContext::new(obligation.context.ids.clone(), rest),
            (**body).clone(),
        ),
        constraints,
    )
}

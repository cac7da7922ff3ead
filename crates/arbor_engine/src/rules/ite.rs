use arbor_common::data::typed_ast as typed;

use super::ApplicationResult;
use crate::obligation::Obligation;

/// Both branches get the whole context and annotation.
pub(super) fn apply(obligation: &Obligation) -> ApplicationResult {
    let typed::ExprKind::Ite(cond, then_case, else_case) = &obligation.expr.kind else {
        bug!("(ite) applied to {}", obligation.expr);
    };
    let coin = obligation.coin || matches!(cond.kind, typed::ExprKind::Coin);

    let branch = |expr: &typed::Expr| {
        obligation
            .keep_result(obligation.context.clone(), expr.clone())
            .with_coin(coin)
    };
    ApplicationResult {
        obligations: vec![branch(then_case), branch(else_case)],
        constraints: vec![Vec::new(), Vec::new()],
        general: Vec::new(),
    }
}

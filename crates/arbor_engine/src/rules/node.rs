use arbor_common::data::typed_ast as typed;

use super::ApplicationResult;
use crate::annotation::Index;
use crate::constraint::Constraint;
use crate::obligation::Obligation;

/// `l, r | Q ⊢ node l m r : Q'`
pub(super) fn apply(obligation: &Obligation) -> ApplicationResult {
    let typed::ExprKind::Node(left, _, right) = &obligation.expr.kind else {
        bug!("(node) applied to {}", obligation.expr);
    };
    if left.name == right.name {
        bug!("(node) needs distinct subtrees, share first: {}", obligation.expr);
    }
    let context = &obligation.context;
    if context.size() != 2 {
        bug!("(node) needs exactly the two subtrees in context: {}", obligation);
    }
    let l = context.expect_position(&left.name);
    let r = context.expect_position(&right.name);
    let q = &context.annotation;
    let result = &obligation.result;
    let rank = result.rank(0);

    let at = |a_left: u32, a_right: u32, offset: u32| {
        let mut params = [0; 2];
        params[l] = a_left;
        params[r] = a_right;
        Index::new(params, offset)
    };

    let mut constraints = vec![
        Constraint::eq(context.rank_of(&left.name).clone(), rank.clone(), "(node) q_l = q'_*"),
        Constraint::eq(context.rank_of(&right.name).clone(), rank.clone(), "(node) q_r = q'_*"),
        Constraint::eq(
            q.coefficient_or_zero(&at(1, 0, 0)),
            rank.clone(),
            "(node) q_(1,0,0) = q'_*",
        ),
        Constraint::eq(
            q.coefficient_or_zero(&at(0, 1, 0)),
            rank.clone(),
            "(node) q_(0,1,0) = q'_*",
        ),
    ];
    for (index, coefficient) in result.coefficients() {
        let (a, b) = (index.param(0), index.offset());
        constraints.push(Constraint::eq(
            q.coefficient_or_zero(&at(a, a, b)),
            coefficient.clone(),
            format!("(node) q_({},{},{}) = q'_({},{})", a, a, b, a, b),
        ));
    }
    ApplicationResult::closed(constraints)
}

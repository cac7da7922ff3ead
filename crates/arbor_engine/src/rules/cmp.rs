use arbor_common::data::typed_ast as typed;

use super::{base_result, ApplicationResult, Rule};
use crate::obligation::Obligation;

/// Comparisons give up the potential of the compared trees and keep the constant part.
pub(super) fn apply(obligation: &Obligation) -> ApplicationResult {
    if !matches!(obligation.expr.kind, typed::ExprKind::Cmp(..)) {
        bug!("(cmp) applied to {}", obligation.expr);
    }
    ApplicationResult::closed(base_result(obligation, Rule::Cmp))
}

use arbor_common::data::typed_ast as typed;
use id_collections::id_type;
use std::fmt;

use crate::annotation::{AnnotatingContext, Annotation};

#[id_type]
pub struct ObligationId(pub usize);

/// `Γ | Q ⊢ e : Q'`, to be discharged by a derivation.
///
/// `cost` is false inside cost-free derivations, where ticks are ignored. `coin` marks
/// obligations below a branch on a coin flip.
#[derive(Clone, Debug)]
pub struct Obligation {
    pub context: AnnotatingContext,
    pub expr: typed::Expr,
    pub result: Annotation,
    pub cost: bool,
    pub coin: bool,
}

impl Obligation {
    pub fn new(context: AnnotatingContext, expr: typed::Expr, result: Annotation) -> Self {
        Obligation {
            context,
            expr,
            result,
            cost: true,
            coin: false,
        }
    }

    pub fn cost_free(context: AnnotatingContext, expr: typed::Expr, result: Annotation) -> Self {
        Obligation {
            cost: false,
            ..Obligation::new(context, expr, result)
        }
    }

    /// A new obligation in the same cost and coin mode.
    pub fn keep_cost(
        &self,
        context: AnnotatingContext,
        expr: typed::Expr,
        result: Annotation,
    ) -> Obligation {
        Obligation {
            context,
            expr,
            result,
            cost: self.cost,
            coin: self.coin,
        }
    }

    /// A new obligation with the same result annotation, cost and coin mode.
    pub fn keep_result(&self, context: AnnotatingContext, expr: typed::Expr) -> Obligation {
        self.keep_cost(context, expr, self.result.clone())
    }

    pub fn with_coin(self, coin: bool) -> Obligation {
        Obligation { coin, ..self }
    }
}

impl fmt::Display for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ⊢ {} : {}", self.context, self.expr, self.result)?;
        if !self.cost {
            f.write_str(" (cost-free)")?;
        }
        if self.coin {
            f.write_str(" (coin)")?;
        }
        Ok(())
    }
}

//! Resolved programs in A-normal form: every call, node and comparison takes plain identifiers,
//! and every binder within a function is unique.

use id_collections::{id_type, IdVec};
use num_rational::BigRational;
use std::fmt;

pub use crate::data::raw_ast::CmpOp;

#[id_type]
pub struct FuncId(pub usize);

/// A local identifier, unique among the binders of its function.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(pub String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Ident(name.into())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Program {
    /// Module name, i.e. the stem of the source file.
    pub module: String,
    pub funcs: IdVec<FuncId, FuncDef>,
}

#[derive(Clone, Debug)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<Ident>,
    pub body: Expr,
    pub span: (usize, usize),
}

#[derive(Clone, Debug)]
pub enum Expr {
    Var(Ident),
    Leaf,
    Coin,
    BoolLit(bool),
    Node(Ident, Ident, Ident),
    Call(FuncId, Vec<Ident>),
    Cmp(CmpOp, Ident, Ident),
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
    Match(Ident, Box<Expr>, (Ident, Ident, Ident), Box<Expr>),
    Let(Ident, Box<Expr>, Box<Expr>),
    Tick(BigRational, Box<Expr>),

    Span(usize, usize, Box<Expr>),
}

impl Expr {
    /// Functions called anywhere inside this expression.
    pub fn callees(&self, out: &mut Vec<FuncId>) {
        match self {
            Expr::Var(_) | Expr::Leaf | Expr::Coin | Expr::BoolLit(_) => {}
            Expr::Node(..) | Expr::Cmp(..) => {}
            Expr::Call(func, _) => out.push(*func),
            Expr::Ite(cond, then_case, else_case) => {
                cond.callees(out);
                then_case.callees(out);
                else_case.callees(out);
            }
            Expr::Match(_, leaf_case, _, node_case) => {
                leaf_case.callees(out);
                node_case.callees(out);
            }
            Expr::Let(_, value, body) => {
                value.callees(out);
                body.callees(out);
            }
            Expr::Tick(_, body) | Expr::Span(_, _, body) => body.callees(out),
        }
    }
}

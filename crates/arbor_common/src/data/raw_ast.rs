use num_rational::BigRational;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncName(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarName(pub String);

#[derive(Clone, Debug)]
pub struct Program(pub Vec<FuncDef>);

#[derive(Clone, Debug)]
pub struct FuncDef {
    pub name: FuncName,
    pub params: Vec<VarName>,
    pub body: Expr,
    pub span: (usize, usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NotEq,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
        })
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    // A bare name may be a local variable or a nullary function; resolution decides which.
    Name(VarName),
    App(FuncName, Vec<Expr>),
    Leaf,
    Coin,
    BoolLit(bool),
    Node(Box<Expr>, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    // Scrutinee, leaf arm, node pattern (left, middle, right), node arm.
    Match(
        Box<Expr>,
        Box<Expr>,
        (VarName, VarName, VarName),
        Box<Expr>,
    ),
    Let(VarName, Box<Expr>, Box<Expr>),
    Tick(BigRational, Box<Expr>),

    Span(usize, usize, Box<Expr>),
}

//! Typed, A-normal, unshared programs: the input of resource analysis.

use id_collections::{id_type, Count, IdVec};
use num_rational::BigRational;
use std::collections::BTreeSet;
use std::fmt;

pub use crate::data::anf_ast::{CmpOp, FuncId, Ident};

#[id_type]
pub struct TypeParamId(pub usize);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Param(TypeParamId),
    Bool,
    Tree(Box<Type>),
}

impl Type {
    pub fn is_tree(&self) -> bool {
        matches!(self, Type::Tree(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Param(param) => write!(f, "'{}", param.0),
            Type::Bool => f.write_str("Bool"),
            Type::Tree(item) => write!(f, "Tree {}", item),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypeScheme {
    pub num_params: Count<TypeParamId>,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// An identifier together with its type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    pub name: Ident,
    pub ty: Type,
}

impl Atom {
    pub fn is_tree(&self) -> bool {
        self.ty.is_tree()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncRef {
    pub id: FuncId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePattern {
    pub left: Ident,
    pub middle: Atom,
    pub right: Ident,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
    Var(Ident),
    Leaf,
    Coin,
    BoolLit(bool),
    Node(Atom, Atom, Atom),
    Call(FuncRef, Vec<Atom>),
    Cmp(CmpOp, Atom, Atom),
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
    Match(Atom, Box<Expr>, NodePattern, Box<Expr>),
    Let(Atom, Box<Expr>, Box<Expr>),
    // `share x as (x1, x2) in e`; both copies have the type of `x`.
    Share(Atom, (Ident, Ident), Box<Expr>),
    Tick(BigRational, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Expr { kind, ty }
    }

    /// Identifiers, leaves, nodes, calls and comparisons.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            ExprKind::Var(_)
            | ExprKind::Leaf
            | ExprKind::Coin
            | ExprKind::BoolLit(_)
            | ExprKind::Node(..)
            | ExprKind::Call(..)
            | ExprKind::Cmp(..) => true,
            ExprKind::Ite(..)
            | ExprKind::Match(..)
            | ExprKind::Let(..)
            | ExprKind::Share(..)
            | ExprKind::Tick(..) => false,
        }
    }

    /// Free identifiers of tree type. Only these can carry potential.
    pub fn free_trees(&self) -> BTreeSet<Ident> {
        let mut free = BTreeSet::new();
        self.collect_free_trees(&mut free);
        free
    }

    fn collect_free_trees(&self, free: &mut BTreeSet<Ident>) {
        fn atoms<'a>(free: &mut BTreeSet<Ident>, atoms: impl IntoIterator<Item = &'a Atom>) {
            free.extend(
                atoms
                    .into_iter()
                    .filter(|atom| atom.is_tree())
                    .map(|atom| atom.name.clone()),
            );
        }

        fn scoped(free: &mut BTreeSet<Ident>, body: &Expr, bound: &[&Ident]) {
            let mut inner = body.free_trees();
            for name in bound {
                inner.remove(*name);
            }
            free.extend(inner);
        }

        match &self.kind {
            ExprKind::Var(name) => {
                if self.ty.is_tree() {
                    free.insert(name.clone());
                }
            }
            ExprKind::Leaf | ExprKind::Coin | ExprKind::BoolLit(_) => {}
            ExprKind::Node(left, middle, right) => atoms(free, [left, middle, right]),
            ExprKind::Call(_, args) => atoms(free, args),
            ExprKind::Cmp(_, lhs, rhs) => atoms(free, [lhs, rhs]),
            ExprKind::Ite(cond, then_case, else_case) => {
                cond.collect_free_trees(free);
                then_case.collect_free_trees(free);
                else_case.collect_free_trees(free);
            }
            ExprKind::Match(scrutinee, leaf_case, pat, node_case) => {
                atoms(free, [scrutinee]);
                leaf_case.collect_free_trees(free);
                scoped(free, node_case, &[&pat.left, &pat.right]);
            }
            ExprKind::Let(binder, value, body) => {
                value.collect_free_trees(free);
                scoped(free, body, &[&binder.name]);
            }
            ExprKind::Share(shared, (copy1, copy2), body) => {
                atoms(free, [shared]);
                scoped(free, body, &[copy1, copy2]);
            }
            ExprKind::Tick(_, body) => body.collect_free_trees(free),
        }
    }

    /// Functions called anywhere in this expression.
    pub fn callees(&self) -> BTreeSet<FuncId> {
        let mut callees = BTreeSet::new();
        self.collect_callees(&mut callees);
        callees
    }

    fn collect_callees(&self, callees: &mut BTreeSet<FuncId>) {
        match &self.kind {
            ExprKind::Call(func, _) => {
                callees.insert(func.id);
            }
            ExprKind::Var(_)
            | ExprKind::Leaf
            | ExprKind::Coin
            | ExprKind::BoolLit(_)
            | ExprKind::Node(..)
            | ExprKind::Cmp(..) => {}
            ExprKind::Ite(cond, then_case, else_case) => {
                cond.collect_callees(callees);
                then_case.collect_callees(callees);
                else_case.collect_callees(callees);
            }
            ExprKind::Match(_, leaf_case, _, node_case) => {
                leaf_case.collect_callees(callees);
                node_case.collect_callees(callees);
            }
            ExprKind::Let(_, value, body) => {
                value.collect_callees(callees);
                body.collect_callees(callees);
            }
            ExprKind::Share(_, _, body) | ExprKind::Tick(_, body) => body.collect_callees(callees),
        }
    }

    /// Replaces free occurrences of `from` by `to`. Binders are unique within a function, so no
    /// capture can happen.
    pub fn rename(&self, from: &Ident, to: &Ident) -> Expr {
        let ident = |name: &Ident| {
            if name == from {
                to.clone()
            } else {
                name.clone()
            }
        };
        let atom = |atom: &Atom| Atom {
            name: ident(&atom.name),
            ty: atom.ty.clone(),
        };
        let boxed = |expr: &Expr| Box::new(expr.rename(from, to));

        let kind = match &self.kind {
            ExprKind::Var(name) => ExprKind::Var(ident(name)),
            ExprKind::Leaf => ExprKind::Leaf,
            ExprKind::Coin => ExprKind::Coin,
            ExprKind::BoolLit(value) => ExprKind::BoolLit(*value),
            ExprKind::Node(left, middle, right) => {
                ExprKind::Node(atom(left), atom(middle), atom(right))
            }
            ExprKind::Call(func, args) => {
                ExprKind::Call(func.clone(), args.iter().map(atom).collect())
            }
            ExprKind::Cmp(op, lhs, rhs) => ExprKind::Cmp(*op, atom(lhs), atom(rhs)),
            ExprKind::Ite(cond, then_case, else_case) => {
                ExprKind::Ite(boxed(cond), boxed(then_case), boxed(else_case))
            }
            ExprKind::Match(scrutinee, leaf_case, pat, node_case) => ExprKind::Match(
                atom(scrutinee),
                boxed(leaf_case),
                pat.clone(),
                boxed(node_case),
            ),
            ExprKind::Let(binder, value, body) => {
                ExprKind::Let(binder.clone(), boxed(value), boxed(body))
            }
            ExprKind::Share(shared, copies, body) => {
                ExprKind::Share(atom(shared), copies.clone(), boxed(body))
            }
            ExprKind::Tick(cost, body) => ExprKind::Tick(cost.clone(), boxed(body)),
        };
        Expr::new(kind, self.ty.clone())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ExprKind::Var(name) => write!(f, "{}", name),
            ExprKind::Leaf => f.write_str("leaf"),
            ExprKind::Coin => f.write_str("coin"),
            ExprKind::BoolLit(value) => write!(f, "{}", value),
            ExprKind::Node(left, middle, right) => {
                write!(f, "node {} {} {}", left.name, middle.name, right.name)
            }
            ExprKind::Call(func, args) => {
                f.write_str(&func.name)?;
                for arg in args {
                    write!(f, " {}", arg.name)?;
                }
                Ok(())
            }
            ExprKind::Cmp(op, lhs, rhs) => write!(f, "{} {} {}", lhs.name, op, rhs.name),
            ExprKind::Ite(cond, then_case, else_case) => {
                write!(f, "if {} then {} else {}", cond, then_case, else_case)
            }
            ExprKind::Match(scrutinee, leaf_case, pat, node_case) => write!(
                f,
                "match {} with | leaf -> {} | node {} {} {} -> {}",
                scrutinee.name, leaf_case, pat.left, pat.middle.name, pat.right, node_case
            ),
            ExprKind::Let(binder, value, body) => {
                write!(f, "let {} = {} in {}", binder.name, value, body)
            }
            ExprKind::Share(shared, (copy1, copy2), body) => write!(
                f,
                "share {} as ({}, {}) in {}",
                shared.name, copy1, copy2, body
            ),
            ExprKind::Tick(cost, body) => write!(f, "~{} {}", cost, body),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<Atom>,
    pub scheme: TypeScheme,
    pub body: Expr,
}

impl FuncDef {
    /// Parameters which carry potential, in declaration order.
    pub fn tree_params(&self) -> impl Iterator<Item = &Atom> {
        self.params.iter().filter(|param| param.is_tree())
    }

    pub fn returns_tree(&self) -> bool {
        self.body.ty.is_tree()
    }
}

#[id_type]
pub struct SccId(pub usize);

#[derive(Clone, Debug)]
pub struct Scc {
    pub funcs: Vec<FuncId>,
    /// Strongly connected components this one calls into. They always precede it.
    pub deps: BTreeSet<SccId>,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub module: String,
    pub funcs: IdVec<FuncId, FuncDef>,
    /// The condensation of the call graph, callees first.
    pub sccs: IdVec<SccId, Scc>,
}

impl Program {
    /// `module.function`
    pub fn qualified_name(&self, func: FuncId) -> String {
        format!("{}.{}", self.module, self.funcs[func].name)
    }

    /// Functions some function of the program calls, including recursive calls.
    pub fn called(&self) -> BTreeSet<FuncId> {
        self.funcs
            .values()
            .flat_map(|def| def.body.callees())
            .collect()
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        let name = name
            .strip_prefix(&self.module)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name);
        self.funcs
            .iter()
            .find(|(_, def)| def.name == name)
            .map(|(id, _)| id)
    }
}

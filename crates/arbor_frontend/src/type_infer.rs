use arbor_common::data::anf_ast as anf;
use arbor_common::data::typed_ast as typed;
use arbor_common::file_cache::FileCache;
use arbor_common::lines;
use arbor_common::report_error::{locate_path, locate_span, Locate, Reportable};
use id_collections::{id_type, Count, IdVec};
use id_graph_sccs::Sccs;
use num_rational::BigRational;
use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;

#[id_type]
struct TypeVar(usize);

#[derive(Clone, Copy, Debug)]
enum RawErrorKind {
    Recursive,
    Mismatch { expected: TypeVar, actual: TypeVar },
}

type RawError = Locate<RawErrorKind>;

#[derive(Clone, Debug)]
pub enum ErrorKind {
    Recursive,
    Mismatch { expected: String, actual: String },
}

#[derive(Clone, Debug)]
pub struct Error(Locate<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0.error
    }
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write, files: &FileCache) -> io::Result<()> {
        self.0.report_with(dest, files, |err| match err {
            ErrorKind::Recursive => (
                "Cyclic Type",
                lines![
                    "I couldn't infer a type for this expression.",
                    "",
                    "Any type it could have would need to contain itself, like a tree whose \
                     elements are trees of the same type.",
                ]
                .to_owned(),
            ),
            ErrorKind::Mismatch { expected, actual } => (
                "Type Mismatch",
                format!(
                    lines![
                        "I expected to find an expression here with a type like:",
                        "",
                        "    {}",
                        "",
                        "Instead, this expression has a type like:",
                        "",
                        "    {}",
                    ],
                    expected, actual
                ),
            ),
        })
    }

    fn exit_status(&self) -> i32 {
        1
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Assign {
    Unknown,
    Equal(TypeVar),
    Param(typed::TypeParamId),
    Bool,
    Tree(TypeVar),
}

#[derive(Clone, Copy, Debug)]
enum UnifyError {
    Recursive,
    Mismatch,
}

#[derive(Clone, Debug)]
struct Context {
    // A variable whose cell is already borrowed further up the stack is being unified with a type
    // that mentions it. That is the occurs check failing, which is a user error and not a bug.
    vars: IdVec<TypeVar, RefCell<Assign>>,
}

impl Context {
    fn new() -> Self {
        Context { vars: IdVec::new() }
    }

    fn new_var(&mut self, assign: Assign) -> TypeVar {
        self.vars.push(RefCell::new(assign))
    }

    fn obtain(&self, var: TypeVar) -> Result<RefMut<Assign>, UnifyError> {
        self.vars[var]
            .try_borrow_mut()
            .map_err(|_| UnifyError::Recursive)
    }

    fn follow(&self, var: TypeVar) -> Result<TypeVar, UnifyError> {
        let mut assign = self.obtain(var)?;
        if let Assign::Equal(curr_dest) = assign.deref_mut() {
            *curr_dest = self.follow(*curr_dest)?;
            Ok(*curr_dest)
        } else {
            Ok(var)
        }
    }

    fn unify_rec(&self, root_var1: TypeVar, root_var2: TypeVar) -> Result<(), UnifyError> {
        let var1 = self.follow(root_var1)?;
        let var2 = self.follow(root_var2)?;

        if var1 == var2 {
            return Ok(());
        }

        let mut assign1 = self.obtain(var1)?;
        let mut assign2 = self.obtain(var2)?;

        match (assign1.deref(), assign2.deref()) {
            (Assign::Equal(_), _) | (_, Assign::Equal(_)) => unreachable!(),

            (Assign::Unknown, _) => {
                *assign1 = Assign::Equal(var2);
                return Ok(());
            }

            (_, Assign::Unknown) => {
                *assign2 = Assign::Equal(var1);
                return Ok(());
            }

            (Assign::Param(param1), Assign::Param(param2)) if param1 == param2 => {}

            (Assign::Bool, Assign::Bool) => {}

            (Assign::Tree(item1), Assign::Tree(item2)) => self.unify_rec(*item1, *item2)?,

            _ => return Err(UnifyError::Mismatch),
        }

        *assign1 = Assign::Equal(var2);
        Ok(())
    }

    fn unify(&mut self, expected: TypeVar, actual: TypeVar) -> Result<(), RawError> {
        self.unify_rec(expected, actual).map_err(|err| match err {
            UnifyError::Recursive => RawErrorKind::Recursive.into(),
            UnifyError::Mismatch => RawErrorKind::Mismatch { expected, actual }.into(),
        })
    }

    fn tree_of(&mut self, item: TypeVar) -> TypeVar {
        self.new_var(Assign::Tree(item))
    }

    fn fresh_tree(&mut self) -> TypeVar {
        let item = self.new_var(Assign::Unknown);
        self.tree_of(item)
    }

    fn render(&self, root_var: TypeVar) -> String {
        let Ok(var) = self.follow(root_var) else {
            return "...".to_owned();
        };
        let Ok(assign) = self.obtain(var) else {
            return "...".to_owned();
        };
        match assign.deref() {
            Assign::Unknown => "_".to_owned(),
            Assign::Equal(_) => unreachable!(),
            Assign::Param(param) => format!("'{}", param.0),
            Assign::Bool => "Bool".to_owned(),
            Assign::Tree(item) => {
                let item = self.render(*item);
                if item.contains(' ') {
                    format!("Tree ({})", item)
                } else {
                    format!("Tree {}", item)
                }
            }
        }
    }
}

/// Generalisation state for one function: every unconstrained variable becomes a parameter.
struct Extractor<'a> {
    ctx: &'a Context,
    params: BTreeMap<TypeVar, typed::TypeParamId>,
    num_params: Count<typed::TypeParamId>,
}

impl<'a> Extractor<'a> {
    fn new(ctx: &'a Context) -> Self {
        Extractor {
            ctx,
            params: BTreeMap::new(),
            num_params: Count::new(),
        }
    }

    fn extract(&mut self, root_var: TypeVar) -> Result<typed::Type, RawError> {
        let ctx = self.ctx;
        let var = ctx.follow(root_var).map_err(|_| RawErrorKind::Recursive)?;
        // Held across the recursive call, so a cyclic type fails to borrow instead of looping.
        let assign = ctx.obtain(var).map_err(|_| RawErrorKind::Recursive)?;
        Ok(match assign.deref() {
            Assign::Unknown => {
                let num_params = &mut self.num_params;
                typed::Type::Param(*self.params.entry(var).or_insert_with(|| num_params.inc()))
            }
            Assign::Equal(_) => unreachable!(),
            &Assign::Param(param) => typed::Type::Param(param),
            Assign::Bool => typed::Type::Bool,
            &Assign::Tree(item) => typed::Type::Tree(Box::new(self.extract(item)?)),
        })
    }
}

#[derive(Clone, Debug)]
struct Annot {
    kind: AnnotKind,
    ty: TypeVar,
}

#[derive(Clone, Debug)]
enum AnnotKind {
    Var(anf::Ident),
    Leaf,
    Coin,
    BoolLit(bool),
    Node(anf::Ident, anf::Ident, anf::Ident),
    Call(anf::FuncId, Vec<anf::Ident>),
    Cmp(anf::CmpOp, anf::Ident, anf::Ident),
    Ite(Box<Annot>, Box<Annot>, Box<Annot>),
    Match(
        anf::Ident,
        Box<Annot>,
        (anf::Ident, anf::Ident, anf::Ident),
        Box<Annot>,
    ),
    Let(anf::Ident, Box<Annot>, Box<Annot>),
    Tick(BigRational, Box<Annot>),
}

/// The monomorphic signature of a function while its strongly connected component is inferred.
#[derive(Clone, Debug)]
struct Signature {
    params: Vec<TypeVar>,
    ret: TypeVar,
}

fn instantiate(
    ctx: &mut Context,
    vars: &mut BTreeMap<typed::TypeParamId, TypeVar>,
    ty: &typed::Type,
) -> TypeVar {
    match ty {
        typed::Type::Param(param) => *vars
            .entry(*param)
            .or_insert_with(|| ctx.new_var(Assign::Unknown)),
        typed::Type::Bool => ctx.new_var(Assign::Bool),
        typed::Type::Tree(item) => {
            let item = instantiate(ctx, vars, item);
            ctx.tree_of(item)
        }
    }
}

fn instantiate_scheme(ctx: &mut Context, scheme: &typed::TypeScheme) -> Signature {
    let mut vars = BTreeMap::new();
    let params = scheme
        .params
        .iter()
        .map(|param| instantiate(ctx, &mut vars, param))
        .collect();
    let ret = instantiate(ctx, &mut vars, &scheme.ret);
    Signature { params, ret }
}

struct Inferrer<'a> {
    ctx: &'a mut Context,
    // Solved schemes of earlier components.
    schemes: &'a BTreeMap<anf::FuncId, typed::TypeScheme>,
    // Signatures of the component under inference.
    current: &'a BTreeMap<anf::FuncId, Signature>,
    // Binders are unique within a function, so one flat map suffices.
    locals: BTreeMap<anf::Ident, TypeVar>,
}

impl<'a> Inferrer<'a> {
    fn local(&self, name: &anf::Ident) -> TypeVar {
        match self.locals.get(name) {
            Some(&var) => var,
            None => bug!("local '{}' is used before it is bound", name),
        }
    }

    fn expr(&mut self, expr: &anf::Expr) -> Result<Annot, RawError> {
        let (kind, ty) = match expr {
            anf::Expr::Span(lo, hi, inner) => {
                return self.expr(inner).map_err(locate_span(*lo, *hi));
            }

            anf::Expr::Var(name) => (AnnotKind::Var(name.clone()), self.local(name)),

            anf::Expr::Leaf => (AnnotKind::Leaf, self.ctx.fresh_tree()),

            anf::Expr::Coin => (AnnotKind::Coin, self.ctx.new_var(Assign::Bool)),

            anf::Expr::BoolLit(val) => (AnnotKind::BoolLit(*val), self.ctx.new_var(Assign::Bool)),

            anf::Expr::Node(left, middle, right) => {
                let item = self.local(middle);
                let tree = self.ctx.tree_of(item);
                self.ctx.unify(tree, self.local(left))?;
                self.ctx.unify(tree, self.local(right))?;
                (
                    AnnotKind::Node(left.clone(), middle.clone(), right.clone()),
                    tree,
                )
            }

            anf::Expr::Call(func, args) => {
                let sig = match self.current.get(func) {
                    Some(sig) => sig.clone(),
                    None => instantiate_scheme(self.ctx, &self.schemes[func]),
                };
                debug_assert_eq!(sig.params.len(), args.len());
                for (&param, arg) in sig.params.iter().zip(args) {
                    self.ctx.unify(param, self.local(arg))?;
                }
                (AnnotKind::Call(*func, args.clone()), sig.ret)
            }

            anf::Expr::Cmp(op, lhs, rhs) => {
                self.ctx.unify(self.local(lhs), self.local(rhs))?;
                (
                    AnnotKind::Cmp(*op, lhs.clone(), rhs.clone()),
                    self.ctx.new_var(Assign::Bool),
                )
            }

            anf::Expr::Ite(cond, then_case, else_case) => {
                let cond = self.expr(cond)?;
                let bool_var = self.ctx.new_var(Assign::Bool);
                self.ctx.unify(bool_var, cond.ty)?;
                let then_case = self.expr(then_case)?;
                let else_case = self.expr(else_case)?;
                self.ctx.unify(then_case.ty, else_case.ty)?;
                let ty = then_case.ty;
                (
                    AnnotKind::Ite(Box::new(cond), Box::new(then_case), Box::new(else_case)),
                    ty,
                )
            }

            anf::Expr::Match(scrutinee, leaf_case, (left, middle, right), node_case) => {
                let item = self.ctx.new_var(Assign::Unknown);
                let tree = self.ctx.tree_of(item);
                self.ctx.unify(tree, self.local(scrutinee))?;
                self.locals.insert(left.clone(), tree);
                self.locals.insert(middle.clone(), item);
                self.locals.insert(right.clone(), tree);
                let leaf_case = self.expr(leaf_case)?;
                let node_case = self.expr(node_case)?;
                self.ctx.unify(leaf_case.ty, node_case.ty)?;
                let ty = leaf_case.ty;
                (
                    AnnotKind::Match(
                        scrutinee.clone(),
                        Box::new(leaf_case),
                        (left.clone(), middle.clone(), right.clone()),
                        Box::new(node_case),
                    ),
                    ty,
                )
            }

            anf::Expr::Let(name, value, body) => {
                let value = self.expr(value)?;
                self.locals.insert(name.clone(), value.ty);
                let body = self.expr(body)?;
                let ty = body.ty;
                (
                    AnnotKind::Let(name.clone(), Box::new(value), Box::new(body)),
                    ty,
                )
            }

            anf::Expr::Tick(cost, body) => {
                let body = self.expr(body)?;
                let ty = body.ty;
                (AnnotKind::Tick(cost.clone(), Box::new(body)), ty)
            }
        };
        Ok(Annot { kind, ty })
    }
}

struct Solution<'a, 'b> {
    extractor: Extractor<'a>,
    locals: &'b BTreeMap<anf::Ident, TypeVar>,
    funcs: &'b IdVec<anf::FuncId, anf::FuncDef>,
}

impl<'a, 'b> Solution<'a, 'b> {
    fn atom(&mut self, name: &anf::Ident) -> Result<typed::Atom, RawError> {
        Ok(typed::Atom {
            name: name.clone(),
            ty: self.extractor.extract(self.locals[name])?,
        })
    }

    fn expr(&mut self, annot: Annot) -> Result<typed::Expr, RawError> {
        let ty = self.extractor.extract(annot.ty)?;
        let kind = match annot.kind {
            AnnotKind::Var(name) => typed::ExprKind::Var(name),
            AnnotKind::Leaf => typed::ExprKind::Leaf,
            AnnotKind::Coin => typed::ExprKind::Coin,
            AnnotKind::BoolLit(val) => typed::ExprKind::BoolLit(val),
            AnnotKind::Node(left, middle, right) => typed::ExprKind::Node(
                self.atom(&left)?,
                self.atom(&middle)?,
                self.atom(&right)?,
            ),
            AnnotKind::Call(func, args) => typed::ExprKind::Call(
                typed::FuncRef {
                    id: func,
                    name: self.funcs[func].name.clone(),
                },
                args.iter()
                    .map(|arg| self.atom(arg))
                    .collect::<Result<_, _>>()?,
            ),
            AnnotKind::Cmp(op, lhs, rhs) => {
                typed::ExprKind::Cmp(op, self.atom(&lhs)?, self.atom(&rhs)?)
            }
            AnnotKind::Ite(cond, then_case, else_case) => typed::ExprKind::Ite(
                Box::new(self.expr(*cond)?),
                Box::new(self.expr(*then_case)?),
                Box::new(self.expr(*else_case)?),
            ),
            AnnotKind::Match(scrutinee, leaf_case, (left, middle, right), node_case) => {
                typed::ExprKind::Match(
                    self.atom(&scrutinee)?,
                    Box::new(self.expr(*leaf_case)?),
                    typed::NodePattern {
                        left,
                        middle: self.atom(&middle)?,
                        right,
                    },
                    Box::new(self.expr(*node_case)?),
                )
            }
            AnnotKind::Let(name, value, body) => typed::ExprKind::Let(
                self.atom(&name)?,
                Box::new(self.expr(*value)?),
                Box::new(self.expr(*body)?),
            ),
            AnnotKind::Tick(cost, body) => {
                typed::ExprKind::Tick(cost, Box::new(self.expr(*body)?))
            }
        };
        Ok(typed::Expr::new(kind, ty))
    }
}

fn func_sccs(program: &anf::Program) -> IdVec<typed::SccId, typed::Scc> {
    let sccs: Sccs<typed::SccId, anf::FuncId> =
        id_graph_sccs::find_components(program.funcs.count(), |id| {
            let mut callees = Vec::new();
            program.funcs[id].body.callees(&mut callees);
            callees.into_iter().collect::<BTreeSet<_>>()
        });

    let mut scc_of = BTreeMap::new();
    let mut result = IdVec::new();
    for (scc_id, scc) in &sccs {
        let mut deps = BTreeSet::new();
        for &func in scc.nodes {
            scc_of.insert(func, scc_id);
        }
        for &func in scc.nodes {
            let mut callees = Vec::new();
            program.funcs[func].body.callees(&mut callees);
            deps.extend(
                callees
                    .iter()
                    .filter_map(|callee| scc_of.get(callee).copied())
                    .filter(|&dep| dep != scc_id),
            );
        }
        let pushed = result.push(typed::Scc {
            funcs: scc.nodes.to_vec(),
            deps,
        });
        debug_assert_eq!(pushed, scc_id);
    }
    result
}

fn infer_scc(
    program: &anf::Program,
    schemes: &mut BTreeMap<anf::FuncId, typed::TypeScheme>,
    scc: &typed::Scc,
) -> Result<BTreeMap<anf::FuncId, typed::FuncDef>, Error> {
    let mut ctx = Context::new();

    let current: BTreeMap<_, _> = scc
        .funcs
        .iter()
        .map(|&func| {
            let params = program.funcs[func]
                .params
                .iter()
                .map(|_| ctx.new_var(Assign::Unknown))
                .collect();
            let ret = ctx.new_var(Assign::Unknown);
            (func, Signature { params, ret })
        })
        .collect();

    let mut bodies = Vec::new();
    for &func in &scc.funcs {
        let def = &program.funcs[func];
        let sig = &current[&func];
        let mut inferrer = Inferrer {
            ctx: &mut ctx,
            schemes,
            current: &current,
            locals: def.params.iter().cloned().zip(sig.params.clone()).collect(),
        };
        let inferred = match inferrer.expr(&def.body) {
            Ok(body) => inferrer.ctx.unify(sig.ret, body.ty).map(|()| body),
            Err(err) => Err(err),
        };
        let body = match inferred {
            Ok(body) => body,
            Err(err) => return Err(render_error(err, &*inferrer.ctx)),
        };
        bodies.push((func, body, inferrer.locals));
    }

    let mut defs = BTreeMap::new();
    for (func, body, locals) in bodies {
        let def = &program.funcs[func];
        let sig = &current[&func];
        let result = (|| -> Result<typed::FuncDef, RawError> {
            let mut solution = Solution {
                extractor: Extractor::new(&ctx),
                locals: &locals,
                funcs: &program.funcs,
            };
            let params = def
                .params
                .iter()
                .map(|param| solution.atom(param))
                .collect::<Result<Vec<_>, _>>()?;
            let ret = solution.extractor.extract(sig.ret)?;
            let scheme = typed::TypeScheme {
                num_params: solution.extractor.num_params.clone(),
                params: params.iter().map(|param| param.ty.clone()).collect(),
                ret,
            };
            let body = solution.expr(body)?;
            Ok(typed::FuncDef {
                name: def.name.clone(),
                params,
                scheme,
                body,
            })
        })()
        .map_err(|err| render_error(locate_span(def.span.0, def.span.1)(err), &ctx))?;

        schemes.insert(func, result.scheme.clone());
        defs.insert(func, result);
    }
    Ok(defs)
}

fn render_error(err: RawError, ctx: &Context) -> Error {
    let error = match err.error {
        RawErrorKind::Recursive => ErrorKind::Recursive,
        RawErrorKind::Mismatch { expected, actual } => ErrorKind::Mismatch {
            expected: ctx.render(expected),
            actual: ctx.render(actual),
        },
    };
    Error(Locate {
        path: err.path,
        span: err.span,
        error,
    })
}

/// Infers simple types one strongly connected component at a time, callees first, generalising
/// each component before its callers instantiate it.
pub fn type_infer(program: &anf::Program) -> Result<typed::Program, Error> {
    let sccs = func_sccs(program);

    let mut schemes = BTreeMap::new();
    let mut defs = BTreeMap::new();
    for (_, scc) in &sccs {
        defs.extend(infer_scc(program, &mut schemes, scc)?);
    }

    let funcs = IdVec::from_vec(defs.into_values().collect());
    Ok(typed::Program {
        module: program.module.clone(),
        funcs,
        sccs,
    })
}

pub fn type_infer_file(program: &anf::Program, path: &Path) -> Result<typed::Program, Error> {
    type_infer(program).map_err(|Error(err)| Error(locate_path(path)(err)))
}

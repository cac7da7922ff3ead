//! Reads and parses a source file, resolves names and puts every function body into A-normal
//! form, so that calls, nodes and comparisons only ever take identifiers.

use arbor_common::data::anf_ast as anf;
use arbor_common::data::raw_ast as raw;
use arbor_common::file_cache::FileCache;
use arbor_common::lines;
use arbor_common::report_error::{locate_path, locate_span, Locate, Reportable};
use arbor_common::util::id_gen::IdGen;
use id_collections::{id_type, IdVec};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::parse;
use crate::parse_error::{self, ParseError};

#[derive(Debug)]
pub enum ErrorKind {
    ReadFailed(PathBuf, io::Error),
    ParseFailed(ParseError),
    IllegalFileName(PathBuf),
    DuplicateFunction(String),
    DuplicateParam(String),
    DuplicatePatternVar(String),
    VarNotFound(String),
    FuncNotFound(String),
    NotAFunction(String),
    ArityMismatch {
        func: String,
        expected: usize,
        actual: usize,
    },
}

type RawError = Locate<ErrorKind>;

#[derive(Debug)]
pub struct Error(RawError);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0.error
    }
}

impl From<RawError> for Error {
    fn from(err: RawError) -> Self {
        Error(err)
    }
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write, files: &FileCache) -> io::Result<()> {
        use ErrorKind::*;

        match &self.0.error {
            ReadFailed(path, err) => {
                return writeln!(dest, "Could not read {}: {}", path.display(), err);
            }
            ParseFailed(err) => {
                return parse_error::report(dest, files, self.0.path.as_deref(), err);
            }
            _ => {}
        }

        self.0.report_with(dest, files, |kind| match kind {
            ReadFailed(..) | ParseFailed(_) => unreachable!(),
            IllegalFileName(path) => (
                "Invalid File Name",
                format!(
                    lines![
                        "The module name is taken from the file name, so it must be a valid \
                         identifier:",
                        "",
                        "    {}",
                    ],
                    path.display()
                ),
            ),
            DuplicateFunction(name) => (
                "Duplicate Function",
                format!("The function '{}' is defined more than once.", name),
            ),
            DuplicateParam(name) => (
                "Duplicate Parameter",
                format!("The parameter '{}' appears more than once.", name),
            ),
            DuplicatePatternVar(name) => (
                "Duplicate Pattern Variable",
                format!("The variable '{}' is bound twice by the same pattern.", name),
            ),
            VarNotFound(name) => (
                "Variable Not Found",
                format!("I can't find a variable or function named '{}'.", name),
            ),
            FuncNotFound(name) => (
                "Function Not Found",
                format!("I can't find a function named '{}'.", name),
            ),
            NotAFunction(name) => (
                "Not a Function",
                format!(
                    "'{}' is a local variable, so it can't be applied to arguments.",
                    name
                ),
            ),
            ArityMismatch {
                func,
                expected,
                actual,
            } => (
                "Wrong Number of Arguments",
                format!(
                    "The function '{}' takes {} argument(s), but it is given {} here.",
                    func, expected, actual
                ),
            ),
        })
    }

    fn exit_status(&self) -> i32 {
        1
    }
}

pub fn resolve_program(file_path: &Path, files: &mut FileCache) -> Result<anf::Program, Error> {
    let src = files
        .read(file_path)
        .map_err(|err| Error(ErrorKind::ReadFailed(file_path.to_owned(), err).into()))?;
    let module = module_name(file_path)
        .ok_or_else(|| ErrorKind::IllegalFileName(file_path.to_owned()).into())
        .map_err(|err: RawError| Error(locate_path(file_path)(err)))?;
    resolve_source(&module, src)
        .map_err(locate_path(file_path))
        .map_err(Error)
}

fn module_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let mut chars = stem.chars();
    let valid = chars.next()?.is_alphabetic()
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Some(stem.to_owned())
    } else {
        None
    }
}

pub fn resolve_source(module: &str, src: &str) -> Result<anf::Program, RawError> {
    let raw::Program(defs) = parse::parse(src).map_err(ErrorKind::ParseFailed)?;

    let mut func_ids = BTreeMap::new();
    let mut arities = IdVec::new();
    for def in &defs {
        let id = arities.push(def.params.len());
        if func_ids.insert(def.name.0.clone(), id).is_some() {
            return Err(locate_span(def.span.0, def.span.1)(
                ErrorKind::DuplicateFunction(def.name.0.clone()).into(),
            ));
        }
    }

    let globals = Globals {
        func_ids: &func_ids,
        arities: &arities,
    };

    let mut funcs = IdVec::new();
    for def in defs {
        let (lo, hi) = def.span;
        let func = resolve_func(&globals, def).map_err(locate_span(lo, hi))?;
        funcs.push(func);
    }

    Ok(anf::Program {
        module: module.to_owned(),
        funcs,
    })
}

struct Globals<'a> {
    func_ids: &'a BTreeMap<String, anf::FuncId>,
    arities: &'a IdVec<anf::FuncId, usize>,
}

type Scope = im_rc::OrdMap<String, anf::Ident>;

#[id_type]
struct TempId(usize);

/// Per-function naming state. Every binder gets a name unused anywhere else in the function.
struct Names {
    used: BTreeSet<String>,
    bound: BTreeSet<String>,
    temps: IdGen<TempId>,
}

impl Names {
    fn temp(&mut self) -> anf::Ident {
        loop {
            let name = format!("_z{}", self.temps.fresh().0);
            if self.used.insert(name.clone()) {
                return anf::Ident(name);
            }
        }
    }

    fn bind(&mut self, scope: &mut Scope, name: &raw::VarName) -> anf::Ident {
        let ident = if self.bound.insert(name.0.clone()) {
            anf::Ident(name.0.clone())
        } else {
            fresh_variant(&name.0, &mut self.used)
        };
        scope.insert(name.0.clone(), ident.clone());
        ident
    }
}

/// `base'`, `base''`, ... whichever is unused first.
pub(crate) fn fresh_variant(base: &str, used: &mut BTreeSet<String>) -> anf::Ident {
    let mut candidate = format!("{}'", base);
    while used.contains(&candidate) {
        candidate.push('\'');
    }
    used.insert(candidate.clone());
    anf::Ident(candidate)
}

fn collect_names(expr: &raw::Expr, used: &mut BTreeSet<String>) {
    match expr {
        raw::Expr::Name(name) => {
            used.insert(name.0.clone());
        }
        raw::Expr::App(_, args) => args.iter().for_each(|arg| collect_names(arg, used)),
        raw::Expr::Leaf | raw::Expr::Coin | raw::Expr::BoolLit(_) => {}
        raw::Expr::Node(l, m, r) | raw::Expr::If(l, m, r) => {
            collect_names(l, used);
            collect_names(m, used);
            collect_names(r, used);
        }
        raw::Expr::Cmp(_, lhs, rhs) => {
            collect_names(lhs, used);
            collect_names(rhs, used);
        }
        raw::Expr::Match(scrutinee, leaf_case, (l, m, r), node_case) => {
            used.extend([l.0.clone(), m.0.clone(), r.0.clone()]);
            collect_names(scrutinee, used);
            collect_names(leaf_case, used);
            collect_names(node_case, used);
        }
        raw::Expr::Let(name, value, body) => {
            used.insert(name.0.clone());
            collect_names(value, used);
            collect_names(body, used);
        }
        raw::Expr::Tick(_, body) | raw::Expr::Span(_, _, body) => collect_names(body, used),
    }
}

fn resolve_func(globals: &Globals, def: raw::FuncDef) -> Result<anf::FuncDef, RawError> {
    let params_set: BTreeSet<_> = def.params.iter().map(|param| param.0.clone()).collect();
    let mut names = Names {
        used: params_set.clone(),
        bound: params_set,
        temps: IdGen::new(),
    };
    collect_names(&def.body, &mut names.used);

    let mut scope = Scope::new();
    let mut params = Vec::new();
    for param in &def.params {
        if scope.contains_key(&param.0) {
            return Err(ErrorKind::DuplicateParam(param.0.clone()).into());
        }
        let ident = anf::Ident(param.0.clone());
        scope.insert(param.0.clone(), ident.clone());
        params.push(ident);
    }

    let body = Normalizer {
        globals,
        names: &mut names,
    }
    .expr(&scope, &def.body)?;

    Ok(anf::FuncDef {
        name: def.name.0,
        params,
        body,
        span: def.span,
    })
}

struct Normalizer<'a, 'b> {
    globals: &'a Globals<'a>,
    names: &'b mut Names,
}

/// Let bindings hoisted out of argument positions, in evaluation order.
type Bindings = Vec<(anf::Ident, anf::Expr)>;

fn wrap(bindings: Bindings, body: anf::Expr) -> anf::Expr {
    bindings
        .into_iter()
        .rev()
        .fold(body, |body, (name, value)| {
            anf::Expr::Let(name, Box::new(value), Box::new(body))
        })
}

fn strip_spans(expr: &anf::Expr) -> &anf::Expr {
    match expr {
        anf::Expr::Span(_, _, inner) => strip_spans(inner),
        _ => expr,
    }
}

impl<'a, 'b> Normalizer<'a, 'b> {
    fn call(&self, name: &str, args: Vec<anf::Ident>) -> Result<anf::Expr, RawError> {
        let id = *self
            .globals
            .func_ids
            .get(name)
            .ok_or_else(|| ErrorKind::FuncNotFound(name.to_owned()))?;
        let expected = self.globals.arities[id];
        if expected != args.len() {
            return Err(ErrorKind::ArityMismatch {
                func: name.to_owned(),
                expected,
                actual: args.len(),
            }
            .into());
        }
        Ok(anf::Expr::Call(id, args))
    }

    /// Normalises `expr` and names its value, reusing the name if it already is a local.
    fn atom(
        &mut self,
        scope: &Scope,
        expr: &raw::Expr,
        bindings: &mut Bindings,
    ) -> Result<anf::Ident, RawError> {
        let value = self.expr(scope, expr)?;
        if let anf::Expr::Var(name) = strip_spans(&value) {
            return Ok(name.clone());
        }
        let temp = self.names.temp();
        bindings.push((temp.clone(), value));
        Ok(temp)
    }

    fn expr(&mut self, scope: &Scope, expr: &raw::Expr) -> Result<anf::Expr, RawError> {
        Ok(match expr {
            raw::Expr::Span(lo, hi, inner) => anf::Expr::Span(
                *lo,
                *hi,
                Box::new(self.expr(scope, inner).map_err(locate_span(*lo, *hi))?),
            ),

            raw::Expr::Name(name) => match scope.get(&name.0) {
                Some(ident) => anf::Expr::Var(ident.clone()),
                None if self.globals.func_ids.contains_key(&name.0) => {
                    self.call(&name.0, Vec::new())?
                }
                None => return Err(ErrorKind::VarNotFound(name.0.clone()).into()),
            },

            raw::Expr::App(func, args) => {
                if scope.contains_key(&func.0) {
                    return Err(ErrorKind::NotAFunction(func.0.clone()).into());
                }
                let mut bindings = Vec::new();
                let args = args
                    .iter()
                    .map(|arg| self.atom(scope, arg, &mut bindings))
                    .collect::<Result<_, _>>()?;
                wrap(bindings, self.call(&func.0, args)?)
            }

            raw::Expr::Leaf => anf::Expr::Leaf,
            raw::Expr::Coin => anf::Expr::Coin,
            raw::Expr::BoolLit(val) => anf::Expr::BoolLit(*val),

            raw::Expr::Node(left, middle, right) => {
                let mut bindings = Vec::new();
                let left = self.atom(scope, left, &mut bindings)?;
                let middle = self.atom(scope, middle, &mut bindings)?;
                let right = self.atom(scope, right, &mut bindings)?;
                wrap(bindings, anf::Expr::Node(left, middle, right))
            }

            raw::Expr::Cmp(op, lhs, rhs) => {
                let mut bindings = Vec::new();
                let lhs = self.atom(scope, lhs, &mut bindings)?;
                let rhs = self.atom(scope, rhs, &mut bindings)?;
                wrap(bindings, anf::Expr::Cmp(*op, lhs, rhs))
            }

            raw::Expr::If(cond, then_case, else_case) => {
                let cond = self.expr(scope, cond)?;
                let then_case = self.expr(scope, then_case)?;
                let else_case = self.expr(scope, else_case)?;
                match strip_spans(&cond) {
                    anf::Expr::Var(_)
                    | anf::Expr::Cmp(..)
                    | anf::Expr::Coin
                    | anf::Expr::BoolLit(_) => anf::Expr::Ite(
                        Box::new(cond),
                        Box::new(then_case),
                        Box::new(else_case),
                    ),
                    _ => {
                        let temp = self.names.temp();
                        anf::Expr::Let(
                            temp.clone(),
                            Box::new(cond),
                            Box::new(anf::Expr::Ite(
                                Box::new(anf::Expr::Var(temp)),
                                Box::new(then_case),
                                Box::new(else_case),
                            )),
                        )
                    }
                }
            }

            raw::Expr::Match(scrutinee, leaf_case, (left, middle, right), node_case) => {
                let mut bindings = Vec::new();
                let scrutinee = self.atom(scope, scrutinee, &mut bindings)?;
                let leaf_case = self.expr(scope, leaf_case)?;

                let mut seen = BTreeSet::new();
                for var in [left, middle, right] {
                    if !seen.insert(&var.0) {
                        return Err(ErrorKind::DuplicatePatternVar(var.0.clone()).into());
                    }
                }
                let mut node_scope = scope.clone();
                let pattern = (
                    self.names.bind(&mut node_scope, left),
                    self.names.bind(&mut node_scope, middle),
                    self.names.bind(&mut node_scope, right),
                );
                let node_case = self.expr(&node_scope, node_case)?;

                wrap(
                    bindings,
                    anf::Expr::Match(
                        scrutinee,
                        Box::new(leaf_case),
                        pattern,
                        Box::new(node_case),
                    ),
                )
            }

            raw::Expr::Let(name, value, body) => {
                let value = self.expr(scope, value)?;
                let mut body_scope = scope.clone();
                let ident = self.names.bind(&mut body_scope, name);
                let body = self.expr(&body_scope, body)?;
                anf::Expr::Let(ident, Box::new(value), Box::new(body))
            }

            raw::Expr::Tick(cost, body) => {
                anf::Expr::Tick(cost.clone(), Box::new(self.expr(scope, body)?))
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use arbor_common::lines;

    fn show(expr: &anf::Expr, program: &anf::Program) -> String {
        let show = |expr| show(expr, program);
        match expr {
            anf::Expr::Span(_, _, inner) => show(inner),
            anf::Expr::Var(x) => x.0.clone(),
            anf::Expr::Leaf => "leaf".to_owned(),
            anf::Expr::Coin => "coin".to_owned(),
            anf::Expr::BoolLit(val) => val.to_string(),
            anf::Expr::Node(l, m, r) => format!("node {} {} {}", l, m, r),
            anf::Expr::Call(f, args) => {
                let mut out = program.funcs[f].name.clone();
                for arg in args {
                    out.push(' ');
                    out.push_str(&arg.0);
                }
                out
            }
            anf::Expr::Cmp(op, a, b) => format!("{} {} {}", a, op, b),
            anf::Expr::Ite(c, t, e) => format!("if {} then {} else {}", show(c), show(t), show(e)),
            anf::Expr::Match(x, leaf, (l, m, r), node) => format!(
                "match {} with | leaf -> {} | node {} {} {} -> {}",
                x,
                show(leaf),
                l,
                m,
                r,
                show(node)
            ),
            anf::Expr::Let(x, v, b) => format!("let {} = {} in {}", x, show(v), show(b)),
            anf::Expr::Tick(c, b) => format!("~{} {}", c, show(b)),
        }
    }

    #[test]
    fn test_arguments_become_identifiers() {
        let src = lines![
            "f t = node (g t) coin leaf",
            "g t = t",
        ];
        let program = resolve_source("m", src).unwrap();
        let f = &program.funcs[anf::FuncId(0)];
        assert_eq!(
            show(&f.body, &program),
            "let _z0 = g t in let _z1 = coin in let _z2 = leaf in node _z0 _z1 _z2"
        );
    }

    #[test]
    fn test_shadowed_binders_are_renamed() {
        let src = lines![
            "f t = let t = leaf in match t with",
            "  | leaf -> t",
            "  | node t x r -> t",
        ];
        let program = resolve_source("m", src).unwrap();
        assert_eq!(
            show(&program.funcs[anf::FuncId(0)].body, &program),
            "let t' = leaf in match t' with | leaf -> t' | node t'' x r -> t''"
        );
    }

    #[test]
    fn test_nullary_functions_and_complex_conditions() {
        let src = lines!["e = leaf", "f t = if g t then e else t", "g t = t == e",];
        let program = resolve_source("m", src).unwrap();
        assert_eq!(
            show(&program.funcs[anf::FuncId(1)].body, &program),
            "let _z0 = g t in if _z0 then e else t"
        );
    }

    #[test]
    fn test_resolution_errors() {
        let kind = |src: &str| resolve_source("m", src).unwrap_err().error;
        assert!(matches!(kind("f t = u"), ErrorKind::VarNotFound(name) if name == "u"));
        assert!(matches!(kind("f t = t t"), ErrorKind::NotAFunction(_)));
        assert!(matches!(kind("f t = g t"), ErrorKind::FuncNotFound(_)));
        assert!(matches!(
            kind("f t = f t t"),
            ErrorKind::ArityMismatch {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert!(matches!(kind("f t t = t"), ErrorKind::DuplicateParam(_)));
        assert!(matches!(
            kind("f t = t\nf u = u"),
            ErrorKind::DuplicateFunction(_)
        ));
    }

    #[test]
    fn test_errors_carry_innermost_span() {
        let err = resolve_source("m", "f t = node t t u\n").unwrap_err();
        assert_eq!(err.span, Some((15, 16)));
    }
}

//! Makes every use of a tree variable linear by inserting explicit `share` nodes, so that the
//! resource rules can split a variable's potential between its two uses.

use arbor_common::data::typed_ast as typed;
use std::collections::BTreeSet;

use crate::resolve::fresh_variant;

struct Unsharer {
    used: BTreeSet<String>,
}

fn collect_binders(expr: &typed::Expr, used: &mut BTreeSet<String>) {
    match &expr.kind {
        typed::ExprKind::Var(name) => {
            used.insert(name.0.clone());
        }
        typed::ExprKind::Leaf | typed::ExprKind::Coin | typed::ExprKind::BoolLit(_) => {}
        typed::ExprKind::Node(..) | typed::ExprKind::Call(..) | typed::ExprKind::Cmp(..) => {}
        typed::ExprKind::Ite(cond, then_case, else_case) => {
            collect_binders(cond, used);
            collect_binders(then_case, used);
            collect_binders(else_case, used);
        }
        typed::ExprKind::Match(_, leaf_case, pat, node_case) => {
            used.extend([
                pat.left.0.clone(),
                pat.middle.name.0.clone(),
                pat.right.0.clone(),
            ]);
            collect_binders(leaf_case, used);
            collect_binders(node_case, used);
        }
        typed::ExprKind::Let(binder, value, body) => {
            used.insert(binder.name.0.clone());
            collect_binders(value, used);
            collect_binders(body, used);
        }
        typed::ExprKind::Share(_, (copy1, copy2), body) => {
            used.extend([copy1.0.clone(), copy2.0.clone()]);
            collect_binders(body, used);
        }
        typed::ExprKind::Tick(_, body) => collect_binders(body, used),
    }
}

fn share(shared: typed::Atom, copies: (typed::Ident, typed::Ident), body: typed::Expr) -> typed::Expr {
    let ty = body.ty.clone();
    typed::Expr::new(typed::ExprKind::Share(shared, copies, Box::new(body)), ty)
}

impl Unsharer {
    fn copies(&mut self, name: &typed::Ident) -> (typed::Ident, typed::Ident) {
        (
            fresh_variant(&name.0, &mut self.used),
            fresh_variant(&name.0, &mut self.used),
        )
    }

    /// Shares the first tree argument that occurs more than once, then looks again.
    fn call(&mut self, func: typed::FuncRef, args: Vec<typed::Atom>, ty: typed::Type) -> typed::Expr {
        let duplicate = args.iter().enumerate().find_map(|(i, arg)| {
            (arg.is_tree() && args[i + 1..].contains(arg)).then(|| arg.clone())
        });
        let Some(shared) = duplicate else {
            return typed::Expr::new(typed::ExprKind::Call(func, args), ty);
        };

        let (copy1, copy2) = self.copies(&shared.name);
        let mut seen_first = false;
        let args = args
            .into_iter()
            .map(|arg| {
                if arg != shared {
                    arg
                } else if !seen_first {
                    seen_first = true;
                    typed::Atom {
                        name: copy1.clone(),
                        ty: arg.ty,
                    }
                } else {
                    typed::Atom {
                        name: copy2.clone(),
                        ty: arg.ty,
                    }
                }
            })
            .collect();
        let inner = self.call(func, args, ty);
        share(shared, (copy1, copy2), inner)
    }

    fn expr(&mut self, expr: typed::Expr) -> typed::Expr {
        let ty = expr.ty;
        match expr.kind {
            typed::ExprKind::Node(left, middle, right) if left.is_tree() && left == right => {
                let (copy1, copy2) = self.copies(&left.name);
                let node = typed::ExprKind::Node(
                    typed::Atom {
                        name: copy1.clone(),
                        ty: left.ty.clone(),
                    },
                    middle,
                    typed::Atom {
                        name: copy2.clone(),
                        ty: right.ty,
                    },
                );
                share(left, (copy1, copy2), typed::Expr::new(node, ty))
            }

            typed::ExprKind::Call(func, args) => self.call(func, args, ty),

            typed::ExprKind::Ite(cond, then_case, else_case) => typed::Expr::new(
                typed::ExprKind::Ite(
                    cond,
                    Box::new(self.expr(*then_case)),
                    Box::new(self.expr(*else_case)),
                ),
                ty,
            ),

            typed::ExprKind::Match(scrutinee, leaf_case, pat, node_case) => {
                let leaf_case = self.expr(*leaf_case);
                let node_case = self.expr(*node_case);
                let reused = leaf_case.free_trees().contains(&scrutinee.name)
                    || node_case.free_trees().contains(&scrutinee.name);
                if !reused {
                    return typed::Expr::new(
                        typed::ExprKind::Match(
                            scrutinee,
                            Box::new(leaf_case),
                            pat,
                            Box::new(node_case),
                        ),
                        ty,
                    );
                }
                let (copy1, copy2) = self.copies(&scrutinee.name);
                let matched = typed::ExprKind::Match(
                    typed::Atom {
                        name: copy1.clone(),
                        ty: scrutinee.ty.clone(),
                    },
                    Box::new(leaf_case.rename(&scrutinee.name, &copy2)),
                    pat,
                    Box::new(node_case.rename(&scrutinee.name, &copy2)),
                );
                share(scrutinee, (copy1, copy2), typed::Expr::new(matched, ty))
            }

            typed::ExprKind::Let(binder, value, body) => {
                let mut value = self.expr(*value);
                let mut body = self.expr(*body);
                let mut body_free = body.free_trees();
                body_free.remove(&binder.name);
                let shared: Vec<_> = value
                    .free_trees()
                    .intersection(&body_free)
                    .cloned()
                    .collect();

                let mut wrappers = Vec::new();
                for name in shared {
                    let (copy1, copy2) = self.copies(&name);
                    value = value.rename(&name, &copy1);
                    body = body.rename(&name, &copy2);
                    wrappers.push((name, copy1, copy2));
                }

                let shared_ty = |name: &typed::Ident| {
                    find_tree_type(&value, name).unwrap_or_else(|| {
                        bug!("shared variable '{}' has no tree occurrence", name)
                    })
                };
                let wrappers: Vec<_> = wrappers
                    .into_iter()
                    .map(|(name, copy1, copy2)| {
                        let ty = shared_ty(&copy1);
                        (typed::Atom { name, ty }, copy1, copy2)
                    })
                    .collect();

                let mut result = typed::Expr::new(
                    typed::ExprKind::Let(binder, Box::new(value), Box::new(body)),
                    ty,
                );
                for (shared, copy1, copy2) in wrappers.into_iter().rev() {
                    result = share(shared, (copy1, copy2), result);
                }
                result
            }

            typed::ExprKind::Share(shared, copies, body) => {
                share(shared, copies, self.expr(*body))
            }

            typed::ExprKind::Tick(cost, body) => typed::Expr::new(
                typed::ExprKind::Tick(cost, Box::new(self.expr(*body))),
                ty,
            ),

            kind => typed::Expr::new(kind, ty),
        }
    }
}

/// The type of some tree-typed occurrence of `name` in `expr`.
fn find_tree_type(expr: &typed::Expr, name: &typed::Ident) -> Option<typed::Type> {
    let atom_ty = |atoms: &[&typed::Atom]| {
        atoms
            .iter()
            .find(|atom| &atom.name == name && atom.is_tree())
            .map(|atom| atom.ty.clone())
    };
    match &expr.kind {
        typed::ExprKind::Var(var) if var == name && expr.ty.is_tree() => Some(expr.ty.clone()),
        typed::ExprKind::Var(_)
        | typed::ExprKind::Leaf
        | typed::ExprKind::Coin
        | typed::ExprKind::BoolLit(_) => None,
        typed::ExprKind::Node(left, middle, right) => atom_ty(&[left, middle, right]),
        typed::ExprKind::Call(_, args) => atom_ty(&args.iter().collect::<Vec<_>>()),
        typed::ExprKind::Cmp(_, lhs, rhs) => atom_ty(&[lhs, rhs]),
        typed::ExprKind::Ite(cond, then_case, else_case) => find_tree_type(cond, name)
            .or_else(|| find_tree_type(then_case, name))
            .or_else(|| find_tree_type(else_case, name)),
        typed::ExprKind::Match(scrutinee, leaf_case, _, node_case) => atom_ty(&[scrutinee])
            .or_else(|| find_tree_type(leaf_case, name))
            .or_else(|| find_tree_type(node_case, name)),
        typed::ExprKind::Let(_, value, body) => {
            find_tree_type(value, name).or_else(|| find_tree_type(body, name))
        }
        typed::ExprKind::Share(shared, _, body) => {
            atom_ty(&[shared]).or_else(|| find_tree_type(body, name))
        }
        typed::ExprKind::Tick(_, body) => find_tree_type(body, name),
    }
}

pub fn unshare_func(def: typed::FuncDef) -> typed::FuncDef {
    let mut used: BTreeSet<_> = def.params.iter().map(|param| param.name.0.clone()).collect();
    collect_binders(&def.body, &mut used);
    let body = Unsharer { used }.expr(def.body);
    typed::FuncDef { body, ..def }
}

pub fn unshare_program(program: typed::Program) -> typed::Program {
    typed::Program {
        funcs: program.funcs.map(|_, def| unshare_func(def)),
        ..program
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::resolve_source;
    use crate::type_infer::type_infer;
    use arbor_common::lines;

    fn unshared(src: &str, name: &str) -> String {
        let program = unshare_program(type_infer(&resolve_source("m", src).unwrap()).unwrap());
        let func = program.func_by_name(name).unwrap();
        program.funcs[func].body.to_string()
    }

    #[test]
    fn test_duplicate_call_arguments() {
        let src = lines![
            "pair a b = match a with | leaf -> b | node l x r -> b",
            "f t = pair t t",
        ];
        assert_eq!(unshared(src, "f"), "share t as (t', t'') in pair t' t''");
    }

    #[test]
    fn test_triple_call_arguments_nest() {
        let src = lines![
            "three a b c = match a with | leaf -> b | node l x r -> c",
            "f t = three t t t",
        ];
        assert_eq!(
            unshared(src, "f"),
            "share t as (t', t'') in share t'' as (t''', t'''') in three t' t''' t''''"
        );
    }

    #[test]
    fn test_node_with_same_subtrees() {
        assert_eq!(
            unshared("f t x = node t x t\n", "f"),
            "share t as (t', t'') in node t' x t''"
        );
    }

    #[test]
    fn test_let_value_and_body() {
        let src = lines!["g t = t", "f t = let u = g t in node u leaf t"];
        // `leaf` is not an identifier, so it is bound first.
        assert_eq!(
            unshared(src, "f"),
            "share t as (t', t'') in let u = g t' in let _z0 = leaf in node u _z0 t''"
        );
    }

    #[test]
    fn test_match_reusing_scrutinee() {
        let src = lines![
            "f t = match t with",
            "  | leaf -> t",
            "  | node l x r -> l",
        ];
        assert_eq!(
            unshared(src, "f"),
            "share t as (t', t'') in match t' with | leaf -> t'' | node l x r -> l"
        );
    }

    #[test]
    fn test_base_values_are_not_shared() {
        let src = lines!["pair a b = a", "f t x = let y = pair x x in node t y t"];
        assert_eq!(
            unshared(src, "f"),
            "let y = pair x x in share t as (t', t'') in node t' y t''"
        );
    }
}

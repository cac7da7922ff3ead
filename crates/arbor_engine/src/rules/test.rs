use super::*;
use crate::annotation::{AnnotatingContext, Annotation, FunctionAnnotation, Index};
use crate::coefficient::Coefficient;
use crate::constraint::{Constraint, ConstraintKind};
use crate::prover::Prover;
use crate::solver::{self, SolveOutcome};
use arbor_common::config::{HeuristicOptions, ProverOptions, SolverOptions};
use arbor_common::lines;

struct Fixture {
    signatures: BTreeMap<FuncId, CombinedFunctionAnnotation>,
    heuristic: SmartRange,
    unknowns: UnknownGen,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            signatures: BTreeMap::new(),
            heuristic: SmartRange::new(HeuristicOptions::default()),
            unknowns: UnknownGen::new(),
        }
    }

    fn globals(&self) -> Globals<'_> {
        Globals {
            signatures: &self.signatures,
            heuristic: &self.heuristic,
            unknowns: &self.unknowns,
        }
    }

    fn fresh(&self, name: &str, size: usize) -> Annotation {
        self.heuristic.generate(name, size, &self.unknowns)
    }

    fn context(&self, names: &[&str]) -> AnnotatingContext {
        AnnotatingContext::new(ids(names), self.fresh("Q", names.len()))
    }
}

fn tree() -> typed::Type {
    typed::Type::Tree(Box::new(typed::Type::Param(typed::TypeParamId(0))))
}

fn ids(names: &[&str]) -> Vec<Ident> {
    names.iter().map(|name| Ident::new(*name)).collect()
}

fn body(src: &str, name: &str) -> typed::Expr {
    let program = arbor_frontend::compile_source("m", src).unwrap();
    let func = program.func_by_name(name).unwrap();
    program.funcs[func].body.clone()
}

fn known(name: &str, ranks: &[i64], coefficients: &[(Index, i64)]) -> Annotation {
    Annotation::new(
        name,
        ranks.iter().map(|&rank| Coefficient::from_integer(rank)).collect(),
        coefficients
            .iter()
            .map(|(index, value)| (index.clone(), Coefficient::from_integer(*value)))
            .collect(),
    )
}

fn solve(constraints: &[Constraint]) -> SolveOutcome {
    solver::solve("rules", constraints, &[], &SolverOptions::default(), None).unwrap()
}

fn all_constraints(result: &ApplicationResult) -> Vec<Constraint> {
    result
        .constraints
        .iter()
        .flatten()
        .chain(&result.general)
        .cloned()
        .collect()
}

fn context_names(obligation: &Obligation) -> Vec<&str> {
    obligation
        .context
        .ids
        .iter()
        .map(|id| id.0.as_str())
        .collect()
}

#[test]
fn test_rule_names_round_trip() {
    for rule in Rule::ALL {
        assert_eq!(Rule::from_name(rule.name()), Some(rule));
    }
    assert_eq!(Rule::from_name("let"), None);
}

#[test]
fn test_leaf_needs_potential_for_its_rank() {
    let fixture = Fixture::new();
    let leaf = typed::Expr::new(typed::ExprKind::Leaf, tree());
    // rk(leaf) + log(|leaf| + 1) = 1 + 1
    let result = known("Q'", &[1], &[(Index::new([1], 1), 1)]);

    let broke = Obligation::new(
        AnnotatingContext::new(vec![], known("Q", &[], &[(Index::constant(0, 2), 1)])),
        leaf.clone(),
        result.clone(),
    );
    let applied = Rule::Leaf.apply(&broke, &fixture.globals());
    assert!(applied.obligations.is_empty());
    assert!(matches!(
        solve(&all_constraints(&applied)),
        SolveOutcome::Unsat { .. }
    ));

    let paid = Obligation::new(
        AnnotatingContext::new(vec![], known("Q", &[], &[(Index::constant(0, 2), 2)])),
        leaf,
        result,
    );
    let applied = Rule::Leaf.apply(&paid, &fixture.globals());
    assert!(solve(&all_constraints(&applied)).is_solved());
}

#[test]
fn test_node_moves_subtree_potential_into_result() {
    let fixture = Fixture::new();
    let expr = body("f l x r = node l x r\n", "f");
    let result = known("Q'", &[1], &[(Index::new([1], 0), 1)]);
    let obligation = |log_both: i64| {
        Obligation::new(
            AnnotatingContext::new(
                ids(&["l", "r"]),
                known(
                    "Q",
                    &[1, 1],
                    &[
                        (Index::new([1, 0], 0), 1),
                        (Index::new([0, 1], 0), 1),
                        (Index::new([1, 1], 0), log_both),
                    ],
                ),
            ),
            expr.clone(),
            result.clone(),
        )
    };

    let applied = Rule::Node.apply(&obligation(1), &fixture.globals());
    assert!(solve(&all_constraints(&applied)).is_solved());
    let applied = Rule::Node.apply(&obligation(0), &fixture.globals());
    assert!(!solve(&all_constraints(&applied)).is_solved());
}

#[test]
fn test_match_branches() {
    let fixture = Fixture::new();
    let src = lines![
        "f t u = match t with",
        "  | leaf -> u",
        "  | node l x r -> node r x l",
    ];
    let obligation = Obligation::new(
        fixture.context(&["t", "u"]),
        body(src, "f"),
        fixture.fresh("Q'", 1),
    );
    let applied = Rule::Match.apply(&obligation, &fixture.globals());

    assert_eq!(applied.obligations.len(), 2);
    assert_eq!(applied.constraints.len(), 2);
    let (leaf, node) = (&applied.obligations[0], &applied.obligations[1]);
    assert_eq!(context_names(leaf), vec!["u"]);
    assert_eq!(leaf.expr.to_string(), "u");
    assert!(leaf.context.annotation.coefficient(&Index::unit(1)).is_some());
    assert_eq!(context_names(node), vec!["u", "l", "r"]);
    assert_eq!(node.expr.to_string(), "node r x l");
    // p_(0,1,0,0) and p_(0,0,1,0) hold the rank of t
    for index in [Index::new([0, 1, 0], 0), Index::new([0, 0, 1], 0)] {
        assert!(node.context.annotation.coefficient(&index).is_some());
    }
}

#[test]
fn test_share_splits_every_coefficient() {
    let fixture = Fixture::new();
    let src = lines![
        "pair a b = match a with | leaf -> b | node l x r -> b",
        "f t = pair t t",
    ];
    let obligation = Obligation::new(
        fixture.context(&["t"]),
        body(src, "f"),
        fixture.fresh("Q'", 1),
    );
    let applied = Rule::Share.apply(&obligation, &fixture.globals());

    assert_eq!(applied.obligations.len(), 1);
    let shared = &applied.obligations[0];
    assert_eq!(context_names(shared), vec!["t'", "t''"]);
    assert_eq!(shared.expr.to_string(), "pair t' t''");
    // one constraint for the rank, one per coefficient of Q
    assert_eq!(
        applied.constraints[0].len(),
        1 + obligation.context.annotation.coefficients().count()
    );
}

#[test]
fn test_let_gen_splits_the_unit() {
    let fixture = Fixture::new();
    let obligation = Obligation::new(
        fixture.context(&["t", "u", "v"]),
        body(
            lines![
                "both t u = match t with",
                "  | leaf -> true",
                "  | node l x r -> match u with | leaf -> false | node a y c -> true",
                "f t u v = let b = both t u in match v with | leaf -> leaf | node l x r -> l",
            ],
            "f",
        ),
        fixture.fresh("Q'", 1),
    );
    let applied = Rule::LetGen.apply(&obligation, &fixture.globals());

    assert_eq!(applied.obligations.len(), 2);
    let (value, rest) = (&applied.obligations[0], &applied.obligations[1]);
    assert_eq!(context_names(value), vec!["t", "u"]);
    assert_eq!(value.result.size(), 0);
    assert_eq!(context_names(rest), vec!["v"]);
    assert_eq!(rest.result, obligation.result);
    assert_eq!(applied.general.len(), 1);
    assert!(applied.general[0].reason.contains("q_unit"));
}

#[test]
fn test_let_tree_cost_free_sides() {
    let fixture = Fixture::new();
    let src = lines!["g t = t", "f t u = let y = g t in node y leaf u"];
    let expr = body(src, "f");
    let obligation = Obligation::new(fixture.context(&["t", "u"]), expr, fixture.fresh("Q'", 1));

    let plain = Rule::LetTree.apply(&obligation, &fixture.globals());
    assert_eq!(plain.obligations.len(), 2);
    assert_eq!(context_names(&plain.obligations[0]), vec!["t"]);
    assert_eq!(context_names(&plain.obligations[1]), vec!["u", "y"]);

    let with_sides = Rule::LetTreeCf.apply(&obligation, &fixture.globals());
    assert_eq!(with_sides.obligations.len(), with_sides.constraints.len());
    assert!(with_sides.obligations.len() > 2);
    assert!(with_sides.obligations[..2].iter().all(|side| side.cost));
    for side in &with_sides.obligations[2..] {
        assert!(!side.cost);
        assert_eq!(context_names(side), vec!["t"]);
        assert_eq!(side.expr, with_sides.obligations[0].expr);
    }
}

#[test]
fn test_weakening_variables_terminates() {
    let fixture = Fixture::new();
    let mut obligation = Obligation::new(
        fixture.context(&["a", "t", "b", "c"]),
        typed::Expr::new(typed::ExprKind::Var(Ident::new("t")), tree()),
        fixture.fresh("Q'", 1),
    );
    let mut steps = 0;
    while obligation.context.size() > obligation.expr.free_trees().len() {
        let mut applied = Rule::WVar.apply(&obligation, &fixture.globals());
        assert_eq!(applied.obligations.len(), 1);
        obligation = applied.obligations.remove(0);
        steps += 1;
    }
    assert_eq!(steps, 3);
    assert_eq!(context_names(&obligation), vec!["t"]);
}

#[test]
fn test_mirroring_preserves_rank() {
    let fixture = Fixture::new();
    let src = lines![
        "mirror t = match t with",
        "  | leaf -> leaf",
        "  | node l x r -> node r x l",
    ];
    let derive = |input_rank: i64| {
        let mut prover = Prover::new(
            "mirror",
            fixture.globals(),
            ProverOptions {
                auto: true,
                ..ProverOptions::default()
            },
        );
        let context = fixture.context(&["t"]);
        let result = fixture.fresh("Q'", 1);
        let ranks = [
            Constraint::eq(
                context.annotation.rank(0).clone(),
                Coefficient::from_integer(input_rank),
                "input rank",
            ),
            Constraint::eq(result.rank(0).clone(), Coefficient::one(), "output rank"),
        ];
        let root = prover.add_obligation(Obligation::new(context, body(src, "mirror"), result));
        prover.prove(root);
        assert!(prover.proof().open().is_empty());
        prover
            .solve(&ranks, &[], &SolverOptions::default(), None)
            .unwrap()
    };

    assert!(derive(1).is_solved());
    assert!(!derive(0).is_solved());
}

fn summands_of(constraints: &[Constraint]) -> Vec<usize> {
    constraints
        .iter()
        .filter_map(|constraint| match &constraint.kind {
            ConstraintKind::EqualsSum(_, summands) => Some(summands.len()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_app_sums_cost_and_companion_annotations() {
    let mut fixture = Fixture::new();
    let program = arbor_frontend::compile_source("m", lines!["g t = t", "f t = g t"]).unwrap();
    let g = program.func_by_name("g").unwrap();
    let f = program.func_by_name("f").unwrap();
    let expr = program.funcs[f].body.clone();
    let unit = Index::unit(1);
    let log = Index::new([1], 0);
    fixture.signatures.insert(
        g,
        CombinedFunctionAnnotation {
            with_cost: FunctionAnnotation {
                from: known("P", &[1], &[(unit.clone(), 2)]),
                to: known("P'", &[1], &[]),
            },
            cost_free: vec![FunctionAnnotation {
                from: known("C", &[0], &[(log.clone(), 1)]),
                to: known("C'", &[0], &[]),
            }],
        },
    );
    let obligation = |cost: bool, rank: i64, coefficients: &[(Index, i64)]| {
        let context = AnnotatingContext::new(ids(&["t"]), known("Q", &[rank], coefficients));
        let result = known("Q'", &[rank], &[]);
        if cost {
            Obligation::new(context, expr.clone(), result)
        } else {
            Obligation::cost_free(context, expr.clone(), result)
        }
    };

    // q_(1,0) = 0 + 1 and q_(0,2) = 2 + 0
    let paid = Rule::App.apply(
        &obligation(true, 1, &[(unit.clone(), 2), (log.clone(), 1)]),
        &fixture.globals(),
    );
    assert!(paid.obligations.is_empty());
    let sums = summands_of(&paid.general);
    assert!(!sums.is_empty());
    assert!(sums.iter().all(|&count| count == 2));
    assert!(paid.general.iter().any(|constraint| matches!(
        &constraint.kind,
        ConstraintKind::EqualsSum(q, summands)
            if *q == Coefficient::from_integer(2)
                && summands[..] == [Coefficient::from_integer(2), Coefficient::zero()]
    )));
    assert!(solve(&all_constraints(&paid)).is_solved());

    let short = Rule::App.apply(
        &obligation(true, 1, &[(unit.clone(), 1), (log.clone(), 1)]),
        &fixture.globals(),
    );
    assert!(!solve(&all_constraints(&short)).is_solved());

    // Without costs only the companion is charged.
    let free = Rule::App.apply(&obligation(false, 0, &[(log, 1)]), &fixture.globals());
    assert!(summands_of(&free.general).iter().all(|&count| count == 1));
    assert!(solve(&all_constraints(&free)).is_solved());
}

#[test]
fn test_tick_pays_from_the_unit() {
    let fixture = Fixture::new();
    let expr = body("f t = ~ 2 leaf\n", "f");
    let obligation = |cost: bool, unit: i64| {
        let context = AnnotatingContext::new(
            ids(&["t"]),
            known("Q", &[0], &[(Index::unit(1), unit)]),
        );
        let result = fixture.fresh("Q'", 1);
        if cost {
            Obligation::new(context, expr.clone(), result)
        } else {
            Obligation::cost_free(context, expr.clone(), result)
        }
    };

    let applied = Rule::Tick.apply(&obligation(true, 2), &fixture.globals());
    assert_eq!(applied.obligations.len(), 1);
    assert_eq!(applied.obligations[0].expr.to_string(), "leaf");
    let rest = &applied.obligations[0].context.annotation;
    assert!(applied.constraints[0].iter().any(|constraint| matches!(
        &constraint.kind,
        ConstraintKind::EqualsSum(q, summands)
            if *q == Coefficient::from_integer(2)
                && summands[0] == rest.coefficient_or_zero(&Index::unit(1))
                && summands[1] == Coefficient::from_integer(2)
    )));
    assert!(solve(&all_constraints(&applied)).is_solved());

    let applied = Rule::Tick.apply(&obligation(true, 1), &fixture.globals());
    assert!(matches!(
        solve(&all_constraints(&applied)),
        SolveOutcome::Unsat { .. }
    ));

    let free = Rule::Tick.apply(&obligation(false, 0), &fixture.globals());
    assert!(all_constraints(&free).is_empty());
    assert_eq!(
        free.obligations[0].context.annotation,
        known("Q", &[0], &[(Index::unit(1), 0)])
    );
}

#[test]
fn test_cmp_keeps_constant_potential() {
    let fixture = Fixture::new();
    let expr = body("f t u = t == u\n", "f");
    let context = AnnotatingContext::new(
        ids(&["t", "u"]),
        known(
            "Q",
            &[1, 1],
            &[(Index::unit(2), 3), (Index::new([1, 1], 0), 5)],
        ),
    );
    let applied = |unit: i64| {
        let obligation = Obligation::new(
            context.clone(),
            expr.clone(),
            known("Q'", &[], &[(Index::constant(0, 2), unit)]),
        );
        Rule::Cmp.apply(&obligation, &fixture.globals())
    };

    let kept = applied(3);
    assert!(kept.obligations.is_empty());
    assert!(kept
        .general
        .iter()
        .all(|constraint| matches!(constraint.kind, ConstraintKind::Equality(..))));
    assert!(solve(&all_constraints(&kept)).is_solved());
    // the log of both trees is given up, not turned into constant potential
    assert!(!solve(&all_constraints(&applied(4))).is_solved());
}

#[test]
fn test_var_passes_constants_of_a_base_value() {
    let fixture = Fixture::new();
    let expr = body("f t = true\n", "f");
    let obligation = |unit: i64| {
        Obligation::new(
            AnnotatingContext::new(vec![], known("Q", &[], &[(Index::constant(0, 2), 2)])),
            expr.clone(),
            known("Q'", &[], &[(Index::constant(0, 2), unit)]),
        )
    };

    let same = Rule::Var.apply(&obligation(2), &fixture.globals());
    assert!(same.obligations.is_empty());
    assert!(same.general.iter().any(|constraint| constraint.kind
        == ConstraintKind::Equality(Coefficient::from_integer(2), Coefficient::from_integer(2))));
    assert!(solve(&all_constraints(&same)).is_solved());
    assert!(matches!(
        solve(&all_constraints(&Rule::Var.apply(&obligation(1), &fixture.globals()))),
        SolveOutcome::Unsat { .. }
    ));
}

#[test]
fn test_ite_hands_the_context_to_both_branches() {
    let fixture = Fixture::new();
    let expr = body("f t = if coin then t else leaf\n", "f");
    let obligation = Obligation::new(fixture.context(&["t"]), expr, fixture.fresh("Q'", 1));
    let applied = Rule::Ite.apply(&obligation, &fixture.globals());

    assert_eq!(applied.obligations.len(), 2);
    assert!(all_constraints(&applied).is_empty());
    for branch in &applied.obligations {
        assert!(branch.coin);
        assert!(branch.cost);
        assert_eq!(branch.context.annotation, obligation.context.annotation);
        assert_eq!(branch.result, obligation.result);
    }
    assert_eq!(applied.obligations[0].expr.to_string(), "t");
    assert_eq!(applied.obligations[1].expr.to_string(), "leaf");
}

#[test]
fn test_let_tree_cost_free_side_is_bounded_by_its_input() {
    let fixture = Fixture::new();
    let src = lines!["g t = t", "f t u = let y = g t in node y leaf u"];
    let obligation = Obligation::new(
        fixture.context(&["t", "u"]),
        body(src, "f"),
        fixture.fresh("Q'", 1),
    );
    let applied = Rule::LetTreeCf.apply(&obligation, &fixture.globals());

    let (entry, moved) = applied
        .constraints
        .iter()
        .flatten()
        .find_map(|constraint| match &constraint.kind {
            ConstraintKind::Disjunctive(alternatives) => {
                match (&alternatives[0].kind, &alternatives[1].kind) {
                    (
                        ConstraintKind::Equality(entry, zero),
                        ConstraintKind::LessOrEqual(moved, bound),
                    ) => {
                        assert!(zero.is_known_zero());
                        assert_eq!(entry, bound);
                        Some((entry.clone(), moved.clone()))
                    }
                    _ => None,
                }
            }
            _ => None,
        })
        .expect("a cost-free side with a disjunction");

    let pinned = |input: i64, output: i64| {
        let mut constraints = all_constraints(&applied);
        constraints.push(Constraint::eq(
            entry.clone(),
            Coefficient::from_integer(input),
            "input",
        ));
        constraints.push(Constraint::eq(
            moved.clone(),
            Coefficient::from_integer(output),
            "output",
        ));
        solve(&constraints)
    };

    assert!(pinned(2, 1).is_solved());
    assert!(pinned(0, 2).is_solved());
    assert!(matches!(pinned(1, 2), SolveOutcome::Unsat { .. }));
}

use arbor_common::config::{ProverOptions, SolverOptions};
use arbor_common::data::typed_ast as typed;
use std::path::Path;

use crate::coefficient::Unknown;
use crate::constraint::Constraint;
use crate::obligation::{Obligation, ObligationId};
use crate::proof::Proof;
use crate::rules::{Globals, Rule};
use crate::solver::{self, SolveError, SolveOutcome};

#[derive(Clone, Debug, thiserror::Error)]
pub enum ProveError {
    #[error("an obligation named '{0}' was already recorded")]
    DuplicateName(String),
    #[error("there is no rule named '{0}'")]
    UnknownRule(String),
}

/// Builds a derivation for obligations by applying rules, and collects the resulting
/// constraints for solving.
pub struct Prover<'a> {
    name: String,
    globals: Globals<'a>,
    options: ProverOptions,
    proof: Proof,
    external: Vec<Constraint>,
}

impl<'a> Prover<'a> {
    pub fn new(name: impl Into<String>, globals: Globals<'a>, options: ProverOptions) -> Self {
        Prover {
            name: name.into(),
            globals,
            options,
            proof: Proof::new(),
            external: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> ProverOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ProverOptions) {
        self.options = options;
    }

    pub fn proof(&self) -> &Proof {
        &self.proof
    }

    pub fn add_obligation(&mut self, obligation: Obligation) -> ObligationId {
        self.proof.add_root(obligation)
    }

    /// The rule for an expression, ignoring weakening.
    pub fn choose_rule(&self, expr: &typed::Expr) -> Rule {
        match &expr.kind {
            typed::ExprKind::Cmp(..) => Rule::Cmp,
            typed::ExprKind::Node(..) => Rule::Node,
            typed::ExprKind::Call(..) => Rule::App,
            typed::ExprKind::Leaf => Rule::Leaf,
            typed::ExprKind::Var(_) | typed::ExprKind::Coin | typed::ExprKind::BoolLit(_) => {
                Rule::Var
            }
            typed::ExprKind::Ite(..) => Rule::Ite,
            typed::ExprKind::Match(..) => Rule::Match,
            typed::ExprKind::Let(binder, _, _) => {
                if !binder.is_tree() {
                    Rule::LetGen
                } else if self.options.tree_cf {
                    Rule::LetTreeCf
                } else {
                    Rule::LetTree
                }
            }
            typed::ExprKind::Share(..) => Rule::Share,
            typed::ExprKind::Tick(..) => Rule::Tick,
        }
    }

    /// The rules to apply in sequence; every one but the last must yield exactly one obligation.
    pub fn choose_rules(&self, obligation: &Obligation) -> Vec<Rule> {
        let free = obligation.expr.free_trees();
        if obligation.context.ids.iter().any(|id| !free.contains(id)) {
            return vec![Rule::WVar];
        }

        let rule = self.choose_rule(&obligation.expr);
        let weaken = if obligation.expr.is_terminal() {
            self.options.weaken_before_terminal || self.options.auto
        } else {
            self.options.auto && rule != Rule::Ite
        };
        if weaken {
            vec![Rule::W, rule]
        } else {
            vec![rule]
        }
    }

    pub fn apply(&mut self, id: ObligationId, rule: Rule) -> Vec<ObligationId> {
        let result = rule.apply(&self.proof[id], &self.globals);
        if self.options.log_applications {
            tracing::debug!(
                prover = %self.name,
                rule = rule.name(),
                obligations = result.obligations.len(),
                "applied to {}",
                self.proof[id]
            );
        }
        self.proof.add_application(id, rule, result)
    }

    pub fn apply_by_name(&mut self, name: &str, id: ObligationId) -> Result<Vec<ObligationId>, ProveError> {
        let rule = Rule::from_name(name).ok_or_else(|| ProveError::UnknownRule(name.to_owned()))?;
        Ok(self.apply(id, rule))
    }

    /// Applies `rules` in sequence, returning the obligations of the last application.
    fn apply_chain(&mut self, id: ObligationId, rules: &[Rule]) -> Vec<ObligationId> {
        let Some((last, chain)) = rules.split_last() else {
            bug!("no rules to apply");
        };
        let mut current = id;
        for &rule in chain {
            let next = self.apply(current, rule);
            if next.len() != 1 {
                bug!(
                    "({}) yielded {} obligations where exactly one was expected",
                    rule,
                    next.len()
                );
            }
            current = next[0];
        }
        self.apply(current, *last)
    }

    pub fn prove(&mut self, id: ObligationId) {
        self.prove_until(id, |_| false);
    }

    /// Proves `id`, stopping at every obligation satisfying `stop`. Returns those obligations.
    pub fn prove_until(
        &mut self,
        id: ObligationId,
        stop: impl Fn(&Obligation) -> bool,
    ) -> Vec<ObligationId> {
        let mut stopped = Vec::new();
        let mut todo = vec![id];
        while let Some(current) = todo.pop() {
            if current != id && stop(&self.proof[current]) {
                stopped.push(current);
                continue;
            }
            let rules = self.choose_rules(&self.proof[current]);
            let next = self.apply_chain(current, &rules);
            todo.extend(next.into_iter().rev());
        }
        stopped
    }

    /// Applies (w:var) until every variable in context is used.
    pub fn weaken_variables(&mut self, id: ObligationId) -> ObligationId {
        let mut current = id;
        loop {
            let obligation = &self.proof[current];
            let free = obligation.expr.free_trees();
            if obligation.context.ids.iter().all(|id| free.contains(id)) {
                return current;
            }
            let next = self.apply(current, Rule::WVar);
            current = next[0];
        }
    }

    pub fn record(&mut self, name: &str, id: ObligationId) -> Result<(), ProveError> {
        if self.proof.record(name, id) {
            Ok(())
        } else {
            Err(ProveError::DuplicateName(name.to_owned()))
        }
    }

    pub fn add_external_constraints(&mut self, constraints: impl IntoIterator<Item = Constraint>) {
        self.external.extend(constraints);
    }

    /// Every constraint of the derivation plus the external ones.
    pub fn constraints(&self) -> Vec<Constraint> {
        self.proof
            .constraints()
            .chain(&self.external)
            .cloned()
            .collect()
    }

    pub fn solve(
        &self,
        outside: &[Constraint],
        targets: &[Unknown],
        options: &SolverOptions,
        dump: Option<&Path>,
    ) -> Result<SolveOutcome, SolveError> {
        let mut constraints = self.constraints();
        constraints.extend(outside.iter().cloned());
        solver::solve(&self.name, &constraints, targets, options, dump)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::annotation::{AnnotatingContext, Annotation, CombinedFunctionAnnotation};
    use crate::coefficient::UnknownGen;
    use crate::heuristic::SmartRange;
    use arbor_common::config::HeuristicOptions;
    use std::collections::BTreeMap;

    fn tree() -> typed::Type {
        typed::Type::Tree(Box::new(typed::Type::Param(typed::TypeParamId(0))))
    }

    fn var(name: &str) -> typed::Expr {
        typed::Expr::new(typed::ExprKind::Var(typed::Ident::new(name)), tree())
    }

    fn context(names: &[&str], gen: &UnknownGen) -> AnnotatingContext {
        let heuristic = SmartRange::new(HeuristicOptions::default());
        AnnotatingContext::new(
            names.iter().map(|name| typed::Ident::new(*name)).collect(),
            heuristic.generate("Q", names.len(), gen),
        )
    }

    struct Fixture {
        signatures: BTreeMap<typed::FuncId, CombinedFunctionAnnotation>,
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

        fn prover(&self, options: ProverOptions) -> Prover<'_> {
            Prover::new(
                "test",
                Globals {
                    signatures: &self.signatures,
                    heuristic: &self.heuristic,
                    unknowns: &self.unknowns,
                },
                options,
            )
        }
    }

    #[test]
    fn test_redundant_variables_are_weakened_first() {
        let fixture = Fixture::new();
        let mut prover = fixture.prover(ProverOptions::default());
        let obligation = Obligation::new(
            context(&["a", "t", "b"], &fixture.unknowns),
            var("t"),
            Annotation::fresh(1, "Q'", &fixture.unknowns),
        );
        assert_eq!(prover.choose_rules(&obligation), vec![Rule::WVar]);

        let id = prover.add_obligation(obligation);
        let weakened = prover.weaken_variables(id);
        assert_eq!(prover.proof()[weakened].context.ids, vec![typed::Ident::new("t")]);
        // one step per dropped variable
        assert_eq!(prover.proof().len(), 3);
    }

    #[test]
    fn test_weakening_policy() {
        let fixture = Fixture::new();
        let leaf = Obligation::new(
            context(&[], &fixture.unknowns),
            typed::Expr::new(typed::ExprKind::Leaf, tree()),
            Annotation::fresh(1, "Q'", &fixture.unknowns),
        );
        let tick = Obligation::new(
            context(&[], &fixture.unknowns),
            typed::Expr::new(
                typed::ExprKind::Tick(
                    num_rational::BigRational::from_integer(1.into()),
                    Box::new(typed::Expr::new(typed::ExprKind::Leaf, tree())),
                ),
                tree(),
            ),
            Annotation::fresh(1, "Q'", &fixture.unknowns),
        );

        let plain = fixture.prover(ProverOptions::default());
        assert_eq!(plain.choose_rules(&leaf), vec![Rule::Leaf]);
        assert_eq!(plain.choose_rules(&tick), vec![Rule::Tick]);

        let terminal = fixture.prover(ProverOptions {
            weaken_before_terminal: true,
            ..ProverOptions::default()
        });
        assert_eq!(terminal.choose_rules(&leaf), vec![Rule::W, Rule::Leaf]);
        assert_eq!(terminal.choose_rules(&tick), vec![Rule::Tick]);

        let auto = fixture.prover(ProverOptions {
            auto: true,
            ..ProverOptions::default()
        });
        assert_eq!(auto.choose_rules(&leaf), vec![Rule::W, Rule::Leaf]);
        assert_eq!(auto.choose_rules(&tick), vec![Rule::W, Rule::Tick]);
    }

    #[test]
    fn test_prove_closes_every_obligation() {
        let fixture = Fixture::new();
        let mut prover = fixture.prover(ProverOptions {
            auto: true,
            ..ProverOptions::default()
        });
        let id = prover.add_obligation(Obligation::new(
            context(&["t", "u"], &fixture.unknowns),
            var("u"),
            Annotation::fresh(1, "Q'", &fixture.unknowns),
        ));
        prover.prove(id);
        assert!(prover.proof().open().is_empty());
        assert!(!prover.constraints().is_empty());
    }

    #[test]
    fn test_record_rejects_duplicates() {
        let fixture = Fixture::new();
        let mut prover = fixture.prover(ProverOptions::default());
        let id = prover.add_obligation(Obligation::new(
            context(&[], &fixture.unknowns),
            typed::Expr::new(typed::ExprKind::Leaf, tree()),
            Annotation::fresh(1, "Q'", &fixture.unknowns),
        ));
        assert!(prover.record("root", id).is_ok());
        assert!(matches!(
            prover.record("root", id),
            Err(ProveError::DuplicateName(_))
        ));
        assert!(matches!(
            prover.apply_by_name("nope", id),
            Err(ProveError::UnknownRule(_))
        ));
    }
}

//! Analyses a whole program, one strongly connected component of the call graph at a time.
//!
//! Every component gets unknown annotations for its functions, a derivation for each body, and
//! one constraint system. Components run on the scheduler once all their callees are solved.

use arbor_common::config::{ArtifactDir, RightSide, SolveMode, SolveOptions, SolverOptions};
use arbor_common::data::typed_ast::{self as typed, FuncId, Ident, SccId};
use arbor_common::util::progress_logger::{ProgressLogger, ProgressSession};
use num_rational::BigRational;
use num_traits::Zero;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::annotation::{AnnotatingContext, Annotation, CombinedFunctionAnnotation, FunctionAnnotation};
use crate::coefficient::{Coefficient, Solution, Unknown, UnknownGen};
use crate::constraint::Constraint;
use crate::fixed::FixedAnnotations;
use crate::heuristic::SmartRange;
use crate::obligation::Obligation;
use crate::prover::Prover;
use crate::rules::Globals;
use crate::scheduler::{self, Scheduler, TaskResult};
use crate::solver::{SolveError, SolveOutcome};
use crate::tactic::{self, Tactic, TacticError};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error("tactic for {func} failed: {source}")]
    Tactic {
        func: String,
        #[source]
        source: TacticError,
    },
    #[error("could not write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("analysis of {scc} crashed: {message}")]
    Crashed { scc: String, message: String },
}

#[derive(Clone, Debug)]
pub struct AnalysisResult {
    /// Unsatisfiable if any component is.
    pub outcome: SolveOutcome,
    /// Solved annotations of every function whose component was solved.
    pub annotations: BTreeMap<FuncId, CombinedFunctionAnnotation>,
    /// Functions left unanalysed, because a callee has no bound or time ran out.
    pub skipped: Vec<FuncId>,
}

impl AnalysisResult {
    /// `f t u: <potential of t, u> → <potential of the result>`
    pub fn describe(&self, program: &typed::Program, func: FuncId) -> Option<String> {
        let annotation = self.annotations.get(&func)?;
        let def = &program.funcs[func];
        let params: Vec<_> = def.tree_params().map(|param| param.name.clone()).collect();
        let header: Vec<_> = std::iter::once(program.qualified_name(func))
            .chain(params.iter().map(|param| param.0.clone()))
            .collect();
        Some(format!(
            "{}: {}",
            header.join(" "),
            annotation.render(&params, "result")
        ))
    }
}

/// Everything one component needs to know about one of its functions.
struct Member {
    func: FuncId,
    name: String,
    params: Vec<Ident>,
    annotation: CombinedFunctionAnnotation,
    fixed: bool,
}

pub struct Analysis<'a> {
    program: &'a typed::Program,
    options: SolveOptions,
    /// Functions some function calls. Each gets a cost-free companion.
    called: BTreeSet<FuncId>,
    fixed: FixedAnnotations,
    tactics: BTreeMap<String, Tactic>,
    artifacts: Option<ArtifactDir>,
    unknowns: UnknownGen,
    heuristic: SmartRange,
    solved: Mutex<BTreeMap<FuncId, CombinedFunctionAnnotation>>,
    right_sides: Mutex<BTreeMap<String, Annotation>>,
}

impl<'a> Analysis<'a> {
    pub fn new(program: &'a typed::Program, options: SolveOptions) -> Self {
        Analysis {
            program,
            options,
            called: program.called(),
            fixed: FixedAnnotations::new(),
            tactics: BTreeMap::new(),
            artifacts: None,
            unknowns: UnknownGen::new(),
            heuristic: SmartRange::new(options.heuristic),
            solved: Mutex::new(BTreeMap::new()),
            right_sides: Mutex::new(BTreeMap::new()),
        }
    }

    /// Annotations by qualified function name that replace inference for those functions.
    pub fn with_fixed(mut self, fixed: FixedAnnotations) -> Self {
        self.fixed = fixed;
        self
    }

    /// Tactics by qualified function name, used instead of automatic proving.
    pub fn with_tactics(mut self, tactics: BTreeMap<String, Tactic>) -> Self {
        self.tactics = tactics;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Option<ArtifactDir>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn run<L>(&self, progress: L) -> Result<AnalysisResult, AnalysisError>
    where
        L: ProgressLogger,
        L::Session: Send,
    {
        let deps: BTreeMap<SccId, BTreeSet<SccId>> = self
            .program
            .sccs
            .iter()
            .map(|(id, scc)| (id, scc.deps.clone()))
            .collect();
        let session = Mutex::new(progress.start_session(Some(deps.len())));
        let errors: Mutex<BTreeMap<SccId, AnalysisError>> = Mutex::new(BTreeMap::new());
        let unsat: Mutex<BTreeMap<SccId, SolveOutcome>> = Mutex::new(BTreeMap::new());

        let scheduler = Scheduler::new(self.options.schedule);
        let deadline = scheduler.deadline();

        // Only solved components succeed, so dependants of the others are cancelled.
        let results = scheduler.run(&deps, |scc| {
            let result = self.analyze_scc(scc, deadline);
            lock(&session).update(1);
            match result {
                Ok(outcome @ SolveOutcome::Solved(_)) => Ok(outcome),
                Ok(outcome @ SolveOutcome::Unsat { .. }) => {
                    lock(&unsat).insert(scc, outcome);
                    Err("no bound exists".to_owned())
                }
                Err(err) => {
                    let message = err.to_string();
                    // A solver stopped by the deadline only cancels its component.
                    let stopped = matches!(err, AnalysisError::Solve(SolveError::Unknown { .. }))
                        && expired(deadline);
                    if !stopped {
                        lock(&errors).insert(scc, err);
                    }
                    Err(message)
                }
            }
        });
        into_inner(session).finish();

        if let Some((_, err)) = into_inner(errors).into_iter().next() {
            return Err(err);
        }
        let unsat = into_inner(unsat);

        let mut skipped = Vec::new();
        for (&scc, result) in &results {
            match result {
                TaskResult::Value(_) => {}
                TaskResult::ExecutionError(message) => {
                    if !unsat.contains_key(&scc) {
                        return Err(AnalysisError::Crashed {
                            scc: self.scc_label(scc),
                            message: message.clone(),
                        });
                    }
                }
                TaskResult::Cancelled => {
                    skipped.extend(self.program.sccs[scc].funcs.iter().copied());
                }
            }
        }

        let solved = scheduler::merge_values(results, SolveOutcome::merge);
        let outcome = unsat
            .into_values()
            .chain(solved)
            .reduce(SolveOutcome::merge)
            .unwrap_or_else(|| SolveOutcome::Solved(Solution::new()));

        Ok(AnalysisResult {
            outcome,
            annotations: lock(&self.solved).clone(),
            skipped,
        })
    }

    fn scc_label(&self, scc: SccId) -> String {
        let names: Vec<_> = self.program.sccs[scc]
            .funcs
            .iter()
            .map(|&func| self.program.funcs[func].name.as_str())
            .collect();
        names.join("+")
    }

    fn stub(&self, func: FuncId, name: &str, params: usize, result: usize) -> CombinedFunctionAnnotation {
        let pair = |from: String, to: String| FunctionAnnotation {
            from: self.heuristic.generate(&from, params, &self.unknowns),
            to: self.heuristic.generate(&to, result, &self.unknowns),
        };
        let cost_free = if self.options.infer_cf || self.called.contains(&func) {
            vec![pair(format!("C_{}", name), format!("C'_{}", name))]
        } else {
            Vec::new()
        };
        CombinedFunctionAnnotation {
            with_cost: pair(format!("Q_{}", name), format!("Q'_{}", name)),
            cost_free,
        }
    }

    /// Annotations for the functions of `scc`, plus constraints already implied by the input.
    fn members(&self, scc: SccId) -> (Vec<Member>, Vec<Constraint>) {
        let mut external = Vec::new();
        let members = self.program.sccs[scc]
            .funcs
            .iter()
            .map(|&func| {
                let def = &self.program.funcs[func];
                let name = self.program.qualified_name(func);
                let params: Vec<_> = def.tree_params().map(|param| param.name.clone()).collect();
                let result = usize::from(def.returns_tree());

                let (annotation, fixed) = match self.fixed.get(&name) {
                    Some(fixed) => match fixed.to_annotation(&name, params.len(), def.returns_tree()) {
                        Ok(annotation) => (annotation, true),
                        Err(err) => {
                            external.push(Constraint::unsatisfiable(format!(
                                "fixed annotation of {}: {}",
                                name, err
                            )));
                            (self.stub(func, &name, params.len(), result), false)
                        }
                    },
                    None => (self.stub(func, &name, params.len(), result), false),
                };
                Member {
                    func,
                    name,
                    params,
                    annotation,
                    fixed,
                }
            })
            .collect();
        (members, external)
    }

    fn right_side(&self, member: &Member) -> Vec<Constraint> {
        if member.fixed {
            return Vec::new();
        }
        let result = &member.annotation.with_cost.to;
        match self.options.right_side {
            RightSide::Free => Vec::new(),
            RightSide::Zero => result.equate(&Annotation::zero(result.size()), "zero right side"),
            RightSide::RankAndUnit => result
                .coefficients()
                .filter(|(index, _)| !index.is_unit())
                .map(|(index, coefficient)| {
                    Constraint::eq(
                        coefficient.clone(),
                        Coefficient::zero(),
                        format!("right side {} has no potential at {}", result.name, index),
                    )
                })
                .collect(),
            RightSide::Same => {
                if !self.program.funcs[member.func].returns_tree() {
                    return Vec::new();
                }
                let mut shared = lock(&self.right_sides);
                let shared = shared
                    .entry(self.program.module.clone())
                    .or_insert_with(|| result.clone());
                result.equate(shared, "same right side")
            }
        }
    }

    fn root(&self, member: &Member, annotation: &FunctionAnnotation, cost: bool) -> Obligation {
        let context = AnnotatingContext::new(member.params.clone(), annotation.from.clone());
        let body = self.program.funcs[member.func].body.clone();
        if cost {
            Obligation::new(context, body, annotation.to.clone())
        } else {
            Obligation::cost_free(context, body, annotation.to.clone())
        }
    }

    fn analyze_scc(&self, scc: SccId, deadline: Option<Instant>) -> Result<SolveOutcome, AnalysisError> {
        let label = self.scc_label(scc);
        let (members, mut external) = self.members(scc);

        let mut signatures = lock(&self.solved).clone();
        for member in &members {
            signatures.insert(member.func, member.annotation.clone());
        }
        let globals = Globals {
            signatures: &signatures,
            heuristic: &self.heuristic,
            unknowns: &self.unknowns,
        };
        let mut prover = Prover::new(label.clone(), globals, self.options.prover);

        for member in &members {
            let script = self.tactics.get(&member.name);
            let derive = |prover: &mut Prover, obligation: Obligation| {
                let id = prover.add_obligation(obligation);
                match script {
                    Some(script) => tactic::follow(prover, script, id).map_err(|source| {
                        AnalysisError::Tactic {
                            func: member.name.clone(),
                            source,
                        }
                    }),
                    None => {
                        prover.prove(id);
                        Ok(())
                    }
                }
            };
            derive(&mut prover, self.root(member, &member.annotation.with_cost, true))?;
            for companion in &member.annotation.cost_free {
                if !companion.is_zero() {
                    derive(&mut prover, self.root(member, companion, false))?;
                }
            }
            external.extend(self.right_side(member));
        }

        let targets: Vec<Unknown> = match self.options.mode {
            SolveMode::Check => Vec::new(),
            SolveMode::Infer => members
                .iter()
                .filter(|member| !member.fixed)
                .flat_map(|member| {
                    let annotation = &member.annotation;
                    std::iter::once(&annotation.with_cost)
                        .chain(&annotation.cost_free)
                        .flat_map(|pair| pair.from.occurring_coefficients())
                })
                .collect(),
        };

        if let Some(artifacts) = &self.artifacts {
            let path = artifacts.artifact_path(&label, "json");
            let export = serde_json::to_string_pretty(&prover.proof().export())
                .map_err(|err| AnalysisError::Export {
                    path: path.clone(),
                    source: err.into(),
                })?;
            fs::write(&path, export).map_err(|source| AnalysisError::Export { path, source })?;
        }
        let dump = self
            .artifacts
            .as_ref()
            .map(|artifacts| artifacts.artifact_path(&label, "smt2"));

        tracing::debug!(
            scc = %label,
            obligations = prover.proof().len(),
            open = prover.proof().open().len(),
            "derivation built"
        );
        let solver = within_deadline(self.options.solver, deadline);
        let outcome = prover.solve(&external, &targets, &solver, dump.as_deref())?;

        match &outcome {
            SolveOutcome::Solved(solution) => {
                let mut solution = solution.clone();
                // Coefficients no constraint mentions carry no potential.
                for member in &members {
                    let annotation = &member.annotation;
                    for pair in std::iter::once(&annotation.with_cost).chain(&annotation.cost_free) {
                        for unknown in pair.occurring_coefficients() {
                            solution.entry(unknown).or_insert_with(BigRational::zero);
                        }
                    }
                }

                let mut solved = lock(&self.solved);
                for member in &members {
                    let annotation = member.annotation.substitute(&solution);
                    tracing::info!(
                        function = %member.name,
                        "{}",
                        annotation.render(&member.params, "result")
                    );
                    solved.insert(member.func, annotation);
                }
                drop(solved);

                let mut shared = lock(&self.right_sides);
                if let Some(annotation) = shared.get_mut(&self.program.module) {
                    *annotation = annotation.substitute(&solution);
                }
            }
            SolveOutcome::Unsat { core } => {
                tracing::warn!(scc = %label, core = core.len(), "no bound exists");
            }
        }
        Ok(outcome)
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

/// Stops the solver no later than `deadline`.
fn within_deadline(options: SolverOptions, deadline: Option<Instant>) -> SolverOptions {
    match deadline {
        Some(deadline) => SolverOptions {
            timeout: options
                .timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            ..options
        },
        None => options,
    }
}

// A panicking task is reported by the scheduler; the data it guarded is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex.into_inner().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixed;
    use arbor_common::lines;
    use arbor_common::config::ScheduleOptions;
    use arbor_common::util::progress_logger::Hidden;
    use std::path::Path;
    use std::time::Duration;

    fn compile(src: &str) -> typed::Program {
        arbor_frontend::compile_source("m", src).unwrap()
    }

    fn analyse(program: &typed::Program, options: SolveOptions, fixed: &str) -> AnalysisResult {
        let fixed = if fixed.is_empty() {
            FixedAnnotations::new()
        } else {
            fixed::parse(fixed, Path::new("fixed.json")).unwrap()
        };
        Analysis::new(program, options)
            .with_fixed(fixed)
            .run(Hidden)
            .unwrap()
    }

    fn annotation<'a>(
        result: &'a AnalysisResult,
        program: &typed::Program,
        name: &str,
    ) -> &'a CombinedFunctionAnnotation {
        &result.annotations[&program.func_by_name(name).unwrap()]
    }

    fn check() -> SolveOptions {
        SolveOptions {
            mode: SolveMode::Check,
            ..SolveOptions::default()
        }
    }

    #[test]
    fn test_identity_with_zero_right_side() {
        let program = compile("id t = t\n");
        let result = analyse(
            &program,
            SolveOptions {
                right_side: RightSide::Zero,
                ..SolveOptions::default()
            },
            "",
        );
        assert!(result.outcome.is_solved());
        let id = annotation(&result, &program, "id");
        assert!(id.with_cost.is_zero());
        assert!(!id.is_unknown());
    }

    #[test]
    fn test_leaf_result_needs_unit_potential() {
        let program = compile("f t = leaf\n");
        let to = r#""to": { "ranks": [0], "coefficients": [[[0, 2], 1]] }"#;

        let broke = format!(r#"{{ "m.f": {{ "from": {{}}, {} }} }}"#, to);
        let result = analyse(&program, check(), &broke);
        assert!(matches!(result.outcome, SolveOutcome::Unsat { .. }));

        let paid = format!(
            r#"{{ "m.f": {{ "from": {{ "coefficients": [[[2], 1]] }}, {} }} }}"#,
            to
        );
        let result = analyse(&program, check(), &paid);
        assert!(result.outcome.is_solved());
        assert_eq!(
            annotation(&result, &program, "f").render(&[], "result"),
            "1 → 1"
        );
    }

    #[test]
    fn test_fixed_annotation_with_large_numerals() {
        let program = compile("f t = leaf\n");
        let value = "100000000000000000001/100000000000000000000";
        let fixed = format!(
            r#"{{ "m.f": {{
                "from": {{ "coefficients": [[[2], "{value}"]] }},
                "to": {{ "ranks": [0], "coefficients": [[[0, 2], "{value}"]] }}
            }} }}"#,
            value = value
        );
        let result = analyse(&program, check(), &fixed);
        assert!(result.outcome.is_solved());
        assert_eq!(
            annotation(&result, &program, "f").render(&[], "result"),
            format!("{} → {}", value, value)
        );
    }

    #[test]
    fn test_fixed_arity_mismatch_is_unsat() {
        let program = compile("f t = leaf\n");
        let fixed = r#"{ "m.f": { "from": { "ranks": [0] }, "to": { "ranks": [0] } } }"#;
        let result = analyse(&program, SolveOptions::default(), fixed);
        let SolveOutcome::Unsat { core } = &result.outcome else {
            panic!("expected unsat, got {:?}", result.outcome);
        };
        assert!(core.iter().any(|reason| reason.contains("fixed annotation of m.f")));
    }

    #[test]
    fn test_incompatible_bound_is_unsat_and_skips_callers() {
        let src = lines!["f t = ~ leaf", "g t = f t"];
        let program = compile(src);
        let fixed = r#"{ "m.f": { "from": {}, "to": { "ranks": [0] } } }"#;
        let result = analyse(&program, check(), fixed);
        let SolveOutcome::Unsat { core } = &result.outcome else {
            panic!("expected unsat, got {:?}", result.outcome);
        };
        assert!(core.iter().any(|reason| reason.contains("(tick)")));
        assert_eq!(result.skipped, vec![program.func_by_name("g").unwrap()]);
    }

    #[test]
    fn test_callers_use_solved_callees() {
        let src = lines![
            "id t = match t with | leaf -> leaf | node l x r -> node l x r",
            "twice t = id (id t)",
        ];
        let program = compile(src);
        let result = analyse(&program, SolveOptions::default(), "");
        assert!(result.outcome.is_solved());
        assert!(result.skipped.is_empty());
        for name in ["id", "twice"] {
            let func = program.func_by_name(name).unwrap();
            assert!(!annotation(&result, &program, name).is_unknown());
            assert!(result.describe(&program, func).unwrap().starts_with(&format!("m.{} t: ", name)));
        }
    }

    #[test]
    fn test_called_functions_get_a_companion() {
        let src = lines![
            "first t = match t with | leaf -> ~ leaf | node l x r -> l",
            "caller t = first t",
        ];
        let program = compile(src);
        let script = tactic::parse(
            r#"{ "apply": { "rule": "match", "name": "top", "next": [
                { "apply": { "rule": "tick", "next": [{ "apply": { "rule": "leaf" } }] } },
                { "auto": {} }
            ] } }"#,
            Path::new("first.json"),
        )
        .unwrap();
        let result = Analysis::new(&program, SolveOptions::default())
            .with_tactics([("m.first".to_owned(), script)].into_iter().collect())
            .run(Hidden)
            .unwrap();
        assert!(result.outcome.is_solved());

        let first = annotation(&result, &program, "first");
        assert_eq!(first.cost_free.len(), 1);
        assert!(!first.is_unknown());
        assert!(annotation(&result, &program, "caller").cost_free.is_empty());
    }

    #[test]
    fn test_expired_deadline_skips_every_function() {
        let program = compile(lines!["f t = t", "g t = f t"]);
        let options = SolveOptions {
            schedule: ScheduleOptions {
                threads: 2,
                timeout: Some(Duration::ZERO),
            },
            ..SolveOptions::default()
        };
        let result = Analysis::new(&program, options).run(Hidden).unwrap();
        assert!(result.outcome.is_solved());
        assert!(result.annotations.is_empty());
        assert_eq!(result.skipped.len(), 2);
    }

    #[test]
    fn test_solver_stops_at_the_deadline() {
        let options = SolverOptions::default();
        assert_eq!(within_deadline(options, None), options);
        assert_eq!(
            within_deadline(options, Some(Instant::now())).timeout,
            Duration::ZERO
        );
        let soon = within_deadline(options, Some(Instant::now() + Duration::from_secs(60)));
        assert!(soon.timeout <= Duration::from_secs(60));
        assert!(soon.timeout > Duration::from_secs(30));
    }

    #[test]
    fn test_same_right_side() {
        let src = lines![
            "left t = match t with | leaf -> leaf | node l x r -> l",
            "right t = match t with | leaf -> leaf | node l x r -> r",
        ];
        let program = compile(src);
        let result = analyse(
            &program,
            SolveOptions {
                right_side: RightSide::Same,
                ..SolveOptions::default()
            },
            "",
        );
        assert!(result.outcome.is_solved());
        assert_eq!(
            annotation(&result, &program, "left").with_cost.to.potential(&[Ident::new("r")]),
            annotation(&result, &program, "right").with_cost.to.potential(&[Ident::new("r")])
        );
    }

    #[test]
    fn test_artifacts_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let program = compile("f t = match t with | leaf -> leaf | node l x r -> r\n");
        let artifacts = ArtifactDir {
            dir_path: dir.path().to_owned(),
            filename_prefix: PathBuf::from("m"),
        };
        let result = Analysis::new(&program, SolveOptions::default())
            .with_artifacts(Some(artifacts))
            .run(Hidden)
            .unwrap();
        assert!(result.outcome.is_solved());

        let proof: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("m.f.json")).unwrap()).unwrap();
        assert_eq!(proof["roots"].as_array().map(Vec::len), Some(1));
        assert!(!proof["edges"].as_array().unwrap().is_empty());
        assert!(dir.path().join("m.f.smt2").exists());
    }
}

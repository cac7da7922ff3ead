#[cfg(test)]
mod test;

pub mod cli;

use arbor_common::data::typed_ast as typed;
use arbor_common::file_cache::FileCache;
use arbor_common::progress_ui;
use arbor_common::report_error::{report_error, Report, Reportable};
use arbor_engine::fixed::{self, FixedAnnotations};
use arbor_engine::program::{Analysis, AnalysisError, AnalysisResult};
use arbor_engine::solver::{SolveError, SolveOutcome};
use arbor_engine::tactic::{self, Tactic, TacticError};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
enum ErrorKind {
    FrontendError(arbor_frontend::error::Error),
    AnnotationsFailed(fixed::Error),
    TacticFailed(TacticError),
    UnknownFunction { name: String, path: PathBuf },
    ArtifactDirFailed { path: PathBuf, err: io::Error },
    AnalysisFailed(AnalysisError),
    WriteFailed(io::Error),
    NoBound,
}

// This type is separate from 'ErrorKind' because enums cannot have private variants, and we don't
// want to expose the internal error types appearing in the variants of 'ErrorKind'.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

fn report_plain(
    dest: &mut impl io::Write,
    files: &FileCache,
    title: &str,
    message: &str,
) -> io::Result<()> {
    report_error(
        dest,
        files,
        Report {
            path: None,
            span: None,
            title,
            message: Some(message),
        },
    )
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write, files: &FileCache) -> io::Result<()> {
        use ErrorKind::*;
        match &self.kind {
            FrontendError(err) => err.report(dest, files),
            AnnotationsFailed(err) => {
                report_plain(dest, files, "Malformed Annotations", &err.to_string())
            }
            TacticFailed(err) => report_plain(dest, files, "Tactic Failed", &err.to_string()),
            UnknownFunction { name, path } => report_plain(
                dest,
                files,
                "Unknown Function",
                &format!(
                    "The tactic '{}' is given for '{}', but the program defines no function of \
                    that name.",
                    path.display(),
                    name
                ),
            ),
            ArtifactDirFailed { path, err } => report_plain(
                dest,
                files,
                "Could Not Create Proof Directory",
                &format!("{}: {}", path.display(), err),
            ),
            AnalysisFailed(AnalysisError::Solve(SolveError::Unknown { name, reason })) => {
                report_plain(
                    dest,
                    files,
                    "Solver Gave Up",
                    &format!(
                        "The constraint system for '{}' could neither be solved nor refuted: {}",
                        name, reason
                    ),
                )
            }
            AnalysisFailed(err) => report_plain(dest, files, "Analysis Failed", &err.to_string()),
            WriteFailed(err) => writeln!(dest, "Could not write results: {}", err),
            // The unsatisfiable core has already been written with the results.
            NoBound => Ok(()),
        }
    }

    fn exit_status(&self) -> i32 {
        match &self.kind {
            ErrorKind::AnalysisFailed(AnalysisError::Solve(SolveError::Unknown { .. })) => 2,
            _ => 1,
        }
    }
}

fn load_tactics(
    config: &cli::Config,
    program: &typed::Program,
) -> Result<BTreeMap<String, Tactic>, Error> {
    let mut tactics = BTreeMap::new();
    for arg in &config.tactics {
        let func = program
            .func_by_name(&arg.func)
            .ok_or_else(|| ErrorKind::UnknownFunction {
                name: arg.func.clone(),
                path: arg.path.clone(),
            })?;
        let tactic = tactic::load(&arg.path).map_err(ErrorKind::TacticFailed)?;
        tactics.insert(program.qualified_name(func), tactic);
    }
    Ok(tactics)
}

/// Writes one line per function, then the verdict.
pub fn write_results(
    dest: &mut impl io::Write,
    program: &typed::Program,
    result: &AnalysisResult,
) -> io::Result<()> {
    for (func, _) in program.funcs.iter() {
        match result.describe(program, func) {
            Some(line) => writeln!(dest, "{}", line)?,
            None if result.skipped.contains(&func) => {
                writeln!(dest, "{}: skipped", program.qualified_name(func))?
            }
            None => {}
        }
    }
    match &result.outcome {
        SolveOutcome::Solved(solution) => writeln!(dest, "SAT ({} coefficients)", solution.len()),
        SolveOutcome::Unsat { core } => {
            writeln!(dest, "UNSAT")?;
            for reason in core {
                writeln!(dest, "  {}", reason)?;
            }
            Ok(())
        }
    }
}

pub fn analyze(
    config: &cli::Config,
    files: &mut FileCache,
    dest: &mut impl io::Write,
) -> Result<(), Error> {
    let program = arbor_frontend::compile_to_typed_ast(&config.src_path, files)
        .map_err(ErrorKind::FrontendError)?;

    let fixed = match &config.annotations {
        Some(path) => fixed::load(path).map_err(ErrorKind::AnnotationsFailed)?,
        None => FixedAnnotations::new(),
    };
    let tactics = load_tactics(config, &program)?;
    tracing::info!(
        module = %program.module,
        funcs = program.funcs.len(),
        sccs = program.sccs.len(),
        fixed = fixed.len(),
        tactics = tactics.len(),
        "analysing program"
    );

    if let Some(artifacts) = &config.artifact_dir {
        std::fs::create_dir_all(&artifacts.dir_path).map_err(|err| {
            ErrorKind::ArtifactDirFailed {
                path: artifacts.dir_path.clone(),
                err,
            }
        })?;
    }

    let result = Analysis::new(&program, config.options)
        .with_fixed(fixed)
        .with_tactics(tactics)
        .with_artifacts(config.artifact_dir.clone())
        .run(progress_ui::bar(config.progress, "analysing"))
        .map_err(ErrorKind::AnalysisFailed)?;

    write_results(dest, &program, &result).map_err(ErrorKind::WriteFailed)?;
    if result.outcome.is_solved() {
        Ok(())
    } else {
        Err(ErrorKind::NoBound.into())
    }
}

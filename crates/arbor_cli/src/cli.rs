use arbor_common::config::{
    ArtifactDir, Domain, HeuristicOptions, ProverOptions, RightSide, ScheduleOptions, SolveMode,
    SolveOptions, SolverOptions,
};
use arbor_common::progress_ui::ProgressMode;
use clap::builder::{styling, PossibleValuesParser};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

/// A tactic file given for one function, as `--tactic m.f=path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TacticArg {
    pub func: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub src_path: PathBuf,
    pub annotations: Option<PathBuf>,
    pub tactics: Vec<TacticArg>,
    pub artifact_dir: Option<ArtifactDir>,
    pub progress: ProgressMode,
    pub options: SolveOptions,
}

const MODES: &[&str] = &["infer", "check"];
const RIGHT_SIDES: &[&str] = &["free", "rank-and-unit", "zero", "same"];
const DOMAINS: &[&str] = &["rational", "integer"];

fn parse_mode(s: &str) -> SolveMode {
    match s {
        "infer" => SolveMode::Infer,
        "check" => SolveMode::Check,
        _ => unreachable!(),
    }
}

fn parse_right_side(s: &str) -> RightSide {
    match s {
        "free" => RightSide::Free,
        "rank-and-unit" => RightSide::RankAndUnit,
        "zero" => RightSide::Zero,
        "same" => RightSide::Same,
        _ => unreachable!(),
    }
}

fn parse_domain(s: &str) -> Domain {
    match s {
        "rational" => Domain::Rational,
        "integer" => Domain::Integer,
        _ => unreachable!(),
    }
}

fn parse_tactic(s: &str) -> Result<TacticArg, String> {
    match s.split_once('=') {
        Some((func, path)) if !func.is_empty() && !path.is_empty() => Ok(TacticArg {
            func: func.to_owned(),
            path: PathBuf::from(path),
        }),
        _ => Err(format!("expected FUNCTION=PATH, got '{}'", s)),
    }
}

fn command() -> Command {
    let styles = styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Cyan.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default());

    Command::new("arbor")
        .version(std::env!("CARGO_PKG_VERSION"))
        .about(std::env!("CARGO_PKG_DESCRIPTION"))
        .styles(styles)
        .next_line_help(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("src-path")
                .help("Specify the source file to analyse.")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("annotations")
                .long("annotations")
                .value_parser(clap::value_parser!(PathBuf))
                .help(
                    "Read fixed annotations from this JSON file. Functions named in it are \
                    checked against the given bounds instead of having bounds inferred.",
                ),
        )
        .arg(
            Arg::new("tactic")
                .long("tactic")
                .value_name("FUNCTION=PATH")
                .value_parser(parse_tactic)
                .action(ArgAction::Append)
                .number_of_values(1)
                .help(
                    "Derive the body of FUNCTION as the JSON tactic at PATH prescribes. May be \
                    given once per function.",
                ),
        )
        .arg(
            Arg::new("proof-dir")
                .long("proof-dir")
                .value_parser(clap::value_parser!(PathBuf))
                .help(
                    "Write the derivation of every strongly connected component as JSON, along \
                    with its constraint system in SMT-LIB format, to this directory.",
                ),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_parser(PossibleValuesParser::new(MODES))
                .default_value("infer")
                .help("Minimise the bound of every function, or only check that bounds exist."),
        )
        .arg(
            Arg::new("right-side")
                .long("right-side")
                .value_parser(PossibleValuesParser::new(RIGHT_SIDES))
                .default_value("free")
                .help("Restrict the potential left in the results of inferred functions."),
        )
        .arg(
            Arg::new("infer-cf")
                .long("infer-cf")
                .action(ArgAction::SetTrue)
                .help("Infer a cost-free annotation for every function alongside its bound."),
        )
        .arg(
            Arg::new("domain")
                .long("domain")
                .value_parser(PossibleValuesParser::new(DOMAINS))
                .default_value("rational")
                .help("Set the domain of annotation coefficients."),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("900")
                .help("Give up on a single constraint system after this many seconds."),
        )
        .arg(
            Arg::new("deadline")
                .long("deadline")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .help(
                    "Stop starting new components after this many seconds. Functions left \
                    unanalysed are reported as skipped.",
                ),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(clap::value_parser!(usize))
                .default_value("8")
                .help("Analyse up to this many independent components at once."),
        )
        .arg(
            Arg::new("weaken")
                .long("weaken")
                .action(ArgAction::SetTrue)
                .help("Weaken before every terminal rule."),
        )
        .arg(
            Arg::new("auto")
                .long("auto")
                .action(ArgAction::SetTrue)
                .help("Weaken the context before every rule except 'ite'."),
        )
        .arg(
            Arg::new("no-tree-cf")
                .long("no-tree-cf")
                .action(ArgAction::SetTrue)
                .help("Derive tree-valued lets without cost-free side derivations."),
        )
        .arg(
            Arg::new("log-applications")
                .long("log-applications")
                .action(ArgAction::SetTrue)
                .help("Log every rule application at the debug level."),
        )
        .arg(
            Arg::new("max-param-index")
                .long("max-param-index")
                .value_parser(clap::value_parser!(u32))
                .default_value(HeuristicOptions::default().max_param_index.to_string())
                .help("Set the largest factor a tree may carry in a logarithmic term."),
        )
        .arg(
            Arg::new("max-offset")
                .long("max-offset")
                .value_parser(clap::value_parser!(u32))
                .default_value(HeuristicOptions::default().max_offset.to_string())
                .help("Set the largest constant in a logarithmic term."),
        )
        .arg(
            Arg::new("progress")
                .long("progress")
                .action(ArgAction::SetTrue)
                .help("Set whether or not to show progress"),
        )
}

impl Config {
    pub fn from_args() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Like [`Config::from_args`], for an explicit argument list.
    pub fn try_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let src_path: PathBuf = matches
            .get_one::<String>("src-path")
            .unwrap()
            .to_owned()
            .into();

        let artifact_dir = matches
            .get_one::<PathBuf>("proof-dir")
            .map(|dir_path| ArtifactDir {
                dir_path: dir_path.clone(),
                filename_prefix: src_path
                    .file_stem()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("arbor")),
            });

        let tactics = match matches.get_many::<TacticArg>("tactic") {
            Some(values) => values.cloned().collect(),
            None => Vec::new(),
        };

        let progress = if matches.get_flag("progress") {
            ProgressMode::Visible
        } else {
            ProgressMode::Hidden
        };

        let options = SolveOptions {
            mode: parse_mode(matches.get_one::<String>("mode").unwrap()),
            right_side: parse_right_side(matches.get_one::<String>("right-side").unwrap()),
            infer_cf: matches.get_flag("infer-cf"),
            prover: ProverOptions {
                weaken_before_terminal: matches.get_flag("weaken"),
                auto: matches.get_flag("auto"),
                tree_cf: !matches.get_flag("no-tree-cf"),
                log_applications: matches.get_flag("log-applications"),
            },
            heuristic: HeuristicOptions {
                max_param_index: *matches.get_one::<u32>("max-param-index").unwrap(),
                max_offset: *matches.get_one::<u32>("max-offset").unwrap(),
            },
            solver: SolverOptions {
                domain: parse_domain(matches.get_one::<String>("domain").unwrap()),
                timeout: Duration::from_secs(*matches.get_one::<u64>("timeout").unwrap()),
            },
            schedule: ScheduleOptions {
                threads: *matches.get_one::<usize>("threads").unwrap(),
                timeout: matches
                    .get_one::<u64>("deadline")
                    .map(|secs| Duration::from_secs(*secs)),
            },
        };

        Config {
            src_path,
            annotations: matches.get_one::<PathBuf>("annotations").cloned(),
            tactics,
            artifact_dir,
            progress,
            options,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = Config::try_from_iter(["arbor", "samples/tree.arb"]).unwrap();
        assert_eq!(config.src_path, PathBuf::from("samples/tree.arb"));
        assert!(config.annotations.is_none());
        assert!(config.tactics.is_empty());
        assert!(config.artifact_dir.is_none());
        assert_eq!(config.progress, ProgressMode::Hidden);
        assert_eq!(config.options.mode, SolveMode::Infer);
        assert_eq!(config.options.right_side, RightSide::Free);
        assert_eq!(config.options.prover, ProverOptions::default());
        assert_eq!(config.options.heuristic, HeuristicOptions::default());
        assert_eq!(config.options.solver, SolverOptions::default());
        assert_eq!(config.options.schedule, ScheduleOptions::default());
    }

    #[test]
    fn test_options() {
        let config = Config::try_from_iter([
            "arbor",
            "samples/tree.arb",
            "--tactic",
            "tree.f=f.json",
            "--tactic",
            "tree.g=g.json",
            "--proof-dir",
            "out",
            "--mode",
            "check",
            "--right-side",
            "rank-and-unit",
            "--domain",
            "integer",
            "--deadline",
            "30",
            "--no-tree-cf",
            "--auto",
        ])
        .unwrap();
        assert_eq!(
            config.tactics,
            vec![
                TacticArg {
                    func: "tree.f".to_owned(),
                    path: PathBuf::from("f.json"),
                },
                TacticArg {
                    func: "tree.g".to_owned(),
                    path: PathBuf::from("g.json"),
                },
            ]
        );
        let artifacts = config.artifact_dir.unwrap();
        assert_eq!(
            artifacts.artifact_path("f", "json"),
            PathBuf::from("out/tree.f.json")
        );
        assert_eq!(config.options.mode, SolveMode::Check);
        assert_eq!(config.options.right_side, RightSide::RankAndUnit);
        assert_eq!(config.options.solver.domain, Domain::Integer);
        assert_eq!(config.options.schedule.timeout, Some(Duration::from_secs(30)));
        assert!(!config.options.prover.tree_cf);
        assert!(config.options.prover.auto);
    }

    #[test]
    fn test_malformed_tactic() {
        assert!(Config::try_from_iter(["arbor", "a.arb", "--tactic", "f.json"]).is_err());
        assert!(Config::try_from_iter(["arbor", "a.arb", "--mode", "guess"]).is_err());
    }
}

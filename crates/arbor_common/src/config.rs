use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

/// Where per-SCC artifacts (proof DAGs, solver instances) are written, if anywhere.
#[derive(Clone, Debug)]
pub struct ArtifactDir {
    pub dir_path: PathBuf,
    pub filename_prefix: PathBuf,
}

impl ArtifactDir {
    /// `<dir>/<prefix>.<name>.<extension>`, where `name` identifies the SCC.
    pub fn artifact_path(&self, name: &str, extension: &(impl AsRef<OsStr> + ?Sized)) -> PathBuf {
        let mut file_name = self.filename_prefix.clone().into_os_string();
        file_name.push(".");
        file_name.push(name);
        file_name.push(".");
        file_name.push(extension);
        self.dir_path.join(file_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Domain {
    Integer,
    Rational,
}

impl Default for Domain {
    fn default() -> Self {
        Domain::Rational
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProverOptions {
    /// Schedule a structural weakening before every terminal rule.
    pub weaken_before_terminal: bool,
    /// Schedule a structural weakening before every non-terminal rule other than `ite`.
    pub auto: bool,
    /// Prefer `let:tree:cf` over `let:tree` for tree-valued lets.
    pub tree_cf: bool,
    pub log_applications: bool,
}

impl Default for ProverOptions {
    fn default() -> Self {
        ProverOptions {
            weaken_before_terminal: false,
            auto: false,
            tree_cf: true,
            log_applications: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeuristicOptions {
    /// Largest index a single tree parameter may carry.
    pub max_param_index: u32,
    /// Largest constant offset.
    pub max_offset: u32,
}

impl Default for HeuristicOptions {
    fn default() -> Self {
        HeuristicOptions {
            max_param_index: 1,
            max_offset: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolverOptions {
    pub domain: Domain,
    pub timeout: Duration,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            domain: Domain::default(),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub threads: usize,
    pub timeout: Option<Duration>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            threads: 8,
            timeout: None,
        }
    }
}

/// Constraints placed on the result annotation of every function before solving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RightSide {
    /// Leave the result annotation to the solver.
    Free,
    /// Only the rank and the unit index of the result may carry potential.
    RankAndUnit,
    /// The result carries no potential.
    Zero,
    /// All tree-valued functions of a module share one result annotation.
    Same,
}

impl Default for RightSide {
    fn default() -> Self {
        RightSide::Free
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SolveMode {
    /// Minimise the input potential of every function.
    Infer,
    /// Only check satisfiability.
    Check,
}

impl Default for SolveMode {
    fn default() -> Self {
        SolveMode::Infer
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SolveOptions {
    pub mode: SolveMode,
    pub right_side: RightSide,
    /// Give every function one cost-free companion annotation.
    pub infer_cf: bool,
    pub prover: ProverOptions,
    pub heuristic: HeuristicOptions,
    pub solver: SolverOptions,
    pub schedule: ScheduleOptions,
}

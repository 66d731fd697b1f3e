use std::path::PathBuf;
use thiserror::Error;

/// Failures loading, parsing or mutating a grid case.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("case file {path:?} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("case has no {0} matrix")]
    MissingSection(&'static str),

    #[error("{table} row {row} has {found} columns, at least {expected} are required")]
    Schema {
        table: &'static str,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("unknown catalog case {0:?}")]
    UnknownCatalog(String),

    #[error("bus {0} not found")]
    BusNotFound(usize),

    #[error("bus {0} is defined more than once")]
    DuplicateBus(usize),

    #[error("case has no reference bus")]
    NoReferenceBus,
}

/// Failures validating a scenario against its target case.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("buses {missing:?} not found in case {case:?}")]
    BusNotFound { case: String, missing: Vec<usize> },

    #[error("unit {index} at bus {bus}: {message}")]
    InvalidUnit {
        index: usize,
        bus: usize,
        message: String,
    },

    #[error(transparent)]
    Case(#[from] CaseError),
}

/// Failures at the call boundary of a solve engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start {program:?}: {source}")]
    Start {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine call failed: {message}")]
    Call { command: String, message: String },

    #[error("engine session closed unexpectedly")]
    SessionClosed,

    #[error("malformed value for {name:?}: {message}")]
    Value { name: String, message: String },

    #[error("result {table} has {found} columns, at least {expected} are required")]
    Schema {
        table: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("result {table} has {found} rows, expected {expected}")]
    Rows {
        table: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Case(#[from] CaseError),

    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Termination of the compensation optimizer other than optimal.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("profile {name:?} has {found} values, expected {expected}")]
    InvalidProfile {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("optimizer terminated with status {status}")]
    NotOptimal { status: String },
}

impl From<minilp::Error> for OptimizeError {
    fn from(err: minilp::Error) -> Self {
        OptimizeError::NotOptimal {
            status: format!("{:?}", err).to_lowercase(),
        }
    }
}

/// Failures reading or writing handoff files.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("handoff file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("handoff encoding: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("handoff format version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("missing field {0:?}")]
    MissingField(String),

    #[error("{0}")]
    Inconsistent(String),

    #[error("result run id {found} does not match scenario run id {expected}")]
    StaleRun { found: u64, expected: u64 },
}

/// Top level failure of a study run, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("case: {0}")]
    Case(#[from] CaseError),

    #[error("scenario: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("{mode} did not converge after {iterations} iterations")]
    NotConverged { mode: String, iterations: usize },

    #[error("compensation optimizer: {0}")]
    Optimize(#[from] OptimizeError),

    #[error("handoff: {0}")]
    Handoff(#[from] HandoffError),

    #[error("report: {0}")]
    Report(#[from] ReportError),
}

/// Failures rendering or persisting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("indicator {0:?} missing from result")]
    MissingIndicator(String),

    #[error("report file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

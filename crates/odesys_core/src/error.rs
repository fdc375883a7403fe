use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning equation text into an expression tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number literal \"{0}\"")]
    InvalidNumber(String),
    #[error("unexpected token {found} (expected {expected})")]
    UnexpectedToken { found: String, expected: &'static str },
    #[error("unexpected end of input (expected {0})")]
    UnexpectedEnd(&'static str),
    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),
}

/// Malformed reaction networks or ODE system declarations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("reaction {reaction} references unknown species \"{species}\"")]
    UnknownSpecies { reaction: usize, species: String },
    #[error("symbol \"{0}\" is declared more than once")]
    DuplicateSymbol(String),
    #[error("\"{0}\" is not a species of this system")]
    UnknownInitialCondition(String),
    #[error("no value given for parameter \"{0}\"")]
    MissingParameter(String),
    #[error("\"{0}\" is not a parameter of this system")]
    UnknownParameter(String),
    #[error("{what} dimension mismatch. Expected {expected}, got {got}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Failures while binding expressions to a numeric backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("symbol \"{0}\" is neither a state, a parameter nor the time variable")]
    UnboundSymbol(String),
    #[error("C compiler \"{compiler}\" could not be started")]
    CompilerUnavailable {
        compiler: String,
        #[source]
        source: std::io::Error,
    },
    #[error("compiling {source_file} with \"{compiler}\" failed ({status}):\n{stderr}")]
    Build {
        compiler: String,
        source_file: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("failed to load compiled module {module}")]
    Load {
        module: String,
        #[source]
        source: libloading::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the integration driver. A trajectory is never returned
/// alongside one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("step size {h:e} became too small at t = {t}")]
    StepSizeTooSmall { t: f64, h: f64 },
    #[error("exceeded {max_steps} steps before reaching t = {target} (stopped at t = {t})")]
    TooManySteps { t: f64, target: f64, max_steps: usize },
    #[error("state became non-finite at t = {t}")]
    NonFinite { t: f64 },
    #[error("iteration matrix is singular at t = {t}")]
    SingularMatrix { t: f64 },
    #[error("problem appears stiff at t = {t}; use an implicit method")]
    StiffnessDetected { t: f64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

pub type Result<T> = std::result::Result<T, Error>;

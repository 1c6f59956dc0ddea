use thiserror::Error;

/// Usage errors found while assembling a task specification.
///
/// These are diagnostics, not faults: the offending fragment is dropped
/// (or overridden) and the rest of the tree still builds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Task declared without a setup handler, skipping")]
    MissingSetupHandler,

    #[error("Group {kind} handler redefinition, overriding")]
    HandlerRedefined { kind: &'static str },

    #[error("Group execute mode redefinition, overriding")]
    ModeRedefined,

    #[error("Group workflow policy redefinition, overriding")]
    PolicyRedefined,

    #[error("{kind} may only be a child of a Group, skipping")]
    NotAGroup { kind: &'static str },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    #[error("The task tree is already running")]
    AlreadyRunning,

    #[error("The task tree is not running")]
    NotRunning,

    #[error("{operation}() called from one of the task tree handlers, ignoring")]
    Reentrant { operation: &'static str },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Thread pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, Error>;

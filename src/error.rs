use std::path::PathBuf;
use std::time::Duration;

use crate::version::PythonVersion;

/// Invalid configuration. Raised before any document is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid version {0:?}, expected MAJOR.MINOR")]
    InvalidVersion(String),

    #[error("min_version {min} is greater than max_version {max}")]
    EmptyRange {
        min: PythonVersion,
        max: PythonVersion,
    },

    #[error("version range {min}..={max} spans more than one major version")]
    SpansMajorVersions {
        min: PythonVersion,
        max: PythonVersion,
    },

    #[error("tab title template {0:?} contains no version placeholder")]
    MissingPlaceholder(String),

    #[error("tab title template {template:?} uses unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("at least one upgradable language tag must be configured")]
    NoLanguages,

    #[error("invalid upgrader command {command:?}: {reason}")]
    InvalidCommand { command: String, reason: String },
}

/// Failure of the modernization oracle for a single fragment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeError {
    #[error("could not parse source for Python {target}: {message}")]
    Unparseable {
        target: PythonVersion,
        message: String,
    },

    #[error("upgrader failed for Python {target}: {message}")]
    Fault {
        target: PythonVersion,
        message: String,
    },

    #[error("upgrader timed out after {after:?} for Python {target}")]
    Timeout {
        target: PythonVersion,
        after: Duration,
    },
}

/// Failure to locate or read a fragment. The affected block is passed through.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("cannot read included file {}", path.display())]
    UnreadableInclude {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve include path {0:?}")]
    UnresolvedInclude(String),

    #[error("malformed option in `{directive}` directive: {message}")]
    MalformedOption { directive: String, message: String },

    #[error("option `{option}` of `{directive}` is not supported")]
    UnsupportedOption { directive: String, option: String },

    #[error("cannot select lines from {}: {message}", path.display())]
    IncludeSelection { path: PathBuf, message: String },

    #[error("unknown pytabs marker {0:?}")]
    UnknownMarker(String),
}

/// A fragment-scoped problem surfaced through the host's warning channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-indexed line of the block that caused the problem.
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// A fragment failure that stops processing under the `fail` policy.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("line {line}: {source}")]
    Upgrade {
        line: usize,
        #[source]
        source: UpgradeError,
    },

    #[error("line {line}: {source}")]
    Locate {
        line: usize,
        #[source]
        source: LocatorError,
    },
}

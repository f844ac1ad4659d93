use std::fmt;
use std::path::PathBuf;

/// Main error type for dws operations
#[derive(Debug)]
pub enum DwsError {
    Io {
        source: std::io::Error,
        context: String,
    },
    /// A user-correctable precondition failure (uncommitted changes, unknown
    /// tag, name collision, ...). Aborts the current command.
    Config {
        message: String,
        path: Option<PathBuf>,
    },
    /// Violation of an invariant the implementation itself should have
    /// guaranteed. A defect, not a user error.
    Internal {
        message: String,
    },
    /// An operation structurally unavailable for a given resource variant.
    NotSupported {
        operation: String,
        reason: String,
    },
    /// Invalid command-line usage (bad flag combination, unknown name).
    Usage {
        message: String,
    },
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The user declined a confirmation prompt.
    Aborted,
    Generic {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl fmt::Display for DwsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DwsError::Io { context, .. } => {
                write!(f, "IO error during {}", context)
            }
            DwsError::Config { message, path } => {
                if let Some(path) = path {
                    write!(f, "Configuration error in {}: {}", path.display(), message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            DwsError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
            DwsError::NotSupported { operation, reason } => {
                write!(f, "Operation '{}' not supported: {}", operation, reason)
            }
            DwsError::Usage { message } => {
                write!(f, "{}", message)
            }
            DwsError::Command { command, exit_code, stderr } => {
                if let Some(code) = exit_code {
                    write!(f, "Command '{}' failed with exit code {}: {}", command, code, stderr)
                } else {
                    write!(f, "Command '{}' failed: {}", command, stderr)
                }
            }
            DwsError::Aborted => {
                write!(f, "Aborted by user")
            }
            DwsError::Generic { message, .. } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for DwsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DwsError::Io { source, .. } => Some(source),
            DwsError::Generic { source, .. } => source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl DwsError {
    pub fn config(message: impl Into<String>) -> Self {
        DwsError::Config { message: message.into(), path: None }
    }

    pub fn config_in(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DwsError::Config { message: message.into(), path: Some(path.into()) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DwsError::Internal { message: message.into() }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        DwsError::Usage { message: message.into() }
    }

    /// Exit code the binary should report for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            DwsError::Usage { .. } => 2,
            DwsError::Internal { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, DwsError>;

pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    fn with_io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::result::Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DwsError::Generic {
            message: f(),
            source: Some(Box::new(e)),
        })
    }

    fn with_io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DwsError::Io {
            source: e,
            context: f(),
        })
    }
}

impl<T> ErrorContext<T> for std::result::Result<T, DwsError> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DwsError::Generic {
            message: f(),
            source: Some(Box::new(e)),
        })
    }

    fn with_io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self
    }
}

impl<T> ErrorContext<T> for std::result::Result<T, serde_json::Error> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DwsError::Generic {
            message: f(),
            source: Some(Box::new(e)),
        })
    }

    fn with_io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.with_context(f)
    }
}

// Conversion from anyhow::Error for boundary interop
impl From<anyhow::Error> for DwsError {
    fn from(err: anyhow::Error) -> Self {
        DwsError::Generic {
            message: err.to_string(),
            source: None,
        }
    }
}

// Conversion to anyhow::Error for boundary interop is provided by anyhow's
// blanket `impl<E: StdError + Send + Sync + 'static> From<E> for anyhow::Error`
// since DwsError implements std::error::Error and is Send + Sync.

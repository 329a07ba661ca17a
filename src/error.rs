//! Error types for the catdoc sandbox.

use thiserror::Error;

/// Errors that can occur while extracting data through the sandbox.
#[derive(Error, Debug)]
pub enum CatdocError {
    /// Failed to build the engine or resolve the module's imports.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to compile the catdoc module.
    #[error("failed to load catdoc module: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The catdoc wasm file was not found.
    #[error("catdoc module not found at: {0}")]
    ModuleNotFound(String),

    /// Binding mounts, environment or sinks to a fresh instance failed.
    #[error("failed to instantiate catdoc module: {0}")]
    Instantiation(#[source] anyhow::Error),

    /// The module does not export the requested operation.
    #[error("catdoc module has no usable export `{0}`")]
    ExportNotFound(String),

    /// The call trapped for a reason other than a process exit.
    #[error("execution trapped: {0}")]
    Trap(#[source] anyhow::Error),

    /// The program exited with a non-zero status.
    #[error("catdoc exited with status {code}: {stderr}")]
    Exit {
        /// Exit status passed to `proc_exit`.
        code: i32,
        /// Captured stderr, trailing newlines trimmed.
        stderr: String,
        /// Captured stdout, trailing newlines trimmed.
        stdout: String,
    },

    /// The program completed but reported a problem on stderr.
    #[error("{message}")]
    Diagnostic {
        /// Captured stderr, trailing newlines trimmed.
        message: String,
        /// Whatever the program managed to write to stdout.
        stdout: String,
    },

    /// The call did not finish before its deadline.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The instance tried to grow memory past the configured limit.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// The operation needs an input document and none was given.
    #[error("operation `{0}` requires an input document")]
    MissingInput(&'static str),

    /// I/O error while preparing the input document or reading the module.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CatdocError {
    /// Stdout the program produced before failing, if there was any.
    ///
    /// Lets callers tell "usable result with a warning" apart from "no
    /// usable result".
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            CatdocError::Exit { stdout, .. } | CatdocError::Diagnostic { stdout, .. }
                if !stdout.is_empty() =>
            {
                Some(stdout.as_str())
            }
            _ => None,
        }
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CatdocError::Timeout(_))
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, CatdocError::MemoryLimitExceeded(_))
    }

    /// Check if the program exited with a non-zero status.
    pub fn is_exit(&self) -> bool {
        matches!(self, CatdocError::Exit { .. })
    }

    /// Check if the program completed but wrote diagnostics to stderr.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, CatdocError::Diagnostic { .. })
    }

    /// Check if the runtime could not be brought up.
    ///
    /// These errors are not cached; the next call retries initialization.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            CatdocError::RuntimeInit(_) | CatdocError::ModuleLoad(_) | CatdocError::ModuleNotFound(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, CatdocError>;

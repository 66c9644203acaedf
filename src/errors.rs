//! Error types for critical-CSS generation
//!
//! One public taxonomy covers the whole pipeline: option validation,
//! document loading, in-browser evaluation, and CSS processing each have
//! their own enum, and `CriticalError` folds them together for callers.

use thiserror::Error;

/// Result type alias for top-level operations
pub type CriticalResult<T> = Result<T, CriticalError>;

/// Top-level error returned by `create`, `generate` and friends
#[derive(Debug, Error)]
pub enum CriticalError {
    /// Option validation failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Strict mode and the document has no CSS to work with
    #[error("no stylesheets found in source document")]
    NoCss,

    /// Document or stylesheet resolution failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Critical-path evaluation failed
    #[error(transparent)]
    Evaluate(#[from] EvaluateError),

    /// CSS parsing or transformation failed
    #[error(transparent)]
    Css(#[from] CssError),

    /// Writing target files failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CriticalError {
    fn from(error: anyhow::Error) -> Self {
        CriticalError::Other(error.to_string())
    }
}

/// Option validation errors
///
/// Resolution stops at the first violated constraint, so a caller always
/// sees exactly one of these per failed call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither an HTML string nor a source path was supplied
    #[error("either 'html' or 'src' is required")]
    MissingSource,

    /// Both an HTML string and a source path were supplied
    #[error("'html' and 'src' are mutually exclusive")]
    ConflictingSources,

    /// A dimension entry has a zero width or height
    #[error("invalid dimension {width}x{height}: width and height must be positive")]
    InvalidDimension { width: u32, height: u32 },

    /// A fixed-by-construction evaluator field appeared in caller overrides
    #[error("evaluator option '{0}' is set by the pipeline and cannot be overridden")]
    ForbiddenEvaluatorField(&'static str),

    /// A `/…/` pattern failed to compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Document and stylesheet resolution errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// Local source file could not be read
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote document or stylesheet request failed
    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    /// Remote server answered with a non-success status
    #[error("'{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Source string could not be interpreted as a path or URL
    #[error("invalid source URL '{0}'")]
    InvalidUrl(String),

    /// Temp-file backing for a string source failed
    #[error("failed to stage HTML source: {0}")]
    Stage(#[from] std::io::Error),
}

/// Critical-path evaluation errors
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// Browser could not be located or launched
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Page navigation failed
    #[error("navigation to '{url}' failed: {message}")]
    Navigation { url: String, message: String },

    /// Navigation or script execution exceeded the configured timeout
    #[error("evaluation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// In-page script failed or returned an unexpected shape
    #[error("viewport script failed: {0}")]
    Script(String),

    /// Candidate stylesheet failed to parse
    #[error(transparent)]
    Css(#[from] CssError),
}

impl From<anyhow::Error> for EvaluateError {
    fn from(error: anyhow::Error) -> Self {
        EvaluateError::Script(error.to_string())
    }
}

impl EvaluateError {
    /// Check whether the failure was the per-dimension deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, EvaluateError::Timeout { .. })
    }
}

/// CSS engine errors
#[derive(Debug, Error)]
pub enum CssError {
    /// Stylesheet text could not be parsed at all
    #[error("CSS parse error: {0}")]
    Parse(String),

    /// A caller-supplied transform step failed
    #[error("post-process step failed: {0}")]
    Step(String),
}

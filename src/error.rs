use std::fmt;

/// Boxed error raised by middleware or by delegates stored in an environment.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while running a bridged pipeline.
#[derive(Debug)]
pub enum Error {
    /// A feature operation failed
    Feature(FeatureError),
    /// A middleware stage or delegate failed
    Handler(BoxError),
}

impl Error {
    /// Wraps an arbitrary middleware failure.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Error::Handler(err.into())
    }

    /// Returns the feature error kind, if this is a feature failure.
    pub fn feature_kind(&self) -> Option<FeatureErrorKind> {
        match self {
            Error::Feature(e) => Some(e.kind),
            Error::Handler(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Feature(e) => write!(f, "Feature error: {}", e),
            Error::Handler(e) => write!(f, "Handler error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Feature(e) => Some(e),
            Error::Handler(e) => Some(e.as_ref()),
        }
    }
}

impl From<FeatureError> for Error {
    fn from(e: FeatureError) -> Self {
        Error::Feature(e)
    }
}

/// A failed feature operation with details about what was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureError {
    /// The kind of failure
    pub kind: FeatureErrorKind,
    /// Names the missing capability, key or argument
    pub message: String,
}

impl FeatureError {
    /// Creates a new feature error.
    pub fn new(kind: FeatureErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::new(FeatureErrorKind::UnsupportedOperation, what)
    }

    pub(crate) fn not_implemented(what: impl Into<String>) -> Self {
        Self::new(FeatureErrorKind::NotImplemented, what)
    }

    pub(crate) fn key_not_found(what: impl Into<String>) -> Self {
        Self::new(FeatureErrorKind::KeyNotFound, what)
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FeatureError {}

/// The kind of feature failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureErrorKind {
    /// The backing environment lacks the primitive the operation needs,
    /// or the operation would mutate a read-only registry
    UnsupportedOperation,
    /// The operation is declared but intentionally not implemented
    NotImplemented,
    /// A registry lookup named a feature group that is not present
    KeyNotFound,
    /// An index lies outside the destination buffer
    ArgumentOutOfRange,
    /// The destination buffer is too small
    Argument,
}

impl fmt::Display for FeatureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureErrorKind::UnsupportedOperation => write!(f, "Unsupported operation"),
            FeatureErrorKind::NotImplemented => write!(f, "Not implemented"),
            FeatureErrorKind::KeyNotFound => write!(f, "Key not found"),
            FeatureErrorKind::ArgumentOutOfRange => write!(f, "Argument out of range"),
            FeatureErrorKind::Argument => write!(f, "Invalid argument"),
        }
    }
}

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;
use tracing_error::SpanTrace;

/// Categorizes backend failures by their semantic meaning, independent of
/// which destination implementation produced them.
///
/// Protocol frontends use the kind (through the facade's classifier
/// predicates) to decide a response code without inspecting error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The tag, manifest, or blob does not exist in the repository.
    NotFound,

    /// The registry rejected the request's credentials.
    Auth,

    /// The request or response failed in transit, or the registry answered
    /// with an unexpected status.
    Transport,

    /// Local file or stream I/O failed.
    Io,

    /// The repository reference could not be composed or parsed.
    InvalidReference,

    /// The request was rejected as malformed (bad digest, bad upload).
    InvalidRequest,

    /// A response payload could not be decoded.
    Serialization,

    /// An unexpected or uncategorized failure.
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::NotFound => write!(f, "not found"),
            BackendErrorKind::Auth => write!(f, "authentication rejected"),
            BackendErrorKind::Transport => write!(f, "transport failure"),
            BackendErrorKind::Io => write!(f, "I/O error"),
            BackendErrorKind::InvalidReference => write!(f, "invalid reference"),
            BackendErrorKind::InvalidRequest => write!(f, "invalid request"),
            BackendErrorKind::Serialization => write!(f, "serialization error"),
            BackendErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Capture is controlled by the RUST_BACKTRACE environment variable.
    backtrace: Backtrace,

    /// Span context at the point the error was created, giving the logical
    /// async call stack.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// A failure reported by a destination repository.
///
/// Carries the semantic [`BackendErrorKind`], the backend name, the
/// repository and reference involved, the HTTP status when one was
/// observed, and the underlying error chain.
#[derive(Debug)]
pub struct BackendError {
    kind: BackendErrorKind,
    backend: &'static str,
    repo: Option<String>,
    reference: Option<String>,
    status: Option<StatusCode>,
    context: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    traces: Box<ErrorTrace>,
}

impl BackendError {
    /// Create a new error with no underlying cause.
    pub fn new(backend: &'static str, kind: BackendErrorKind) -> Self {
        Self {
            kind,
            backend,
            repo: None,
            reference: None,
            status: None,
            context: None,
            source: None,
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a new error wrapping an underlying cause.
    pub fn wrap<E>(backend: &'static str, kind: BackendErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            source: Some(source.into()),
            ..Self::new(backend, kind)
        }
    }

    /// Attach the repository name.
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Attach the tag or digest the operation addressed.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attach the HTTP status the registry answered with.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a short description of the failing operation.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns the backend name.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Returns the HTTP status, if the failure carried one.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Whether the failure reports missing content.
    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns the span context captured when the error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend error [{}] from {}", self.kind, self.backend)?;

        if let Some(repo) = &self.repo {
            write!(f, " (repo: {repo})")?;
        }

        if let Some(reference) = &self.reference {
            write!(f, " (ref: {reference})")?;
        }

        if let Some(status) = &self.status {
            write!(f, " (status: {status})")?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }

        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_context() {
        let err = BackendError::new("remote", BackendErrorKind::NotFound)
            .with_repo("packages/demo")
            .with_reference("1.0.0")
            .with_context("resolve manifest");
        let rendered = err.to_string();
        assert!(rendered.contains("not found"));
        assert!(rendered.contains("packages/demo"));
        assert!(rendered.contains("1.0.0"));
        assert!(rendered.contains("resolve manifest"));
    }

    #[test]
    fn status_is_queryable() {
        let err = BackendError::new("remote", BackendErrorKind::Auth)
            .with_status(StatusCode::UNAUTHORIZED);
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(!err.is_not_found());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BackendError::wrap("remote", BackendErrorKind::Transport, io);
        let source = std::error::Error::source(&err).expect("wrapped source");
        assert!(source.to_string().contains("reset"));
    }
}

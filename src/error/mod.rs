use thiserror::Error;

pub mod pages;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export error page resolution for easy access
pub use pages::ErrorPages;

/// Main error type for the edgekit server core
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed percent-encoding in a URL or captured parameter.
    /// Surfaced to the client as 400.
    #[error("failed to decode param: {0}")]
    Decode(String),

    /// The pages manifest has no entry for the requested page.
    #[error("Cannot find module for page: {0}")]
    PageNotFound(String),

    /// Internal signal: a dynamic page has no fallback configured.
    /// Recovered by the routing engine when bubbling is enabled,
    /// otherwise rendered as 404.
    #[error("no fallback configured for dynamic page")]
    NoFallback,

    /// An error produced during a development build. Rendered to the
    /// error page without being logged as a server error.
    #[error("{0}")]
    WrappedBuild(Box<Error>),

    /// An edge function mutated its response after the terminal
    /// transition. Programmer error, fatal to that function.
    #[error("the response has already ended")]
    HeadersSent,

    /// The edge-function rewrite chain exceeded the recursion cap.
    #[error("too many edge function calls for {0}")]
    TooManyEdgeCalls(String),

    /// Upstream failure while proxying an external rewrite.
    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn page_not_found(page: impl Into<String>) -> Self {
        Self::PageNotFound(page.into())
    }

    pub fn wrapped_build(inner: Error) -> Self {
        Self::WrappedBuild(Box::new(inner))
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The HTTP status this error maps to at the outermost handler.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Decode(_) => 400,
            Error::PageNotFound(_) | Error::NoFallback => 404,
            Error::Proxy(_) => 502,
            Error::WrappedBuild(inner) => inner.status_code(),
            _ => 500,
        }
    }

    /// Whether this error should be logged as a server error.
    ///
    /// Build errors are shown on the error page instead of polluting
    /// the server log; 4xx-mapped errors are client mistakes.
    pub fn is_server_error(&self) -> bool {
        !matches!(
            self,
            Error::WrappedBuild(_) | Error::Decode(_) | Error::PageNotFound(_) | Error::NoFallback
        )
    }

    /// Unwrap a development build error to the error it wraps.
    pub fn unwrap_build_error(self) -> Error {
        match self {
            Error::WrappedBuild(inner) => *inner,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Error::decode("bad %").status_code(), 400);
        assert_eq!(Error::page_not_found("/missing").status_code(), 404);
        assert_eq!(Error::NoFallback.status_code(), 404);
        assert_eq!(Error::proxy("upstream reset").status_code(), 502);
        assert_eq!(Error::internal("boom").status_code(), 500);
        assert_eq!(Error::HeadersSent.status_code(), 500);
        assert_eq!(Error::TooManyEdgeCalls("/a".into()).status_code(), 500);
    }

    #[test]
    fn test_wrapped_build_error_delegates() {
        let wrapped = Error::wrapped_build(Error::page_not_found("/gone"));
        assert_eq!(wrapped.status_code(), 404);
        assert!(!wrapped.is_server_error());
        assert!(matches!(
            wrapped.unwrap_build_error(),
            Error::PageNotFound(_)
        ));
    }

    #[test]
    fn test_server_error_classification() {
        assert!(Error::internal("boom").is_server_error());
        assert!(Error::TooManyEdgeCalls("/loop".into()).is_server_error());
        assert!(!Error::decode("%zz").is_server_error());
        assert!(!Error::NoFallback.is_server_error());
    }
}

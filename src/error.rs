//! Error type shared by the config store, the service client and the router.

use thiserror::Error;

/// Exit code for a successful command (and for help output).
pub const EXIT_OK: i32 = 0;
/// Exit code for runtime failures: network, service, persistence, local I/O.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for bad or missing command-line arguments.
pub const EXIT_USAGE: i32 = 2;

/// Every failure the client knows how to report. Messages are kept to a
/// single line so they can be printed as-is.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad or missing CLI input, detected before any network call.
    #[error("usage error: {0}")]
    Usage(String),

    /// The config file could not be written.
    #[error("failed to save configuration: {0}")]
    Persistence(String),

    /// The service could not be reached. `transient` errors are retried.
    #[error("network error: {reason}")]
    Network { reason: String, transient: bool },

    /// The service answered with a non-success status.
    #[error("service returned HTTP {status}: {reason}")]
    Service { status: u16, reason: String },

    /// The service answered with something the client cannot use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A local file or directory could not be read or written.
    #[error("{0}")]
    LocalIo(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network { transient: true, .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Usage(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    pub(crate) fn local_io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        ClientError::LocalIo(format!("{context}: {err}"))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ClientError::Service {
                status: status.as_u16(),
                reason: single_line(&err.to_string()),
            };
        }
        if err.is_builder() {
            return ClientError::Usage(single_line(&err.to_string()));
        }
        if err.is_decode() {
            return ClientError::MalformedResponse(single_line(&err.to_string()));
        }
        let transient = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        ClientError::Network {
            reason: describe_reqwest_error(&err),
            transient,
        }
    }
}

/// reqwest's top-level message ("error sending request for url ...") hides the
/// interesting part, so append the innermost source.
fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let mut root = None;
    let mut current = std::error::Error::source(err);
    while let Some(source) = current {
        root = Some(source);
        current = source.source();
    }
    let reason = match root {
        _ if err.is_timeout() => format!("request timed out ({err})"),
        Some(root) => format!("{err}: {root}"),
        None => err.to_string(),
    };
    single_line(&reason)
}

/// Collapse whitespace runs (including newlines) into single spaces.
pub(crate) fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_map_to_exit_two() {
        assert_eq!(ClientError::Usage("missing --file".into()).exit_code(), EXIT_USAGE);
        assert_eq!(ClientError::LocalIo("file not found".into()).exit_code(), EXIT_FAILURE);
        assert_eq!(
            ClientError::Service { status: 400, reason: "bad".into() }.exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn only_transient_network_errors_are_transient() {
        let timeout = ClientError::Network { reason: "timed out".into(), transient: true };
        let refused = ClientError::Network { reason: "tls".into(), transient: false };
        let service = ClientError::Service { status: 503, reason: "busy".into() };
        assert!(timeout.is_transient());
        assert!(!refused.is_transient());
        assert!(!service.is_transient());
    }

    #[test]
    fn single_line_collapses_newlines() {
        assert_eq!(single_line("quota\n  exceeded\r\n"), "quota exceeded");
    }
}

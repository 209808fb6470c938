use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used for underlying transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for the Sync Service SDK
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Sync Service SDK
#[derive(Error, Debug)]
pub enum Error {
    /// Dialing the service failed (TCP or Unix socket alike)
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// Any other failure inside the HTTP transport
    #[error("HTTP transport error: {0}")]
    Transport(#[source] BoxError),

    /// The request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a status the operation does not accept
    #[error("Sync Service returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The object addressed by a state-changing operation does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while streaming object data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Metadata rejected before it was sent
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// A poller for this object type is already active on the client
    #[error("A poller is already running for object type {0}")]
    PollerAlreadyRunning(String),
}

impl Error {
    /// HTTP status carried by a protocol error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::NotFound(_) => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }

    /// Whether the service reported the target as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the failure happened while establishing a connection
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connect { .. })
    }

    pub(crate) fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_connect() {
            Error::Connect {
                endpoint: endpoint.to_string(),
                source: Box::new(err),
            }
        } else if err.is_decode() {
            Error::InvalidResponse(err.to_string())
        } else {
            Error::Transport(Box::new(err))
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("model:v1".to_string());
        assert_eq!(err.to_string(), "Object not found: model:v1");
    }

    #[test]
    fn test_status_error_carries_code() {
        let err = Error::Status {
            status: StatusCode::CONFLICT,
            body: "object is being updated".to_string(),
        };
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert!(err.to_string().contains("409"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_status() {
        let err = Error::NotFound("x".to_string());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_connect_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::Connect {
            endpoint: "unix:/tmp/ess.sock".to_string(),
            source: Box::new(io),
        };
        assert!(err.is_connect());
        assert!(err.to_string().contains("/tmp/ess.sock"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_configuration_error() {
        let err = Error::Configuration("invalid config".to_string());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_url_parse_error_is_invalid_url() {
        fn parse(raw: &str) -> Result<url::Url> {
            Ok(url::Url::parse(raw)?)
        }
        assert!(matches!(parse("not a url"), Err(Error::InvalidUrl(_))));
        assert!(parse("http://app.local/hook").is_ok());
    }
}

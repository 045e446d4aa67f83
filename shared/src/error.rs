//! Error taxonomy shared by the client and server engines
//!
//! Registry and directory code raise the narrow variants; the dispatch
//! boundary widens them to a [`ResponseCode`] with [`Error::response_code`],
//! and the requesting side narrows a response back with
//! [`Error::from_response`].

use thiserror::Error;

use crate::message::{Address, Response, ResponseCode};
use crate::path::ResourcePath;

/// Which part of an address failed to resolve
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("object {0} not found")]
    Object(u16),

    #[error("instance {0} not found")]
    Instance(ResourcePath),

    #[error("resource {0} not found")]
    Resource(ResourcePath),

    #[error("device {0} not found")]
    Device(String),

    /// A 4.04 answered by a remote endpoint; the protocol does not say which
    /// segment failed
    #[error("{0} not found on remote endpoint")]
    Remote(String),
}

/// Failures of the underlying message transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no endpoint listening at {0}")]
    Unreachable(Address),

    #[error("address already bound: {0}")]
    AddressInUse(Address),

    #[error("transport closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("{0} already exists")]
    AlreadyExists(ResourcePath),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Protocol status code this error is reported with
    pub fn response_code(&self) -> ResponseCode {
        match self {
            // Unknown object types are reported like missing instances
            Error::NotFound(_) | Error::InvalidPath(_) => ResponseCode::NotFound,
            Error::AlreadyExists(_) | Error::BadRequest(_) => ResponseCode::BadRequest,
            Error::MethodNotAllowed(_) => ResponseCode::MethodNotAllowed,
            Error::Timeout => ResponseCode::GatewayTimeout,
            Error::Internal(_) | Error::Cancelled | Error::Transport(_) => {
                ResponseCode::InternalServerError
            }
        }
    }

    /// Diagnostic text carried in an error response; the response code
    /// already names the category
    pub fn diagnostic(&self) -> String {
        match self {
            Error::InvalidPath(message)
            | Error::MethodNotAllowed(message)
            | Error::BadRequest(message)
            | Error::Internal(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Turn a non-success response into an error; `target` names what the
    /// request addressed. Returns `None` for success codes.
    pub fn from_response(response: &Response, target: &str) -> Option<Self> {
        if response.code.is_success() {
            return None;
        }
        let diagnostic = String::from_utf8_lossy(&response.payload).into_owned();
        let error = match response.code {
            ResponseCode::NotFound => Error::NotFound(NotFound::Remote(target.to_string())),
            ResponseCode::MethodNotAllowed => Error::MethodNotAllowed(if diagnostic.is_empty() {
                target.to_string()
            } else {
                diagnostic
            }),
            ResponseCode::BadRequest => Error::BadRequest(diagnostic),
            ResponseCode::GatewayTimeout => Error::Timeout,
            _ => Error::Internal(diagnostic),
        };
        Some(error)
    }

    /// Whether a requester may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Token;

    #[test]
    fn test_not_found_variants_map_to_4_04() {
        let path = ResourcePath::resource(3, 7, 1);
        for error in [
            Error::from(NotFound::Object(99)),
            Error::from(NotFound::Instance(path.instance_path())),
            Error::from(NotFound::Resource(path)),
            Error::InvalidPath("/99".into()),
        ] {
            assert_eq!(error.response_code(), ResponseCode::NotFound);
            assert_eq!(error.response_code().to_string(), "4.04 Not Found");
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::MethodNotAllowed("execute".into()).response_code(),
            ResponseCode::MethodNotAllowed
        );
        assert_eq!(Error::BadRequest("empty".into()).response_code(), ResponseCode::BadRequest);
        assert_eq!(
            Error::AlreadyExists(ResourcePath::instance(3, 0)).response_code(),
            ResponseCode::BadRequest
        );
    }

    #[test]
    fn test_from_response() {
        let ok = Response::new(Token(1), ResponseCode::Content);
        assert!(Error::from_response(&ok, "/3/0/1").is_none());

        let missing = Response::new(Token(1), ResponseCode::NotFound);
        assert_eq!(
            Error::from_response(&missing, "/3/7/1"),
            Some(Error::NotFound(NotFound::Remote("/3/7/1".into())))
        );

        let rejected = Response::new(Token(1), ResponseCode::BadRequest).with_payload("empty value");
        assert_eq!(
            Error::from_response(&rejected, "/3/0/1"),
            Some(Error::BadRequest("empty value".into()))
        );
    }

    #[test]
    fn test_error_response_round_trip_keeps_message() {
        let error = Error::BadRequest("value out of range".into());
        assert_eq!(error.diagnostic(), "value out of range");

        let response = Response::from_error(Token(4), &error);
        assert_eq!(response.code, ResponseCode::BadRequest);
        assert_eq!(response.payload, "value out of range");
        assert_eq!(Error::from_response(&response, "/3/6/1"), Some(error));

        let internal = Response::from_error(Token(4), &Error::Internal("handler panicked".into()));
        assert_eq!(
            Error::from_response(&internal, "/3/6/1"),
            Some(Error::Internal("handler panicked".into()))
        );

        let missing = Error::from(NotFound::Object(9));
        assert_eq!(missing.diagnostic(), "object 9 not found");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Transport(TransportError::Closed).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::from(NotFound::Object(3)).is_retryable());
    }
}

//! Engine-level request/response model
//!
//! These types are what the engine exchanges with the transport. Encoding them
//! to bytes on a wire is the transport's business.

use bytes::Bytes;
use std::fmt;

use crate::error::Error;

/// Transport address of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Correlation token pairing a request with its response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Request methods understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Response status codes, rendered the way the protocol writes them
/// (`class.detail`, e.g. `4.04`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Created,
    Deleted,
    Changed,
    Content,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
    GatewayTimeout,
}

impl ResponseCode {
    /// Code class (2 = success, 4 = client error, 5 = server error)
    pub fn class(&self) -> u8 {
        match self {
            ResponseCode::Created
            | ResponseCode::Deleted
            | ResponseCode::Changed
            | ResponseCode::Content => 2,
            ResponseCode::BadRequest | ResponseCode::NotFound | ResponseCode::MethodNotAllowed => 4,
            ResponseCode::InternalServerError | ResponseCode::GatewayTimeout => 5,
        }
    }

    pub fn detail(&self) -> u8 {
        match self {
            ResponseCode::Created => 1,
            ResponseCode::Deleted => 2,
            ResponseCode::Changed => 4,
            ResponseCode::Content => 5,
            ResponseCode::BadRequest => 0,
            ResponseCode::NotFound => 4,
            ResponseCode::MethodNotAllowed => 5,
            ResponseCode::InternalServerError => 0,
            ResponseCode::GatewayTimeout => 4,
        }
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ResponseCode::Created => "Created",
            ResponseCode::Deleted => "Deleted",
            ResponseCode::Changed => "Changed",
            ResponseCode::Content => "Content",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::NotFound => "Not Found",
            ResponseCode::MethodNotAllowed => "Method Not Allowed",
            ResponseCode::InternalServerError => "Internal Server Error",
            ResponseCode::GatewayTimeout => "Gateway Timeout",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} {}", self.class(), self.detail(), self.reason())
    }
}

/// An outbound or inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Assigned by the exchange when the request is issued
    pub token: Token,
    pub method: Method,
    pub path: String,
    /// Query parameters in `key=value` form
    pub query: Vec<String>,
    pub payload: Bytes,
    pub observe: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            token: Token::default(),
            method,
            path: path.into(),
            query: Vec::new(),
            payload: Bytes::new(),
            observe: false,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.query.push(format!("{key}={value}"));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_observe(mut self) -> Self {
        self.observe = true;
        self
    }

    /// Look up a query parameter by key
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// A response to a previously issued request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: Token,
    pub code: ResponseCode,
    pub payload: Bytes,
    /// Location of a created resource (registration replies)
    pub location: Option<String>,
}

impl Response {
    pub fn new(token: Token, code: ResponseCode) -> Self {
        Self {
            token,
            code,
            payload: Bytes::new(),
            location: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Build the error response for a failed request
    pub fn from_error(token: Token, error: &Error) -> Self {
        Self::new(token, error.response_code()).with_payload(error.diagnostic())
    }
}

/// Anything carried by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn token(&self) -> Token {
        match self {
            Message::Request(request) => request.token,
            Message::Response(response) => response.token,
        }
    }
}

/// A message delivered by the transport, tagged with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub source: Address,
    pub message: Message,
}

//! LWM2M Shared Protocol Types
//!
//! This crate provides the types shared by the LWM2M server and client
//! engines: resource paths, the request/response model and its status codes,
//! the error taxonomy, the transport abstraction and the request exchange
//! that correlates responses with in-flight requests.

pub mod error;
pub mod exchange;
pub mod link;
pub mod message;
pub mod operation;
pub mod path;
pub mod registration;
pub mod state_machine;
pub mod transport;

pub use error::{Error, NotFound, TransportError};
pub use exchange::{Exchange, InFlightSummary, PendingRequest, RequestOptions};
pub use message::{Address, Inbound, Message, Method, Request, Response, ResponseCode, Token};
pub use operation::OperationKind;
pub use path::ResourcePath;
pub use registration::DeviceId;
pub use state_machine::{RegistrationEvent, RegistrationState, RegistrationStateMachine};
pub use transport::{MemoryNetwork, MemoryTransport, Transport};

/// Default protocol parameters
pub mod defaults {
    /// Registration lease when the client does not ask for one (seconds)
    pub const LEASE_SECS: u64 = 86_400;

    /// Shortest lease the server accepts (seconds)
    pub const MIN_LEASE_SECS: u64 = 1;

    /// Longest lease the server accepts (seconds)
    pub const MAX_LEASE_SECS: u64 = u32::MAX as u64;

    /// Time to wait for a response to one request attempt
    pub const REQUEST_TIMEOUT_MS: u64 = 2_000;

    /// Re-sends after the first attempt before a request fails with Timeout
    pub const MAX_RETRIES: u32 = 3;

    /// How often the server sweeps expired registrations
    pub const SWEEP_INTERVAL_MS: u64 = 1_000;

    /// Longest a client-side handler may run before the request fails
    pub const HANDLER_TIMEOUT_MS: u64 = 5_000;

    /// Answered requests a client remembers to recognise re-sends
    pub const DEDUP_CAPACITY: usize = 256;

    /// Inbound message queue depth per transport endpoint
    pub const TRANSPORT_CHANNEL_CAPACITY: usize = 100;

    /// Path segment of the registration interface
    pub const REGISTRATION_PATH: &str = "rd";
}

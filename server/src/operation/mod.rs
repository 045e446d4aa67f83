//! Outbound device management operations
//!
//! This module handles:
//! - Resolving a device id to its registered transport address
//! - Issuing read/write/execute/observe/create/delete requests
//! - Correlating responses, retrying on timeout and cancellation
//! - Translating response codes into errors for the caller

mod coordinator;

pub use coordinator::{OperationContext, OperationCoordinator, PendingOperation};

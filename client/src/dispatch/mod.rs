//! Handler dispatch for server-initiated operations
//!
//! This module handles:
//! - Application handlers bound per server and operation kind
//! - Validating request paths against the registry before any handler runs
//! - Falling back to registry storage when no handler is bound
//! - Ordered execution per object instance
//! - Recognising re-sent requests

mod dispatcher;
mod handlers;
mod queue;

pub use dispatcher::Dispatcher;
pub use handlers::{
    ExecuteHandler, ExecuteRequest, Handler, HandlerTable, ReadHandler, ReadRequest, WriteHandler,
    WriteRequest,
};
pub use queue::PathQueues;

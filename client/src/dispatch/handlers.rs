//! Application handlers for server-initiated operations

use async_trait::async_trait;
use bytes::Bytes;
use lwm2m_shared::{Address, Error, OperationKind, ResourcePath};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A read (or observe) addressed at one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub object_type: u16,
    pub instance_id: u16,
    pub resource_id: u16,
    /// Value currently stored in the registry, if any
    pub value: Option<Bytes>,
}

/// A write addressed at one resource
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub object_type: u16,
    pub instance_id: u16,
    pub resource_id: u16,
    pub value: Bytes,
}

/// An execute addressed at one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub object_type: u16,
    pub instance_id: u16,
    pub resource_id: u16,
    /// Empty when the server passed no arguments
    pub arguments: Bytes,
}

macro_rules! request_path {
    ($ty:ty) => {
        impl $ty {
            pub fn path(&self) -> ResourcePath {
                ResourcePath::resource(self.object_type, self.instance_id, self.resource_id)
            }
        }
    };
}

request_path!(ReadRequest);
request_path!(WriteRequest);
request_path!(ExecuteRequest);

#[async_trait]
pub trait ReadHandler: Send + Sync {
    /// Produce the value returned to the server
    async fn read(&self, request: ReadRequest) -> Result<Bytes, Error>;
}

#[async_trait]
pub trait WriteHandler: Send + Sync {
    /// Accept or reject a value; on success it is stored in the registry
    async fn write(&self, request: WriteRequest) -> Result<(), Error>;
}

#[async_trait]
pub trait ExecuteHandler: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> ReadHandler for F
where
    F: Fn(ReadRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Error>> + Send + 'static,
{
    async fn read(&self, request: ReadRequest) -> Result<Bytes, Error> {
        (self)(request).await
    }
}

#[async_trait]
impl<F, Fut> WriteHandler for F
where
    F: Fn(WriteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn write(&self, request: WriteRequest) -> Result<(), Error> {
        (self)(request).await
    }
}

#[async_trait]
impl<F, Fut> ExecuteHandler for F
where
    F: Fn(ExecuteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn execute(&self, request: ExecuteRequest) -> Result<(), Error> {
        (self)(request).await
    }
}

/// A handler tagged with the operation it serves
#[derive(Clone)]
pub enum Handler {
    Read(Arc<dyn ReadHandler>),
    Write(Arc<dyn WriteHandler>),
    Execute(Arc<dyn ExecuteHandler>),
    Observe(Arc<dyn ReadHandler>),
}

impl Handler {
    pub fn read(handler: impl ReadHandler + 'static) -> Self {
        Handler::Read(Arc::new(handler))
    }

    pub fn write(handler: impl WriteHandler + 'static) -> Self {
        Handler::Write(Arc::new(handler))
    }

    pub fn execute(handler: impl ExecuteHandler + 'static) -> Self {
        Handler::Execute(Arc::new(handler))
    }

    pub fn observe(handler: impl ReadHandler + 'static) -> Self {
        Handler::Observe(Arc::new(handler))
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Handler::Read(_) => OperationKind::Read,
            Handler::Write(_) => OperationKind::Write,
            Handler::Execute(_) => OperationKind::Execute,
            Handler::Observe(_) => OperationKind::Observe,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.kind())
    }
}

/// Handler bindings per (server, operation kind)
///
/// Binding a handler replaces any earlier one for the same key.
#[derive(Debug, Default)]
pub struct HandlerTable {
    bindings: RwLock<HashMap<(Address, OperationKind), Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` for requests from `server`, returning the one it replaced
    pub async fn bind(&self, server: &Address, handler: Handler) -> Option<Handler> {
        self.bindings
            .write()
            .await
            .insert((server.clone(), handler.kind()), handler)
    }

    pub async fn unbind(&self, server: &Address, kind: OperationKind) -> Option<Handler> {
        self.bindings.write().await.remove(&(server.clone(), kind))
    }

    pub async fn get(&self, server: &Address, kind: OperationKind) -> Option<Handler> {
        self.bindings.read().await.get(&(server.clone(), kind)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }
}

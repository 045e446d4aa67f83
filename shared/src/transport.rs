//! Transport abstraction for pluggable message backends
//!
//! The engine only needs three things from a transport: its own address, a
//! source of fresh correlation tokens, and a way to send a [`Message`] to an
//! [`Address`]. Inbound traffic arrives on the `mpsc::Receiver<Inbound>`
//! handed out when the transport is bound; each engine consumes it from a
//! single task started at startup.
//!
//! [`MemoryNetwork`] is an in-process loopback used by tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::defaults;
use crate::error::TransportError;
use crate::message::{Address, Inbound, Message, Token};

/// A bound transport endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other endpoints reach this one at
    fn local_address(&self) -> &Address;

    /// Allocate a correlation token unique on this transport
    fn next_token(&self) -> Token;

    /// Send a message to `to`
    async fn send(&self, to: &Address, message: Message) -> Result<(), TransportError>;
}

#[derive(Default)]
struct NetworkInner {
    endpoints: RwLock<HashMap<Address, mpsc::Sender<Inbound>>>,
    /// Messages to silently lose, per destination
    drops: RwLock<HashMap<Address, u32>>,
    tokens: AtomicU64,
}

/// In-process network connecting [`MemoryTransport`] endpoints
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint at `address`
    pub async fn bind(
        &self,
        address: Address,
    ) -> Result<(MemoryTransport, mpsc::Receiver<Inbound>), TransportError> {
        let mut endpoints = self.inner.endpoints.write().await;
        if endpoints.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }

        let (tx, rx) = mpsc::channel(defaults::TRANSPORT_CHANNEL_CAPACITY);
        endpoints.insert(address.clone(), tx);
        debug!("Bound memory endpoint {}", address);

        let transport = MemoryTransport {
            network: self.clone(),
            address,
        };
        Ok((transport, rx))
    }

    /// Remove an endpoint; later sends to it fail with `Unreachable`
    pub async fn unbind(&self, address: &Address) {
        self.inner.endpoints.write().await.remove(address);
        debug!("Unbound memory endpoint {}", address);
    }

    /// Lose the next `count` messages addressed to `to`
    pub async fn drop_next(&self, to: &Address, count: u32) {
        *self.inner.drops.write().await.entry(to.clone()).or_insert(0) += count;
    }

    async fn deliver(&self, from: &Address, to: &Address, message: Message) -> Result<(), TransportError> {
        {
            let mut drops = self.inner.drops.write().await;
            if let Some(remaining) = drops.get_mut(to) {
                if *remaining > 0 {
                    *remaining -= 1;
                    trace!("Dropping message {} -> {} (token {})", from, to, message.token());
                    return Ok(());
                }
            }
        }

        let sender = self
            .inner
            .endpoints
            .read()
            .await
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;

        sender
            .send(Inbound {
                source: from.clone(),
                message,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Endpoint on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: Address,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> &Address {
        &self.address
    }

    fn next_token(&self) -> Token {
        Token(self.network.inner.tokens.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn send(&self, to: &Address, message: Message) -> Result<(), TransportError> {
        self.network.deliver(&self.address, to, message).await
    }
}

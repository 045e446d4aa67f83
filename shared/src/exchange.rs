//! Request/response correlation with timeouts and retries
//!
//! This module handles:
//! - Assigning a correlation token to each outbound request
//! - Tracking in-flight requests until their response arrives
//! - Re-sending with the same token when an attempt times out
//! - Cancellation, singly or all at once on shutdown
//!
//! Each in-flight entry owns a oneshot completion. Whoever removes the entry
//! from the table is the only party allowed to resolve it, so an entry can
//! never be resolved twice and a late response for a removed entry is
//! discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::defaults;
use crate::error::Error;
use crate::message::{Address, Message, Request, Response, Token};
use crate::transport::Transport;

/// Per-request timeout and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// How long to wait for a response to each attempt
    pub timeout: Duration,
    /// Re-sends allowed after the first attempt
    pub max_retries: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(defaults::REQUEST_TIMEOUT_MS),
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

impl RequestOptions {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }
}

type Completion = oneshot::Sender<Result<Response, Error>>;

/// A sent request awaiting its response
struct InFlight<C> {
    context: C,
    target: Address,
    request: Request,
    issued_at: Instant,
    retries: u32,
    completion: Completion,
}

/// Snapshot of an in-flight request
#[derive(Debug, Clone)]
pub struct InFlightSummary<C> {
    pub token: Token,
    pub context: C,
    pub target: Address,
    pub path: String,
    pub issued_at: Instant,
    pub retries: u32,
}

/// Table of in-flight requests sent over one transport
///
/// `C` is caller context stored with each entry (the server keeps the target
/// device and operation kind there).
pub struct Exchange<C> {
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<HashMap<Token, InFlight<C>>>>,
}

impl<C> Clone for Exchange<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<C: Clone + Send + 'static> Exchange<C> {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a request as in flight and return a handle that drives it
    ///
    /// Nothing is sent until [`PendingRequest::wait`] is awaited.
    pub async fn issue(
        &self,
        target: Address,
        mut request: Request,
        context: C,
        options: RequestOptions,
    ) -> PendingRequest<C> {
        let token = self.transport.next_token();
        request.token = token;
        let (tx, rx) = oneshot::channel();

        let entry = InFlight {
            context,
            target: target.clone(),
            request: request.clone(),
            issued_at: Instant::now(),
            retries: 0,
            completion: tx,
        };
        self.pending.lock().await.insert(token, entry);

        debug!(
            "Issued {} {} to {} (token {})",
            request.method, request.path, target, token
        );

        PendingRequest {
            token,
            target,
            request,
            options,
            exchange: self.clone(),
            completion: rx,
            finished: false,
        }
    }

    /// Issue a request and wait for its outcome
    pub async fn request(
        &self,
        target: Address,
        request: Request,
        context: C,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.issue(target, request, context, options).await.wait().await
    }

    /// Resolve the request matching `response.token`
    ///
    /// Returns `false` when no request is waiting for that token; the response
    /// is then discarded.
    pub async fn complete(&self, response: Response) -> bool {
        let entry = self.pending.lock().await.remove(&response.token);
        match entry {
            Some(in_flight) => {
                debug!(
                    "Response {} for {} (token {}, {} retries, {:?})",
                    response.code,
                    in_flight.request.path,
                    response.token,
                    in_flight.retries,
                    in_flight.issued_at.elapsed()
                );
                // The waiter may have given up already
                let _ = in_flight.completion.send(Ok(response));
                true
            }
            None => {
                debug!("Discarding response for unknown token {}", response.token);
                false
            }
        }
    }

    /// Cancel one in-flight request; its waiter receives `Cancelled`
    pub async fn cancel(&self, token: Token) -> bool {
        let entry = self.pending.lock().await.remove(&token);
        match entry {
            Some(in_flight) => {
                debug!("Cancelled {} (token {})", in_flight.request.path, token);
                let _ = in_flight.completion.send(Err(Error::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Cancel everything in flight, returning how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<InFlight<C>> = self.pending.lock().await.drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for in_flight in drained {
            let _ = in_flight.completion.send(Err(Error::Cancelled));
        }
        if count > 0 {
            debug!("Cancelled {} in-flight requests", count);
        }
        count
    }

    /// Snapshot of everything currently in flight
    pub async fn in_flight(&self) -> Vec<InFlightSummary<C>> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(token, entry)| InFlightSummary {
                token: *token,
                context: entry.context.clone(),
                target: entry.target.clone(),
                path: entry.request.path.clone(),
                issued_at: entry.issued_at,
                retries: entry.retries,
            })
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Bump the retry counter; `false` if the entry is gone
    async fn record_retry(&self, token: Token) -> bool {
        match self.pending.lock().await.get_mut(&token) {
            Some(entry) => {
                entry.retries += 1;
                true
            }
            None => false,
        }
    }

    async fn take(&self, token: Token) -> Option<InFlight<C>> {
        self.pending.lock().await.remove(&token)
    }
}

/// Handle to an issued request
pub struct PendingRequest<C: Send + 'static> {
    token: Token,
    target: Address,
    request: Request,
    options: RequestOptions,
    exchange: Exchange<C>,
    completion: oneshot::Receiver<Result<Response, Error>>,
    finished: bool,
}

impl<C: Clone + Send + 'static> PendingRequest<C> {
    /// Token to pass to [`Exchange::cancel`]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Send the request and wait for the outcome, re-sending on timeout or
    /// transport failure until the retry budget is spent
    pub async fn wait(mut self) -> Result<Response, Error> {
        let result = self.drive().await;
        self.finished = true;
        result
    }

    async fn drive(&mut self) -> Result<Response, Error> {
        let mut attempt: u32 = 0;

        loop {
            let sent = self
                .exchange
                .transport
                .send(&self.target, Message::Request(self.request.clone()))
                .await;

            let failure = match sent {
                Ok(()) => match timeout(self.options.timeout, &mut self.completion).await {
                    Ok(Ok(result)) => return result,
                    Ok(Err(_)) => return Err(Error::Cancelled),
                    Err(_) => Error::Timeout,
                },
                Err(e) => Error::Transport(e),
            };

            if attempt >= self.options.max_retries {
                return match self.exchange.take(self.token).await {
                    Some(_) => {
                        warn!(
                            "{} {} to {} failed after {} attempts: {}",
                            self.request.method,
                            self.request.path,
                            self.target,
                            attempt + 1,
                            failure
                        );
                        Err(failure)
                    }
                    None => self.settled().await,
                };
            }

            attempt += 1;
            if !self.exchange.record_retry(self.token).await {
                return self.settled().await;
            }
            warn!(
                "{} {} to {}: {}, retrying ({}/{})",
                self.request.method,
                self.request.path,
                self.target,
                failure,
                attempt,
                self.options.max_retries
            );
        }
    }

    /// The entry was removed by someone else; its completion is resolved or
    /// about to be
    async fn settled(&mut self) -> Result<Response, Error> {
        (&mut self.completion).await.unwrap_or(Err(Error::Cancelled))
    }
}

impl<C: Send + 'static> Drop for PendingRequest<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let pending = Arc::clone(&self.exchange.pending);
        let token = self.token;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.lock().await.remove(&token);
            });
        }
    }
}

impl<C: Send + 'static> fmt::Debug for PendingRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("token", &self.token)
            .field("target", &self.target)
            .field("path", &self.request.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Inbound, Method, ResponseCode};
    use crate::transport::MemoryNetwork;
    use tokio::sync::mpsc;

    async fn setup() -> (Exchange<&'static str>, mpsc::Receiver<Inbound>, Address) {
        let network = MemoryNetwork::new();
        let (client, _client_rx) = network.bind(Address::new("server", 5683)).await.expect("bind");
        let device = Address::new("device", 5684);
        let (_device, device_rx) = network.bind(device.clone()).await.expect("bind");
        (Exchange::new(Arc::new(client)), device_rx, device)
    }

    fn options(retries: u32) -> RequestOptions {
        RequestOptions::new(Duration::from_secs(2), retries)
    }

    async fn next_request(rx: &mut mpsc::Receiver<Inbound>) -> Request {
        match rx.recv().await.expect("no inbound").message {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_resolves_request() {
        let (exchange, mut device_rx, device) = setup().await;

        let pending = exchange
            .issue(device, Request::new(Method::Get, "/3/0/1"), "read", options(0))
            .await;
        let waiter = tokio::spawn(pending.wait());

        let request = next_request(&mut device_rx).await;
        let resolved = exchange
            .complete(Response::new(request.token, ResponseCode::Content).with_payload("v"))
            .await;
        assert!(resolved);

        let response = waiter.await.expect("join").expect("request failed");
        assert_eq!(response.payload, "v");
        assert_eq!(exchange.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reuses_token() {
        let (exchange, mut device_rx, device) = setup().await;

        let waiter = {
            let exchange = exchange.clone();
            tokio::spawn(async move {
                exchange
                    .request(device, Request::new(Method::Get, "/3/0/1"), "read", options(2))
                    .await
            })
        };

        let first = next_request(&mut device_rx).await;
        // Ignore the first attempt; the exchange re-sends after the timeout
        let second = next_request(&mut device_rx).await;
        assert_eq!(first.token, second.token);

        let summary = exchange.in_flight().await;
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].retries, 1);

        exchange
            .complete(Response::new(second.token, ResponseCode::Content))
            .await;
        assert!(waiter.await.expect("join").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_retries_exhausted() {
        let (exchange, mut device_rx, device) = setup().await;

        let result = exchange
            .request(device, Request::new(Method::Get, "/3/0/1"), "read", options(2))
            .await;
        assert_eq!(result, Err(Error::Timeout));

        // One original attempt plus two retries
        for _ in 0..3 {
            assert!(device_rx.try_recv().is_ok());
        }
        assert!(device_rx.try_recv().is_err());
        assert_eq!(exchange.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_discarded() {
        let (exchange, mut device_rx, device) = setup().await;

        let result = exchange
            .request(device, Request::new(Method::Get, "/3/0/1"), "read", options(0))
            .await;
        assert_eq!(result, Err(Error::Timeout));

        let request = next_request(&mut device_rx).await;
        let resolved = exchange
            .complete(Response::new(request.token, ResponseCode::Content))
            .await;
        assert!(!resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_cancel_all() {
        let (exchange, _device_rx, device) = setup().await;

        let first = exchange
            .issue(device.clone(), Request::new(Method::Get, "/3/0/1"), "read", options(0))
            .await;
        let token = first.token();
        let first = tokio::spawn(first.wait());

        let second = exchange
            .issue(device, Request::new(Method::Get, "/3/0/2"), "read", options(0))
            .await;
        let second = tokio::spawn(second.wait());

        tokio::task::yield_now().await;
        assert!(exchange.cancel(token).await);
        assert!(!exchange.cancel(token).await);
        assert_eq!(first.await.expect("join"), Err(Error::Cancelled));

        assert_eq!(exchange.cancel_all().await, 1);
        assert_eq!(second.await.expect("join"), Err(Error::Cancelled));

        // A response after cancellation has no effect
        assert!(!exchange.complete(Response::new(token, ResponseCode::Content)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_surfaces_transport_error() {
        let (exchange, _device_rx, _device) = setup().await;

        let result = exchange
            .request(
                Address::new("nowhere", 1),
                Request::new(Method::Get, "/3/0/1"),
                "read",
                options(1),
            )
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(exchange.pending_count().await, 0);
    }
}

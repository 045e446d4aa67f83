//! Operation coordinator for issuing device management requests to devices

use crate::directory::DeviceDirectory;
use bytes::Bytes;
use lwm2m_shared::{
    DeviceId, Error, Exchange, InFlightSummary, OperationKind, PendingRequest, RequestOptions,
    ResourcePath, Response, Token,
};
use std::sync::Arc;
use tracing::debug;

/// What an in-flight request is doing, stored with it in the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub device_id: DeviceId,
    pub kind: OperationKind,
    pub path: ResourcePath,
}

/// An issued operation; await [`PendingOperation::result`] to drive it
#[derive(Debug)]
pub struct PendingOperation {
    path: ResourcePath,
    request: PendingRequest<OperationContext>,
}

impl PendingOperation {
    /// Token to pass to [`OperationCoordinator::cancel`]
    pub fn token(&self) -> Token {
        self.request.token()
    }

    /// Wait for the device's answer; non-success codes become errors
    pub async fn result(self) -> Result<Response, Error> {
        let response = self.request.wait().await?;
        match Error::from_response(&response, &self.path.to_string()) {
            Some(error) => Err(error),
            None => Ok(response),
        }
    }
}

/// Sends operations to registered devices and tracks their responses
pub struct OperationCoordinator {
    directory: Arc<DeviceDirectory>,
    exchange: Exchange<OperationContext>,
    defaults: RequestOptions,
}

impl OperationCoordinator {
    pub fn new(
        directory: Arc<DeviceDirectory>,
        exchange: Exchange<OperationContext>,
        defaults: RequestOptions,
    ) -> Self {
        Self {
            directory,
            exchange,
            defaults,
        }
    }

    /// Options used when a caller does not pass any
    pub fn default_options(&self) -> RequestOptions {
        self.defaults
    }

    /// Issue an operation against a device without waiting for it
    pub async fn issue(
        &self,
        device_id: DeviceId,
        kind: OperationKind,
        path: ResourcePath,
        value: Option<Bytes>,
        options: RequestOptions,
    ) -> Result<PendingOperation, Error> {
        let record = self.directory.get(device_id).await?;

        let mut request = kind.request(&path);
        if let Some(value) = value {
            request = request.with_payload(value);
        }

        let context = OperationContext {
            device_id,
            kind,
            path,
        };
        let request = self
            .exchange
            .issue(record.address, request, context, options)
            .await;

        debug!(
            "{} {} on device {} (token {})",
            kind,
            path,
            device_id,
            request.token()
        );
        Ok(PendingOperation { path, request })
    }

    /// Issue an operation and wait for its result
    pub async fn request(
        &self,
        device_id: DeviceId,
        kind: OperationKind,
        path: ResourcePath,
        value: Option<Bytes>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.issue(device_id, kind, path, value, options)
            .await?
            .result()
            .await
    }

    /// Route a response from the transport to its operation
    pub async fn handle_response(&self, response: Response) -> bool {
        self.exchange.complete(response).await
    }

    /// Cancel one operation; its caller receives `Cancelled`
    pub async fn cancel(&self, token: Token) -> bool {
        self.exchange.cancel(token).await
    }

    /// Cancel all operations, e.g. on shutdown
    pub async fn cancel_all(&self) -> usize {
        self.exchange.cancel_all().await
    }

    pub async fn in_flight(&self) -> Vec<InFlightSummary<OperationContext>> {
        self.exchange.in_flight().await
    }

    /// Get count of pending operations
    pub async fn pending_count(&self) -> usize {
        self.exchange.pending_count().await
    }

    /// Get count of pending operations for a specific device
    pub async fn pending_count_for(&self, device_id: DeviceId) -> usize {
        self.exchange
            .in_flight()
            .await
            .iter()
            .filter(|op| op.context.device_id == device_id)
            .count()
    }
}

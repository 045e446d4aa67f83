//! LWM2M server engine
//!
//! The server keeps a directory of registered devices, answers the
//! registration interface, and issues device management operations to
//! registered devices through an [`OperationCoordinator`].

pub mod directory;
pub mod operation;
pub mod registration;

use bytes::Bytes;
use lwm2m_shared::{
    defaults, Address, DeviceId, Error, Exchange, Inbound, Message, OperationKind,
    RequestOptions, ResourcePath, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use directory::{DeviceDirectory, DeviceRecord, ExpirySweeper, Registration};
pub use operation::{OperationContext, OperationCoordinator, PendingOperation};
pub use registration::RegistrationInterface;

/// Configuration for the server engine
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Timeout and retry budget for operations sent to devices
    pub request: RequestOptions,
    /// How often expired registrations are swept
    pub sweep_interval: Duration,
    /// Lease granted when a client does not ask for one
    pub default_lease: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request: RequestOptions::default(),
            sweep_interval: Duration::from_millis(defaults::SWEEP_INTERVAL_MS),
            default_lease: Duration::from_secs(defaults::LEASE_SECS),
        }
    }
}

/// A running server engine
pub struct Lwm2mServer {
    address: Address,
    directory: Arc<DeviceDirectory>,
    coordinator: Arc<OperationCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Lwm2mServer {
    /// Start the server on a bound transport
    ///
    /// Spawns the inbound message loop and the expiry sweep task.
    pub fn start(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Inbound>,
    ) -> Self {
        let address = transport.local_address().clone();
        let directory = Arc::new(DeviceDirectory::new());
        let coordinator = Arc::new(OperationCoordinator::new(
            directory.clone(),
            Exchange::new(transport.clone()),
            config.request,
        ));
        let registration = RegistrationInterface::new(directory.clone(), config.default_lease);

        let inbound_task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                inbound_loop(inbound, transport, registration, coordinator).await;
            })
        };

        let sweep_task = {
            let sweeper = ExpirySweeper::new(directory.clone(), config.sweep_interval);
            tokio::spawn(async move { sweeper.run().await })
        };

        info!("LWM2M server started on {}", address);

        Self {
            address,
            directory,
            coordinator,
            tasks: vec![inbound_task, sweep_task],
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        &self.directory
    }

    pub fn coordinator(&self) -> &Arc<OperationCoordinator> {
        &self.coordinator
    }

    /// Read a resource value from a device
    pub async fn read(
        &self,
        device_id: DeviceId,
        object: u16,
        instance: u16,
        resource: u16,
    ) -> Result<Bytes, Error> {
        let path = ResourcePath::resource(object, instance, resource);
        let response = self.operate(device_id, OperationKind::Read, path, None).await?;
        Ok(response.payload)
    }

    /// Write a resource value on a device
    pub async fn write(
        &self,
        device_id: DeviceId,
        object: u16,
        instance: u16,
        resource: u16,
        value: impl Into<Bytes>,
    ) -> Result<(), Error> {
        let path = ResourcePath::resource(object, instance, resource);
        self.operate(device_id, OperationKind::Write, path, Some(value.into()))
            .await?;
        Ok(())
    }

    /// Execute a resource on a device, with optional arguments
    pub async fn execute(
        &self,
        device_id: DeviceId,
        object: u16,
        instance: u16,
        resource: u16,
        arguments: impl Into<Bytes>,
    ) -> Result<(), Error> {
        let path = ResourcePath::resource(object, instance, resource);
        let arguments = arguments.into();
        let arguments = (!arguments.is_empty()).then_some(arguments);
        self.operate(device_id, OperationKind::Execute, path, arguments)
            .await?;
        Ok(())
    }

    /// Start observing a resource; returns its current value
    pub async fn observe(
        &self,
        device_id: DeviceId,
        object: u16,
        instance: u16,
        resource: u16,
    ) -> Result<Bytes, Error> {
        let path = ResourcePath::resource(object, instance, resource);
        let response = self
            .operate(device_id, OperationKind::Observe, path, None)
            .await?;
        Ok(response.payload)
    }

    /// Create an object instance on a device; without an instance id the
    /// device picks one. Returns the created instance path.
    pub async fn create(
        &self,
        device_id: DeviceId,
        object: u16,
        instance: Option<u16>,
    ) -> Result<ResourcePath, Error> {
        let path = match instance {
            Some(instance) => ResourcePath::instance(object, instance),
            None => ResourcePath::object(object),
        };
        let response = self
            .operate(device_id, OperationKind::Create, path, None)
            .await?;

        match response.location {
            Some(location) => location.parse(),
            None => Ok(path),
        }
    }

    /// Delete an object instance on a device
    pub async fn delete(&self, device_id: DeviceId, object: u16, instance: u16) -> Result<(), Error> {
        let path = ResourcePath::instance(object, instance);
        self.operate(device_id, OperationKind::Delete, path, None)
            .await?;
        Ok(())
    }

    /// Remove a device's registration from the server side
    pub async fn deregister(&self, device_id: DeviceId) -> Result<DeviceRecord, Error> {
        self.directory.deregister(device_id).await
    }

    /// List live registrations
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.directory.devices().await
    }

    /// Stop background tasks and fail every in-flight operation with
    /// `Cancelled`
    pub async fn stop(self) {
        let cancelled = self.coordinator.cancel_all().await;
        for task in &self.tasks {
            task.abort();
        }
        info!(
            "LWM2M server on {} stopped ({} operations cancelled)",
            self.address, cancelled
        );
    }

    async fn operate(
        &self,
        device_id: DeviceId,
        kind: OperationKind,
        path: ResourcePath,
        value: Option<Bytes>,
    ) -> Result<lwm2m_shared::Response, Error> {
        let options = self.coordinator.default_options();
        self.coordinator
            .request(device_id, kind, path, value, options)
            .await
    }
}

/// Consume inbound traffic: responses go to the coordinator, requests to the
/// registration interface
async fn inbound_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    transport: Arc<dyn Transport>,
    registration: RegistrationInterface,
    coordinator: Arc<OperationCoordinator>,
) {
    while let Some(Inbound { source, message }) = inbound.recv().await {
        match message {
            Message::Response(response) => {
                coordinator.handle_response(response).await;
            }
            Message::Request(request) => {
                let response = registration.handle(&source, &request).await;
                if let Err(e) = transport.send(&source, Message::Response(response)).await {
                    warn!("Failed to answer {} from {}: {}", request.path, source, e);
                }
            }
        }
    }
    debug!("Server inbound channel closed");
}

//! LWM2M client engine
//!
//! The client models a device's object tree in a [`Registry`], registers it
//! with servers and answers server-initiated operations, either from the
//! registry directly or through application handlers bound with
//! [`Lwm2mClient::set_handler`].

pub mod dispatch;
pub mod registry;

use lwm2m_shared::registration::{ENDPOINT_PARAM, LEASE_PARAM};
use lwm2m_shared::{
    defaults, link, Address, DeviceId, Error, Exchange, Inbound, Message, Method,
    OperationKind, RegistrationEvent, Request, RequestOptions, Response, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use dispatch::{
    Dispatcher, ExecuteHandler, ExecuteRequest, Handler, HandlerTable, ReadHandler, ReadRequest,
    WriteHandler, WriteRequest,
};
pub use registry::{ObjectDefinition, Registry, Schema};

/// Configuration for the client engine
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Lease requested when registering
    pub lease: Duration,
    /// Timeout and retry budget for registration requests
    pub request: RequestOptions,
    /// Longest an application handler may run
    pub handler_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(defaults::LEASE_SECS),
            request: RequestOptions::default(),
            handler_timeout: Duration::from_millis(defaults::HANDLER_TIMEOUT_MS),
        }
    }
}

/// A registration accepted by a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    /// Server the registration belongs to
    pub server: Address,
    /// Location reference assigned by the server (`/rd/{id}`)
    pub location: String,
    pub device_id: DeviceId,
    pub endpoint: String,
    pub lease: Duration,
}

/// A running client engine
pub struct Lwm2mClient {
    address: Address,
    config: ClientConfig,
    registry: Arc<Registry>,
    handlers: Arc<HandlerTable>,
    exchange: Exchange<RegistrationEvent>,
    task: JoinHandle<()>,
}

impl Lwm2mClient {
    /// Start the client on a bound transport
    pub fn start(
        config: ClientConfig,
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Inbound>,
    ) -> Self {
        let address = transport.local_address().clone();
        let handlers = Arc::new(HandlerTable::new());
        let exchange = Exchange::new(transport.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            handlers.clone(),
            transport,
            config.handler_timeout,
        ));

        let task = {
            let exchange = exchange.clone();
            tokio::spawn(async move { inbound_loop(inbound, exchange, dispatcher).await })
        };

        info!("LWM2M client started on {}", address);

        Self {
            address,
            config,
            registry,
            handlers,
            exchange,
            task,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register with the server at `host:port` under `endpoint`
    ///
    /// The object list sent is the registry's current instance list.
    pub async fn register(
        &self,
        host: &str,
        port: u16,
        endpoint: &str,
    ) -> Result<DeviceInformation, Error> {
        let server = Address::new(host, port);
        let request = Request::new(Method::Post, format!("/{}", defaults::REGISTRATION_PATH))
            .with_query(ENDPOINT_PARAM, endpoint)
            .with_query(LEASE_PARAM, self.config.lease.as_secs())
            .with_payload(self.object_list().await);

        let response = self
            .send(&server, request, RegistrationEvent::Register)
            .await?;
        let location = response
            .location
            .ok_or_else(|| Error::Internal("registration answered without a location".into()))?;
        let device_id = DeviceId::from_location(&location)?;

        info!(
            "Registered {} with {} as device {} ({})",
            endpoint, server, device_id, location
        );

        Ok(DeviceInformation {
            server,
            location,
            device_id,
            endpoint: endpoint.to_string(),
            lease: self.config.lease,
        })
    }

    /// Renew the lease and resend the current object list
    pub async fn update(&self, info: &DeviceInformation) -> Result<(), Error> {
        let request = Request::new(Method::Post, info.location.clone())
            .with_query(LEASE_PARAM, info.lease.as_secs())
            .with_payload(self.object_list().await);
        self.send(&info.server, request, RegistrationEvent::Update)
            .await?;
        debug!("Updated registration {} with {}", info.location, info.server);
        Ok(())
    }

    /// Remove the registration from its server
    pub async fn unregister(&self, info: &DeviceInformation) -> Result<(), Error> {
        let request = Request::new(Method::Delete, info.location.clone());
        self.send(&info.server, request, RegistrationEvent::Deregister)
            .await?;
        info!("Unregistered {} from {}", info.endpoint, info.server);
        Ok(())
    }

    /// Bind a handler for operations coming from `server`, replacing any
    /// earlier handler of the same kind
    pub async fn set_handler(&self, server: &Address, handler: Handler) -> Option<Handler> {
        debug!("Binding {:?} for {}", handler, server);
        self.handlers.bind(server, handler).await
    }

    pub async fn remove_handler(&self, server: &Address, kind: OperationKind) -> Option<Handler> {
        self.handlers.unbind(server, kind).await
    }

    /// Stop the inbound task and fail outstanding registration requests with
    /// `Cancelled`
    pub async fn shutdown(self) {
        let cancelled = self.exchange.cancel_all().await;
        self.task.abort();
        info!(
            "LWM2M client on {} stopped ({} requests cancelled)",
            self.address, cancelled
        );
    }

    async fn object_list(&self) -> String {
        link::encode(&self.registry.instances().await)
    }

    async fn send(
        &self,
        server: &Address,
        request: Request,
        step: RegistrationEvent,
    ) -> Result<Response, Error> {
        let path = request.path.clone();
        let response = self
            .exchange
            .request(server.clone(), request, step, self.config.request)
            .await?;
        match Error::from_response(&response, &path) {
            Some(e) => Err(e),
            None => Ok(response),
        }
    }
}

/// Consume inbound traffic: responses complete registration requests,
/// requests go to the dispatcher
async fn inbound_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    exchange: Exchange<RegistrationEvent>,
    dispatcher: Arc<Dispatcher>,
) {
    while let Some(Inbound { source, message }) = inbound.recv().await {
        match message {
            Message::Response(response) => {
                exchange.complete(response).await;
            }
            Message::Request(request) => {
                dispatcher.submit(source, request).await;
            }
        }
    }
    debug!("Client inbound channel closed");
}

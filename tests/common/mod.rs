#![allow(dead_code)]

use lwm2m::shared::RequestOptions;
use lwm2m::{
    Address, ClientConfig, DeviceInformation, Lwm2mClient, Lwm2mServer, MemoryNetwork, Registry,
    ServerConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub const SERVER_HOST: &str = "127.0.0.1";
pub const SERVER_PORT: u16 = 5683;
pub const CLIENT_PORT: u16 = 56830;

/// Per-attempt timeout used by the end-to-end tests
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(200);

pub fn server_address() -> Address {
    Address::new(SERVER_HOST, SERVER_PORT)
}

pub fn client_address() -> Address {
    Address::new(SERVER_HOST, CLIENT_PORT)
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        request: RequestOptions::new(ATTEMPT_TIMEOUT, 3),
        ..Default::default()
    }
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        request: RequestOptions::new(ATTEMPT_TIMEOUT, 3),
        handler_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

/// A server and a client connected over one in-memory network
pub struct Harness {
    pub network: MemoryNetwork,
    pub server: Lwm2mServer,
    pub client: Lwm2mClient,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_configs(server_config(), client_config()).await
    }

    pub async fn with_configs(server_config: ServerConfig, client_config: ClientConfig) -> Self {
        let network = MemoryNetwork::new();

        let (transport, inbound) = network.bind(server_address()).await.expect("bind server");
        let server = Lwm2mServer::start(server_config, Arc::new(transport), inbound);

        let (transport, inbound) = network.bind(client_address()).await.expect("bind client");
        let client = Lwm2mClient::start(
            client_config,
            Arc::new(Registry::default()),
            Arc::new(transport),
            inbound,
        );

        Self {
            network,
            server,
            client,
        }
    }

    pub async fn register(&self, endpoint: &str) -> DeviceInformation {
        self.client
            .register(SERVER_HOST, SERVER_PORT, endpoint)
            .await
            .expect("registration failed")
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
        self.server.stop().await;
    }
}

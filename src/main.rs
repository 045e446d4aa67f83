use bytes::Bytes;
use lwm2m::client::{ReadRequest, WriteRequest};
use lwm2m::{
    Address, ClientConfig, Error, Handler, Lwm2mClient, Lwm2mServer, MemoryNetwork, NotFound,
    Registry, ResourcePath, ServerConfig,
};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let network = MemoryNetwork::new();
    let server_address = Address::new("127.0.0.1", 5683);

    let (server_transport, server_inbound) = network.bind(server_address.clone()).await?;
    let server = Lwm2mServer::start(
        ServerConfig::default(),
        Arc::new(server_transport),
        server_inbound,
    );

    // Device object with a manufacturer (0) and model number (1)
    let registry = Arc::new(Registry::default());
    let device = registry.create(&ResourcePath::instance(3, 0)).await?;
    registry
        .set_attribute(&device, 0, Bytes::from_static(b"Open Mobile Alliance"))
        .await?;
    registry
        .set_attribute(&device, 1, Bytes::from_static(b"Lightweight M2M Client"))
        .await?;

    let (client_transport, client_inbound) =
        network.bind(Address::new("127.0.0.1", 56830)).await?;
    let client = Lwm2mClient::start(
        ClientConfig::default(),
        registry,
        Arc::new(client_transport),
        client_inbound,
    );

    let info = client
        .register(&server_address.host, server_address.port, "demo-device")
        .await?;
    info!("Registered as {} at {}", info.device_id, info.location);

    client
        .set_handler(
            &server_address,
            Handler::read(|request: ReadRequest| async move {
                let path = request.path();
                match (request.resource_id, request.value) {
                    (13, _) => Ok(Bytes::from_static(b"2026-01-01T00:00:00Z")),
                    (_, Some(value)) => Ok(value),
                    (_, None) => Err(Error::from(NotFound::Resource(path))),
                }
            }),
        )
        .await;
    client
        .set_handler(
            &server_address,
            Handler::write(|request: WriteRequest| async move {
                info!("Device accepted {} for {}", String::from_utf8_lossy(&request.value), request.path());
                Ok::<_, Error>(())
            }),
        )
        .await;

    let manufacturer = server.read(info.device_id, 3, 0, 0).await?;
    info!("Manufacturer: {}", String::from_utf8_lossy(&manufacturer));

    let time = server.read(info.device_id, 3, 0, 13).await?;
    info!("Current time: {}", String::from_utf8_lossy(&time));

    server.write(info.device_id, 3, 0, 14, "+01:00").await?;
    let offset = server.read(info.device_id, 3, 0, 14).await?;
    info!("UTC offset after write: {}", String::from_utf8_lossy(&offset));

    match server.read(info.device_id, 3, 7, 0).await {
        Ok(_) => warn!("Read of a missing instance unexpectedly succeeded"),
        Err(e) => info!("Read of /3/7/0 failed as expected: {}", e),
    }

    for record in server.devices().await {
        info!(
            "Device {} ({}) at {}: {} objects, lease {:?}",
            record.device_id,
            record.endpoint,
            record.address,
            record.objects.len(),
            record.lease
        );
    }

    client.unregister(&info).await?;
    info!("Devices after unregister: {}", server.devices().await.len());

    client.shutdown().await;
    server.stop().await;
    Ok(())
}

//! Registration interface: answers `/rd` requests from clients

use crate::directory::DeviceDirectory;
use lwm2m_shared::link;
use lwm2m_shared::registration::{RegistrationTarget, ENDPOINT_PARAM, LEASE_PARAM};
use lwm2m_shared::{Address, Error, Method, Request, ResourcePath, Response, ResponseCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Handles register / update / deregister requests against the directory
pub struct RegistrationInterface {
    directory: Arc<DeviceDirectory>,
    default_lease: Duration,
}

impl RegistrationInterface {
    pub fn new(directory: Arc<DeviceDirectory>, default_lease: Duration) -> Self {
        Self {
            directory,
            default_lease,
        }
    }

    /// Answer one inbound request from `source`
    pub async fn handle(&self, source: &Address, request: &Request) -> Response {
        debug!("{} {} from {}", request.method, request.path, source);

        match self.route(source, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Registration request {} failed: {}", request.path, e);
                Response::from_error(request.token, &e)
            }
        }
    }

    async fn route(&self, source: &Address, request: &Request) -> Result<Response, Error> {
        let target = RegistrationTarget::parse(&request.path)?;

        match (request.method, target) {
            (Method::Post, RegistrationTarget::Collection) => {
                let endpoint = request
                    .query_param(ENDPOINT_PARAM)
                    .ok_or_else(|| Error::BadRequest("missing endpoint name".into()))?;
                let lease = parse_lease(request)?.unwrap_or(self.default_lease);
                let objects = parse_objects(request)?.unwrap_or_default();

                let registration = self
                    .directory
                    .register(endpoint, source.clone(), objects, lease)
                    .await?;
                Ok(Response::new(request.token, ResponseCode::Created)
                    .with_location(registration.location))
            }
            (Method::Post, RegistrationTarget::Device(device_id)) => {
                let lease = parse_lease(request)?;
                let objects = parse_objects(request)?;
                self.directory.update(device_id, lease, objects).await?;
                Ok(Response::new(request.token, ResponseCode::Changed))
            }
            (Method::Delete, RegistrationTarget::Device(device_id)) => {
                self.directory.deregister(device_id).await?;
                Ok(Response::new(request.token, ResponseCode::Deleted))
            }
            (method, _) => Err(Error::MethodNotAllowed(format!(
                "{} on {}",
                method, request.path
            ))),
        }
    }
}

fn parse_lease(request: &Request) -> Result<Option<Duration>, Error> {
    request
        .query_param(LEASE_PARAM)
        .map(|lt| {
            lt.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| Error::BadRequest(format!("invalid lease: {lt}")))
        })
        .transpose()
}

fn parse_objects(request: &Request) -> Result<Option<Vec<ResourcePath>>, Error> {
    if request.payload.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(&request.payload)
        .map_err(|_| Error::BadRequest("object list is not UTF-8".into()))?;
    link::parse(text).map(Some)
}

//! Device directory tracking all registered devices

use super::record::DeviceRecord;
use lwm2m_shared::{
    defaults, Address, DeviceId, Error, NotFound, RegistrationEvent, ResourcePath,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub device_id: DeviceId,
    pub location: String,
}

/// Manages all device registrations
///
/// The map locks are only held to find or insert/remove an entry; each record
/// has its own lock so lease updates on one device never wait on another.
/// `endpoints` is only ever locked before `records`, and never while a
/// record lock is held.
pub struct DeviceDirectory {
    /// Map of device_id -> record
    records: RwLock<HashMap<DeviceId, Arc<Mutex<DeviceRecord>>>>,
    /// Map of endpoint name -> latest device_id registered under it
    endpoints: RwLock<HashMap<String, DeviceId>>,
    next_id: AtomicU64,
    min_lease: Duration,
    max_lease: Duration,
}

impl DeviceDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            min_lease: Duration::from_secs(defaults::MIN_LEASE_SECS),
            max_lease: Duration::from_secs(defaults::MAX_LEASE_SECS),
        }
    }

    /// Register a device and assign it a fresh identifier
    ///
    /// A registration under the same endpoint name is replaced.
    pub async fn register(
        &self,
        endpoint: &str,
        address: Address,
        objects: Vec<ResourcePath>,
        lease: Duration,
    ) -> Result<Registration, Error> {
        validate_endpoint(endpoint)?;
        if address.host.is_empty() || address.port == 0 {
            return Err(Error::BadRequest(format!("invalid address: {}", address)));
        }
        let now = Instant::now();
        self.check_lease(lease, now)?;

        // Identifiers are never handed out twice
        let device_id = DeviceId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = DeviceRecord::new(device_id, endpoint.to_string(), address, objects, lease, now);
        let location = record.location();

        let replaced = {
            let mut endpoints = self.endpoints.write().await;
            let previous = endpoints.insert(endpoint.to_string(), device_id);
            let mut records = self.records.write().await;
            records.insert(device_id, Arc::new(Mutex::new(record)));
            previous.and_then(|id| records.remove(&id))
        };

        if let Some(entry) = replaced {
            let mut previous = entry.lock().await;
            if previous.is_visible_at(now) {
                let _ = previous.transition(RegistrationEvent::Deregister);
                info!(
                    "Endpoint {} re-registered, dropping registration {}",
                    endpoint, previous.device_id
                );
            } else {
                let _ = previous.transition(RegistrationEvent::LeaseExpired);
            }
        }
        info!(
            "Registered device {} (endpoint {}, lease {:?})",
            device_id, endpoint, lease
        );

        Ok(Registration { device_id, location })
    }

    /// Extend the lease of a live registration, optionally replacing its
    /// lease duration and object list
    pub async fn update(
        &self,
        device_id: DeviceId,
        lease: Option<Duration>,
        objects: Option<Vec<ResourcePath>>,
    ) -> Result<DeviceRecord, Error> {
        let now = Instant::now();
        if let Some(lease) = lease {
            self.check_lease(lease, now)?;
        }

        let entry = self.entry(device_id).await?;
        let mut record = entry.lock().await;

        if !record.is_visible_at(now) {
            return Err(not_found(device_id));
        }

        let lease = lease.unwrap_or(record.lease);
        record.renew(lease, now)?;
        if let Some(objects) = objects {
            record.objects = objects;
        }

        debug!(
            "Updated device {} ({:?} left on lease)",
            device_id,
            record.remaining_lease(now)
        );
        Ok(record.clone())
    }

    /// Remove a registration immediately
    pub async fn deregister(&self, device_id: DeviceId) -> Result<DeviceRecord, Error> {
        let entry = self
            .records
            .write()
            .await
            .remove(&device_id)
            .ok_or_else(|| not_found(device_id))?;

        let (endpoint, result) = {
            let mut record = entry.lock().await;
            // An already expired lease cannot be deregistered any more
            let result = if record.is_expired_at(Instant::now()) {
                let _ = record.transition(RegistrationEvent::LeaseExpired);
                Err(not_found(device_id))
            } else {
                record
                    .transition(RegistrationEvent::Deregister)
                    .map(|_| record.clone())
            };
            (record.endpoint.clone(), result)
        };
        self.forget_endpoint(&endpoint, device_id).await;

        let record = result?;
        info!("Deregistered device {} (endpoint {})", device_id, record.endpoint);
        Ok(record)
    }

    /// Look up a live registration
    pub async fn get(&self, device_id: DeviceId) -> Result<DeviceRecord, Error> {
        let entry = self.entry(device_id).await?;
        let record = entry.lock().await;
        if record.is_visible_at(Instant::now()) {
            Ok(record.clone())
        } else {
            Err(not_found(device_id))
        }
    }

    /// Find the live registration for an endpoint name
    pub async fn find_by_endpoint(&self, endpoint: &str) -> Option<DeviceRecord> {
        let device_id = self.endpoints.read().await.get(endpoint).copied()?;
        self.get(device_id).await.ok()
    }

    /// All live registrations, ordered by device id
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let now = Instant::now();
        let mut devices: Vec<DeviceRecord> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|record| record.is_visible_at(now))
            .collect();
        devices.sort_by_key(|record| record.device_id);
        devices
    }

    /// Get the number of live registrations
    pub async fn count(&self) -> usize {
        self.devices().await.len()
    }

    /// Destroy every registration whose lease ran out before `now`
    pub async fn expire_sweep(&self, now: Instant) -> Vec<DeviceRecord> {
        let mut expired = Vec::new();
        {
            let mut records = self.records.write().await;

            let mut expired_ids = Vec::new();
            for (id, entry) in records.iter() {
                if entry.lock().await.is_expired_at(now) {
                    expired_ids.push(*id);
                }
            }

            for id in expired_ids {
                if let Some(entry) = records.remove(&id) {
                    let mut record = entry.lock().await;
                    let _ = record.transition(RegistrationEvent::LeaseExpired);
                    info!("Registration {} (endpoint {}) expired", id, record.endpoint);
                    expired.push(record.clone());
                }
            }
        }

        for record in &expired {
            self.forget_endpoint(&record.endpoint, record.device_id).await;
        }
        expired
    }

    fn check_lease(&self, lease: Duration, now: Instant) -> Result<(), Error> {
        if lease < self.min_lease {
            return Err(Error::BadRequest(format!("lease too short: {:?}", lease)));
        }
        if lease > self.max_lease || now.checked_add(lease).is_none() {
            return Err(Error::BadRequest(format!("lease too long: {:?}", lease)));
        }
        Ok(())
    }

    /// Drop the endpoint index entry if it still points at `device_id`
    async fn forget_endpoint(&self, endpoint: &str, device_id: DeviceId) {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.get(endpoint) == Some(&device_id) {
            endpoints.remove(endpoint);
        }
    }

    async fn entry(&self, device_id: DeviceId) -> Result<Arc<Mutex<DeviceRecord>>, Error> {
        self.records
            .read()
            .await
            .get(&device_id)
            .cloned()
            .ok_or_else(|| not_found(device_id))
    }

    async fn snapshot(&self) -> Vec<DeviceRecord> {
        let entries: Vec<Arc<Mutex<DeviceRecord>>> =
            self.records.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(entry.lock().await.clone());
        }
        records
    }

    #[cfg(test)]
    async fn indexed_endpoints(&self) -> usize {
        self.endpoints.read().await.len()
    }
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(device_id: DeviceId) -> Error {
    NotFound::Device(device_id.to_string()).into()
}

fn validate_endpoint(endpoint: &str) -> Result<(), Error> {
    if endpoint.is_empty() {
        return Err(Error::BadRequest("empty endpoint name".into()));
    }
    if endpoint
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '&' | '?' | '/'))
    {
        return Err(Error::BadRequest(format!("malformed endpoint name: {endpoint:?}")));
    }
    Ok(())
}

//! Registered device records

use lwm2m_shared::state_machine::TransitionResult;
use lwm2m_shared::{
    Address, DeviceId, Error, NotFound, RegistrationEvent, RegistrationState,
    RegistrationStateMachine, ResourcePath,
};
use std::time::Duration;
use tokio::time::Instant;

/// Device state tracked by the server
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    /// Client-chosen endpoint name
    pub endpoint: String,
    pub address: Address,
    /// Object instances advertised at registration or last update
    pub objects: Vec<ResourcePath>,
    pub lease: Duration,
    pub registered_at: Instant,
    pub expires_at: Instant,
    lifecycle: RegistrationStateMachine,
}

impl DeviceRecord {
    /// `now + lease` must be representable; the directory bounds leases
    pub(crate) fn new(
        device_id: DeviceId,
        endpoint: String,
        address: Address,
        objects: Vec<ResourcePath>,
        lease: Duration,
        now: Instant,
    ) -> Self {
        let mut lifecycle = RegistrationStateMachine::new();
        lifecycle.process_event(RegistrationEvent::Register);
        Self {
            device_id,
            endpoint,
            address,
            objects,
            lease,
            registered_at: now,
            expires_at: now + lease,
            lifecycle,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.lifecycle.state()
    }

    /// Location reference handed to the client
    pub fn location(&self) -> String {
        self.device_id.location()
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Live and within its lease at `now`
    pub fn is_visible_at(&self, now: Instant) -> bool {
        self.state().is_live() && !self.is_expired_at(now)
    }

    /// Time left on the lease
    pub fn remaining_lease(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Apply a lifecycle event; fails with `Device` not found if the record
    /// already reached a terminal state
    pub(crate) fn transition(&mut self, event: RegistrationEvent) -> Result<RegistrationState, Error> {
        match self.lifecycle.process_event(event) {
            TransitionResult::Success(state) => Ok(state),
            TransitionResult::Invalid { .. } => {
                Err(NotFound::Device(self.device_id.to_string()).into())
            }
        }
    }

    /// Extend the lease from `now`
    pub(crate) fn renew(&mut self, lease: Duration, now: Instant) -> Result<(), Error> {
        self.transition(RegistrationEvent::Update)?;
        self.lease = lease;
        self.expires_at = now + lease;
        Ok(())
    }
}

//! Registration interface addressing
//!
//! Registrations live under `/rd`: a successful registration is answered
//! with location `/rd/{deviceId}`, which the client then uses for updates and
//! deregistration.

use std::fmt;
use std::str::FromStr;

use crate::defaults::REGISTRATION_PATH;
use crate::error::Error;

/// Query key carrying the endpoint name
pub const ENDPOINT_PARAM: &str = "ep";

/// Query key carrying the lease in seconds
pub const LEASE_PARAM: &str = "lt";

/// Directory-assigned device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(DeviceId)
            .map_err(|_| Error::BadRequest(format!("invalid device id: {s}")))
    }
}

impl DeviceId {
    /// Location reference returned to the registering client
    pub fn location(&self) -> String {
        format!("/{}/{}", REGISTRATION_PATH, self.0)
    }

    /// Extract the device id from a `/rd/{id}` location
    pub fn from_location(location: &str) -> Result<Self, Error> {
        match RegistrationTarget::parse(location)? {
            RegistrationTarget::Device(id) => Ok(id),
            RegistrationTarget::Collection => {
                Err(Error::BadRequest(format!("location without device id: {location}")))
            }
        }
    }
}

/// What a request path on the registration interface addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationTarget {
    /// `/rd`
    Collection,
    /// `/rd/{id}`
    Device(DeviceId),
}

impl RegistrationTarget {
    pub fn parse(path: &str) -> Result<Self, Error> {
        let mut segments = path.trim_matches('/').split('/');
        if segments.next() != Some(REGISTRATION_PATH) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        match (segments.next(), segments.next()) {
            (None, _) => Ok(RegistrationTarget::Collection),
            (Some(id), None) => id
                .parse::<DeviceId>()
                .map(RegistrationTarget::Device)
                .map_err(|_| Error::InvalidPath(path.to_string())),
            _ => Err(Error::InvalidPath(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_roundtrip() {
        let id = DeviceId(42);
        assert_eq!(id.location(), "/rd/42");
        assert_eq!(DeviceId::from_location("/rd/42").expect("valid location"), id);
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!(RegistrationTarget::parse("/rd").unwrap(), RegistrationTarget::Collection);
        assert_eq!(
            RegistrationTarget::parse("/rd/7").unwrap(),
            RegistrationTarget::Device(DeviceId(7))
        );
        assert!(RegistrationTarget::parse("/3/0").is_err());
        assert!(RegistrationTarget::parse("/rd/x").is_err());
        assert!(RegistrationTarget::parse("/rd/1/2").is_err());
        assert!(DeviceId::from_location("/rd").is_err());
    }
}

//! Object / Instance / Resource addressing
//!
//! Paths are written `/{object}/{instance}/{resource}`; segments are optional
//! from the right, so `/3`, `/3/6` and `/3/6/1` are all valid.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A path into a device's object tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    object: u16,
    instance: Option<u16>,
    resource: Option<u16>,
}

impl ResourcePath {
    /// Path addressing a whole Object type
    pub fn object(object: u16) -> Self {
        Self {
            object,
            instance: None,
            resource: None,
        }
    }

    /// Path addressing one Object Instance
    pub fn instance(object: u16, instance: u16) -> Self {
        Self {
            object,
            instance: Some(instance),
            resource: None,
        }
    }

    /// Path addressing a single Resource
    pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
        Self {
            object,
            instance: Some(instance),
            resource: Some(resource),
        }
    }

    pub fn object_id(&self) -> u16 {
        self.object
    }

    pub fn instance_id(&self) -> Option<u16> {
        self.instance
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.resource
    }

    /// The same path truncated to the instance level (or object level if it
    /// has no instance)
    pub fn instance_path(&self) -> Self {
        Self {
            object: self.object,
            instance: self.instance,
            resource: None,
        }
    }

    /// Extend an instance path with a resource id
    pub fn with_resource(&self, resource: u16) -> Result<Self, Error> {
        match self.instance {
            Some(instance) => Ok(Self::resource(self.object, instance, resource)),
            None => Err(Error::InvalidPath(format!("{}/{}", self, resource))),
        }
    }

    pub fn is_object(&self) -> bool {
        self.instance.is_none()
    }

    pub fn is_instance(&self) -> bool {
        self.instance.is_some() && self.resource.is_none()
    }

    pub fn is_resource(&self) -> bool {
        self.resource.is_some()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object)?;
        if let Some(instance) = self.instance {
            write!(f, "/{}", instance)?;
        }
        if let Some(resource) = self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath(s.to_string()));
        }

        let segments = trimmed
            .split('/')
            .map(|segment| {
                segment
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidPath(s.to_string()))
            })
            .collect::<Result<Vec<u16>, Error>>()?;

        match segments.as_slice() {
            [object] => Ok(Self::object(*object)),
            [object, instance] => Ok(Self::instance(*object, *instance)),
            [object, instance, resource] => Ok(Self::resource(*object, *instance, *resource)),
            _ => Err(Error::InvalidPath(s.to_string())),
        }
    }
}

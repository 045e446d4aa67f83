//! Object type definitions known to the registry

use std::collections::{BTreeMap, BTreeSet};

/// One Object type and the Resources it declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDefinition {
    pub id: u16,
    pub name: String,
    pub resources: BTreeSet<u16>,
}

impl ObjectDefinition {
    pub fn new(id: u16, name: impl Into<String>, resources: impl IntoIterator<Item = u16>) -> Self {
        Self {
            id,
            name: name.into(),
            resources: resources.into_iter().collect(),
        }
    }

    pub fn declares(&self, resource: u16) -> bool {
        self.resources.contains(&resource)
    }
}

/// The set of Object types a client models
#[derive(Debug, Clone, Default)]
pub struct Schema {
    objects: BTreeMap<u16, ObjectDefinition>,
}

impl Schema {
    /// A schema with no objects
    pub fn empty() -> Self {
        Self::default()
    }

    /// The core LWM2M objects (0-7)
    pub fn core() -> Self {
        Self::empty()
            .with_object(ObjectDefinition::new(0, "LWM2M Security", 0..=11))
            .with_object(ObjectDefinition::new(1, "LWM2M Server", 0..=8))
            .with_object(ObjectDefinition::new(2, "Access Control", 0..=3))
            .with_object(ObjectDefinition::new(3, "Device", 0..=16))
            .with_object(ObjectDefinition::new(4, "Connectivity Monitoring", 0..=10))
            .with_object(ObjectDefinition::new(5, "Firmware Update", 0..=8))
            .with_object(ObjectDefinition::new(6, "Location", 0..=5))
            .with_object(ObjectDefinition::new(7, "Connectivity Statistics", 0..=7))
    }

    pub fn with_object(mut self, definition: ObjectDefinition) -> Self {
        self.add_object(definition);
        self
    }

    /// Add or replace an object definition
    pub fn add_object(&mut self, definition: ObjectDefinition) {
        self.objects.insert(definition.id, definition);
    }

    pub fn object(&self, id: u16) -> Option<&ObjectDefinition> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
        self.objects.values()
    }
}

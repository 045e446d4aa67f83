//! In-memory Object / Instance / Resource tree

use super::schema::Schema;
use bytes::Bytes;
use lwm2m_shared::{Error, NotFound, ResourcePath};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Resource values of one Object Instance
///
/// A resource declared by the schema but absent here is "declared but
/// unset".
#[derive(Debug, Default)]
struct ObjectInstance {
    values: HashMap<u16, Bytes>,
}

/// The client's object tree
///
/// The instance map is only locked to create, remove or find an instance;
/// resource reads and writes lock the individual instance.
pub struct Registry {
    schema: Schema,
    instances: RwLock<BTreeMap<(u16, u16), Arc<Mutex<ObjectInstance>>>>,
}

impl Registry {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            instances: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create an Object Instance
    ///
    /// An object-level path (`/3`) allocates the lowest free instance id.
    /// Returns the path of the created instance.
    pub async fn create(&self, path: &ResourcePath) -> Result<ResourcePath, Error> {
        if path.is_resource() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let object = path.object_id();
        if self.schema.object(object).is_none() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let mut instances = self.instances.write().await;
        let instance = match path.instance_id() {
            Some(instance) => {
                if instances.contains_key(&(object, instance)) {
                    return Err(Error::AlreadyExists(*path));
                }
                instance
            }
            None => (0..=u16::MAX)
                .find(|id| !instances.contains_key(&(object, *id)))
                .ok_or_else(|| Error::BadRequest(format!("no free instance id in {}", path)))?,
        };

        instances.insert((object, instance), Arc::new(Mutex::new(ObjectInstance::default())));
        let created = ResourcePath::instance(object, instance);
        debug!("Created instance {}", created);
        Ok(created)
    }

    /// Destroy an Object Instance and all of its values
    pub async fn remove(&self, path: &ResourcePath) -> Result<(), Error> {
        let instance = match (path.instance_id(), path.resource_id()) {
            (Some(instance), None) => instance,
            _ => return Err(Error::InvalidPath(path.to_string())),
        };
        self.known_object(path)?;

        self.instances
            .write()
            .await
            .remove(&(path.object_id(), instance))
            .ok_or(NotFound::Instance(*path))?;
        debug!("Removed instance {}", path);
        Ok(())
    }

    /// Store a value for `resource` under the instance at `path`
    pub async fn set_attribute(
        &self,
        path: &ResourcePath,
        resource: u16,
        value: Bytes,
    ) -> Result<(), Error> {
        let instance = self.instance(path).await?;
        let target = self.declared(path, resource)?;
        instance.lock().await.values.insert(resource, value);
        debug!("Set {}", target);
        Ok(())
    }

    /// Clear a previously set value
    pub async fn unset_attribute(&self, path: &ResourcePath, resource: u16) -> Result<(), Error> {
        let instance = self.instance(path).await?;
        let target = self.declared(path, resource)?;
        instance
            .lock()
            .await
            .values
            .remove(&resource)
            .ok_or(NotFound::Resource(target))?;
        debug!("Unset {}", target);
        Ok(())
    }

    /// Fetch the value stored for `resource` under the instance at `path`
    pub async fn get(&self, path: &ResourcePath, resource: u16) -> Result<Bytes, Error> {
        let instance = self.instance(path).await?;
        let target = self.declared(path, resource)?;
        let value = instance.lock().await.values.get(&resource).cloned();
        value.ok_or_else(|| NotFound::Resource(target).into())
    }

    /// Check every segment of `path` against the tree
    ///
    /// Fails with the `NotFound` variant naming the first segment that does
    /// not resolve: unknown object type, missing instance, or a resource the
    /// object type does not declare.
    pub async fn resolve(&self, path: &ResourcePath) -> Result<(), Error> {
        self.known_object(path)?;
        if path.instance_id().is_some() {
            self.instance(&path.instance_path()).await?;
        }
        if let Some(resource) = path.resource_id() {
            self.declared(&path.instance_path(), resource)?;
        }
        Ok(())
    }

    /// Resolve a resource path and return its value, if set
    pub async fn lookup(&self, path: &ResourcePath) -> Result<Option<Bytes>, Error> {
        let resource = path
            .resource_id()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        match self.get(&path.instance_path(), resource).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound(NotFound::Resource(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All existing instances, in path order
    pub async fn instances(&self) -> Vec<ResourcePath> {
        self.instances
            .read()
            .await
            .keys()
            .map(|(object, instance)| ResourcePath::instance(*object, *instance))
            .collect()
    }

    pub async fn contains(&self, path: &ResourcePath) -> bool {
        self.resolve(path).await.is_ok()
    }

    fn known_object(&self, path: &ResourcePath) -> Result<(), Error> {
        match self.schema.object(path.object_id()) {
            Some(_) => Ok(()),
            None => Err(NotFound::Object(path.object_id()).into()),
        }
    }

    /// Path of `resource` under `path`, if the object type declares it
    fn declared(&self, path: &ResourcePath, resource: u16) -> Result<ResourcePath, Error> {
        let target = path.with_resource(resource)?;
        let declared = self
            .schema
            .object(path.object_id())
            .map(|definition| definition.declares(resource))
            .unwrap_or(false);
        if declared {
            Ok(target)
        } else {
            Err(NotFound::Resource(target).into())
        }
    }

    async fn instance(&self, path: &ResourcePath) -> Result<Arc<Mutex<ObjectInstance>>, Error> {
        let instance = match (path.instance_id(), path.resource_id()) {
            (Some(instance), None) => instance,
            _ => return Err(Error::InvalidPath(path.to_string())),
        };
        self.known_object(path)?;
        self.instances
            .read()
            .await
            .get(&(path.object_id(), instance))
            .cloned()
            .ok_or_else(|| NotFound::Instance(*path).into())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Schema::core())
    }
}

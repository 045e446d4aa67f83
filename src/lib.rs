//! LWM2M device management
//!
//! Facade over the workspace crates:
//! - [`shared`]: paths, messages, errors, transport and request exchange
//! - [`server`]: device directory, registration interface, operation coordinator
//! - [`client`]: resource registry, handler dispatch, registration client

pub use lwm2m_client as client;
pub use lwm2m_server as server;
pub use lwm2m_shared as shared;

pub use lwm2m_client::{ClientConfig, DeviceInformation, Handler, Lwm2mClient, Registry, Schema};
pub use lwm2m_server::{Lwm2mServer, ServerConfig};
pub use lwm2m_shared::{Address, DeviceId, Error, MemoryNetwork, NotFound, ResourcePath};

//! Client-side resource registry
//!
//! This module handles:
//! - The schema of Object types and the Resources they declare
//! - Creating and removing Object Instances
//! - Storing, clearing and fetching Resource values
//! - Existence checks that pick the right not-found error

mod schema;
mod store;

pub use schema::{ObjectDefinition, Schema};
pub use store::Registry;

//! Device directory for tracking registered devices
//!
//! This module handles:
//! - Registration, update and deregistration of devices
//! - Lease tracking, with expired records hidden from lookups immediately
//! - Periodic sweeping of expired registrations

mod manager;
mod record;
mod sweeper;

pub use manager::{DeviceDirectory, Registration};
pub use record::DeviceRecord;
pub use sweeper::ExpirySweeper;

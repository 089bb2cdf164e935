//! Permission Monitor - live tracking of OS capability grants
//!
//! This library exports the monitoring core so hosts (views, CLIs, health
//! checks) can drive it and tests can exercise it.

/// Capability kinds, states and snapshots
pub mod capability;
/// Configuration management
pub mod config;
/// Error taxonomy
pub mod error;
/// Foreground transition handling
pub mod lifecycle;
/// Authoritative capability state owned by a single task
pub mod monitor;
/// Per-display recheck loops
pub mod polling;
/// Platform capability probes, one per kind
pub mod probe;
/// Logging setup
pub mod telemetry;

pub use capability::{CapabilityKind, CapabilityState, Snapshot};
pub use error::CapabilityError;
pub use lifecycle::{LifecycleBridge, LifecycleEvent};
pub use monitor::{CapabilityChange, PermissionMonitor, SubscriptionId};
pub use polling::{DisplayHandle, PollingController, StartOutcome};
pub use probe::{CapabilityProbe, ProbeSet};

//! ar-sync-sim: in-process simulation of several AR devices sharing a session.
//!
//! Exposes the loopback network, simulated devices and the scripted scenario
//! so integration tests can drive them directly.

pub mod config;
pub mod device;
pub mod loopback;
pub mod scenario;

pub use config::{ConfigError, SimConfig};
pub use device::{settle, MapUpdate, SimDevice, SimError};
pub use loopback::{LoopbackError, LoopbackNetwork, LoopbackTransport};
pub use scenario::{DeviceReport, Observer, ScenarioReport};

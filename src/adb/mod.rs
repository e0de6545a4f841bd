//! ADB (Android Debug Bridge) backend for the device capability interface.

mod connection;
mod device;
mod input;
mod screenshot;

pub use connection::{AdbConnection, ConnectionType, DeviceInfo};
pub use device::AdbDevice;

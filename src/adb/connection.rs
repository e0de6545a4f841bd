//! ADB connection management for local and remote devices.

use std::process::Command;

use crate::device::DeviceError;

/// Type of ADB connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    Wifi,
    Remote,
}

/// Information about a connected device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: String,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

/// Manages ADB connections; used by the CLI to enumerate cluster endpoints.
pub struct AdbConnection {
    adb_path: String,
}

impl Default for AdbConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbConnection {
    pub fn new() -> Self {
        Self {
            adb_path: "adb".to_string(),
        }
    }

    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    /// Connect to a remote device via TCP/IP ("host" or "host:port").
    pub fn connect(&self, address: &str) -> Result<String, DeviceError> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:5555", address)
        };

        let output = Command::new(&self.adb_path)
            .args(["connect", &address])
            .output()
            .map_err(|e| DeviceError::Unreachable(e.to_string()))?;

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if combined.to_lowercase().contains("connected") {
            Ok(format!("Connected to {}", address))
        } else {
            Err(DeviceError::Unreachable(combined.trim().to_string()))
        }
    }

    /// Disconnect a remote device, or all of them when no address is given.
    pub fn disconnect(&self, address: Option<&str>) -> Result<String, DeviceError> {
        let args: Vec<&str> = match address {
            Some(addr) => vec!["disconnect", addr],
            None => vec!["disconnect"],
        };
        let output = Command::new(&self.adb_path)
            .args(&args)
            .output()
            .map_err(|e| DeviceError::CommandFailed(e.to_string()))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// List all connected devices.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let output = Command::new(&self.adb_path)
            .args(["devices", "-l"])
            .output()
            .map_err(|e| DeviceError::CommandFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut devices = Vec::new();
        for line in stdout.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }
            let device_id = parts[0].to_string();
            let connection_type = if device_id.contains(':') {
                ConnectionType::Remote
            } else if device_id.contains("usb") {
                ConnectionType::Usb
            } else {
                ConnectionType::Wifi
            };
            devices.push(DeviceInfo {
                device_id,
                status: parts[1].to_string(),
                connection_type,
                model: parts
                    .iter()
                    .find(|p| p.starts_with("model:"))
                    .map(|m| m.replace("model:", "")),
            });
        }
        Ok(devices)
    }
}

/// ADB command prefix with optional device specifier.
pub(crate) fn adb_prefix(device_id: Option<&str>) -> Vec<String> {
    match device_id {
        Some(id) => vec!["adb".to_string(), "-s".to_string(), id.to_string()],
        None => vec!["adb".to_string()],
    }
}

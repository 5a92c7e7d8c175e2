//! Fleet event definitions

use serde::{Deserialize, Serialize};

use crate::types::DeviceInfo;

/// Device list change pushed from an agent to the server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListChanged {
    /// Identifier of the agent reporting the change
    pub agent_id: String,

    /// Wrapper binding identifier of the device that changed
    pub binding_id: String,

    /// True when the device became available, false when it disconnected
    pub available: bool,
}

/// A single registry mutation, recorded in the order it was applied
///
/// The registry emits one of these for every upsert/remove while still
/// holding its lock, so changes to the same serial are never observed out
/// of order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    /// A device appeared, or an existing snapshot was replaced
    Up(DeviceInfo),
    /// The device with this serial disconnected
    Down {
        serial: String,
        last_seen: DeviceInfo,
    },
}

impl DeviceChange {
    /// Serial number of the device this change concerns
    pub fn serial(&self) -> &str {
        match self {
            DeviceChange::Up(info) => &info.serial,
            DeviceChange::Down { serial, .. } => serial,
        }
    }

    /// True when the device is available after this change
    pub fn available(&self) -> bool {
        matches!(self, DeviceChange::Up(_))
    }
}

/// Typed agent-to-server event
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Fleet membership changed on the agent
    DeviceListChanged(DeviceListChanged),
    /// Agent requests the server connect back to it on this port
    ConnectionRequest { port: u16 },
}

impl AgentEvent {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            AgentEvent::DeviceListChanged(e) => {
                let state = if e.available { "up" } else { "down" };
                format!("Device {} on agent {}: {}", e.binding_id, e.agent_id, state)
            }
            AgentEvent::ConnectionRequest { port } => {
                format!("Connection request for port {}", port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScreenResolution;

    fn sample_device(serial: &str) -> DeviceInfo {
        DeviceInfo {
            serial: serial.to_string(),
            emulator: true,
            resolution: ScreenResolution::new(720, 1280),
            os: "6.0".to_string(),
            model: "sdk_gphone".to_string(),
            dpi: 320,
            ram_mb: 1024,
        }
    }

    #[test]
    fn test_device_change_serial() {
        let up = DeviceChange::Up(sample_device("emulator-5554"));
        assert_eq!(up.serial(), "emulator-5554");
        assert!(up.available());

        let down = DeviceChange::Down {
            serial: "emulator-5554".to_string(),
            last_seen: sample_device("emulator-5554"),
        };
        assert_eq!(down.serial(), "emulator-5554");
        assert!(!down.available());
    }

    #[test]
    fn test_device_list_changed_serde() {
        let event = DeviceListChanged {
            agent_id: "agent-01".to_string(),
            binding_id: "device_emulator-5554_1_a1b2".to_string(),
            available: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"agentId\":\"agent-01\""));
        assert!(json.contains("\"bindingId\""));

        let back: DeviceListChanged = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_summary() {
        let event = AgentEvent::DeviceListChanged(DeviceListChanged {
            agent_id: "agent-01".to_string(),
            binding_id: "wrapper-1".to_string(),
            available: false,
        });
        assert_eq!(event.summary(), "Device wrapper-1 on agent agent-01: down");

        let event = AgentEvent::ConnectionRequest { port: 1980 };
        assert_eq!(event.summary(), "Connection request for port 1980");
    }
}

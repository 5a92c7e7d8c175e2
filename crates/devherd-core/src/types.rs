//! Fleet domain types shared between the agent and the server contracts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScreenResolution {
    pub width: u32,
    pub height: u32,
}

impl ScreenResolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A device currently visible on the agent
///
/// Immutable snapshot per observation; the registry keeps the latest
/// snapshot per serial number.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Serial number, unique within one agent
    pub serial: String,

    /// True for emulators, false for physical hardware
    #[serde(default)]
    pub emulator: bool,

    /// Screen resolution
    pub resolution: ScreenResolution,

    /// Operating system version string
    pub os: String,

    /// Device model
    pub model: String,

    /// Dots per inch on the device screen
    pub dpi: u32,

    /// Random access memory available to the device, in MB
    pub ram_mb: u64,
}

impl DeviceInfo {
    /// Get a display string for the device
    pub fn display_name(&self) -> String {
        if self.emulator {
            format!("{} (emulator)", self.model)
        } else {
            self.model.clone()
        }
    }
}

/// Requested emulator provisioning parameters
///
/// All fields are optional. An unset field means "use the provisioner
/// default, or match any running emulator" during reuse-matching.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorParameters {
    /// Desired Android API level
    #[serde(default)]
    pub api_level: Option<u32>,

    /// Desired screen resolution
    #[serde(default)]
    pub resolution: Option<ScreenResolution>,

    /// Desired screen dots per inch
    #[serde(default)]
    pub dpi: Option<u32>,

    /// Desired random access memory, in MB
    #[serde(default)]
    pub ram_mb: Option<u64>,

    /// Desired Android target (e.g. "android-33" or "google_apis")
    #[serde(default)]
    pub target: Option<String>,
}

impl EmulatorParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_level(mut self, api_level: u32) -> Self {
        self.api_level = Some(api_level);
        self
    }

    pub fn with_resolution(mut self, resolution: ScreenResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    pub fn with_ram_mb(mut self, ram_mb: u64) -> Self {
        self.ram_mb = Some(ram_mb);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Check whether a running emulator with the given effective parameters
    /// satisfies this request
    ///
    /// A requested field matches only when the candidate reports an equal
    /// effective value; an unset requested field matches anything.
    pub fn satisfied_by(&self, effective: &EmulatorParameters) -> bool {
        fn field_ok<T: PartialEq>(requested: &Option<T>, effective: &Option<T>) -> bool {
            match requested {
                None => true,
                Some(want) => effective.as_ref() == Some(want),
            }
        }

        field_ok(&self.api_level, &effective.api_level)
            && field_ok(&self.resolution, &effective.resolution)
            && field_ok(&self.dpi, &effective.dpi)
            && field_ok(&self.ram_mb, &effective.ram_mb)
            && field_ok(&self.target, &effective.target)
    }

    /// True when no field is set (any emulator will do)
    pub fn is_empty(&self) -> bool {
        self.api_level.is_none()
            && self.resolution.is_none()
            && self.dpi.is_none()
            && self.ram_mb.is_none()
            && self.target.is_none()
    }
}

/// Hardware specification of the machine the agent runs on
///
/// A point-in-time sample: values like free RAM go stale immediately and
/// must be re-sampled for every report.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSpecification {
    /// Total RAM on the host, in MB
    pub total_ram_mb: u64,

    /// Free RAM on the host, in MB
    pub free_ram_mb: u64,

    /// Number of logical CPUs
    pub cpu_count: u32,

    /// Whether hardware-accelerated virtualization is available
    pub hardware_acceleration: bool,

    /// Score from a CPU benchmark run on the host
    pub benchmark_score: f64,

    /// Free disk space on the host, in MB
    pub free_disk_space_mb: u64,
}

/// Battery charging state as reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryState {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl BatteryState {
    /// Map the integer the device property service reports to a state
    pub fn from_status_code(code: u32) -> Self {
        match code {
            2 => BatteryState::Charging,
            3 => BatteryState::Discharging,
            4 => BatteryState::NotCharging,
            5 => BatteryState::Full,
            _ => BatteryState::Unknown,
        }
    }
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatteryState::Unknown => "unknown",
            BatteryState::Charging => "charging",
            BatteryState::Discharging => "discharging",
            BatteryState::NotCharging => "not_charging",
            BatteryState::Full => "full",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device(serial: &str, emulator: bool) -> DeviceInfo {
        DeviceInfo {
            serial: serial.to_string(),
            emulator,
            resolution: ScreenResolution::new(1080, 1920),
            os: "4.4.2".to_string(),
            model: "Pixel 8".to_string(),
            dpi: 480,
            ram_mb: 2048,
        }
    }

    #[test]
    fn test_device_display_name() {
        assert_eq!(sample_device("a", false).display_name(), "Pixel 8");
        assert_eq!(sample_device("b", true).display_name(), "Pixel 8 (emulator)");
    }

    #[test]
    fn test_device_info_serde_round() {
        let device = sample_device("emulator-5554", true);
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"ramMb\":2048"));
        let back: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(ScreenResolution::new(720, 1280).to_string(), "720x1280");
    }

    #[test]
    fn test_parameters_unset_fields_match_anything() {
        let request = EmulatorParameters::new().with_api_level(19);
        let running = EmulatorParameters::new().with_api_level(19);

        // ram/dpi/resolution unset on both sides
        assert!(request.satisfied_by(&running));
    }

    #[test]
    fn test_parameters_set_field_must_match() {
        let request = EmulatorParameters::new().with_api_level(19).with_dpi(320);

        let wrong_api = EmulatorParameters::new().with_api_level(21).with_dpi(320);
        assert!(!request.satisfied_by(&wrong_api));

        let missing_dpi = EmulatorParameters::new().with_api_level(19);
        assert!(!request.satisfied_by(&missing_dpi));

        let exact = EmulatorParameters::new().with_api_level(19).with_dpi(320);
        assert!(request.satisfied_by(&exact));
    }

    #[test]
    fn test_empty_parameters_match_everything() {
        let request = EmulatorParameters::new();
        assert!(request.is_empty());
        assert!(request.satisfied_by(&EmulatorParameters::new().with_api_level(33)));
        assert!(request.satisfied_by(&EmulatorParameters::new()));
    }

    #[test]
    fn test_parameters_resolution_match() {
        let request =
            EmulatorParameters::new().with_resolution(ScreenResolution::new(1080, 1920));

        let same = EmulatorParameters::new().with_resolution(ScreenResolution::new(1080, 1920));
        assert!(request.satisfied_by(&same));

        let other = EmulatorParameters::new().with_resolution(ScreenResolution::new(720, 1280));
        assert!(!request.satisfied_by(&other));
    }

    #[test]
    fn test_parameters_serde_camel_case() {
        let params = EmulatorParameters::new().with_api_level(33).with_ram_mb(4096);
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"apiLevel\":33"));
        assert!(json.contains("\"ramMb\":4096"));
    }

    #[test]
    fn test_battery_state_from_status_code() {
        assert_eq!(BatteryState::from_status_code(2), BatteryState::Charging);
        assert_eq!(BatteryState::from_status_code(3), BatteryState::Discharging);
        assert_eq!(BatteryState::from_status_code(4), BatteryState::NotCharging);
        assert_eq!(BatteryState::from_status_code(5), BatteryState::Full);
        assert_eq!(BatteryState::from_status_code(0), BatteryState::Unknown);
        assert_eq!(BatteryState::from_status_code(99), BatteryState::Unknown);
    }

    #[test]
    fn test_battery_state_display() {
        assert_eq!(BatteryState::Charging.to_string(), "charging");
        assert_eq!(BatteryState::NotCharging.to_string(), "not_charging");
    }
}

//! Device bridge collaborators backed by adb
//!
//! Production implementations of the presence source, boot probe, and
//! device executor seams, all shelling out to `adb` and parsing its
//! output. Parsing is lenient: the bridge prints warnings and partial
//! tables in the wild, and a parse miss must never take the poll loop
//! down.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::sleep;

use devherd_core::prelude::*;
use devherd_core::{BatteryState, DeviceInfo, ScreenResolution};

use crate::registry::DeviceRegistry;
use crate::router::{ActionArg, DeviceExecutor, RoutingAction};

/// Counter for unique temp file names during APK installs
static INSTALL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Thin command runner around one adb binary
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: String,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    /// Run adb with the given arguments and return stdout
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::bridge(format!("failed to run adb {}: {}", args.join(" "), e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "adb {} exited with code {:?}: {}",
                args.join(" "),
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(stdout)
    }

    /// Run a shell command on a specific device
    pub async fn shell(&self, serial: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["-s", serial, "shell"];
        args.extend_from_slice(command);
        self.run(&args).await
    }

    /// Read a system property of a device
    pub async fn get_prop(&self, serial: &str, property: &str) -> Result<String> {
        let output = self.shell(serial, &["getprop", property]).await?;
        Ok(output.trim().to_string())
    }
}

// ─────────────────────────────────────────────────────────
// Presence Source
// ─────────────────────────────────────────────────────────

/// One line of `adb devices` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDeviceLine {
    pub serial: String,
    pub state: String,
}

/// Feeds the device registry from periodic `adb devices -l` polls
pub struct AdbDeviceSource {
    bridge: AdbBridge,
    registry: Arc<DeviceRegistry>,
    poll_interval: Duration,
}

impl AdbDeviceSource {
    pub fn new(bridge: AdbBridge, registry: Arc<DeviceRegistry>, poll_interval: Duration) -> Self {
        Self {
            bridge,
            registry,
            poll_interval,
        }
    }

    /// Poll the bridge once and reconcile the registry
    pub async fn poll_once(&self) -> Result<()> {
        let output = self.bridge.run(&["devices", "-l"]).await?;
        let lines = parse_adb_devices(&output);

        let visible: Vec<&str> = lines
            .iter()
            .filter(|line| line.state == "device")
            .map(|line| line.serial.as_str())
            .collect();

        // New serials are described and upserted
        for serial in &visible {
            if !self.registry.exists(serial) {
                match self.describe_device(serial).await {
                    Ok(info) => self.registry.upsert(info),
                    Err(e) => {
                        warn!("Could not describe new device {}: {}", serial, e);
                    }
                }
            }
        }

        // Vanished serials are removed
        for serial in self.registry.serials() {
            if !visible.contains(&serial.as_str()) {
                self.registry.remove(&serial);
            }
        }

        Ok(())
    }

    /// Poll the bridge until the task is dropped
    pub async fn run(self) {
        info!("Device presence polling every {:?}", self.poll_interval);
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("Device poll failed: {}", e);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Build a device snapshot by querying the device itself
    async fn describe_device(&self, serial: &str) -> Result<DeviceInfo> {
        let os = self.bridge.get_prop(serial, "ro.build.version.release").await?;
        let model = self.bridge.get_prop(serial, "ro.product.model").await?;
        let qemu = self.bridge.get_prop(serial, "ro.kernel.qemu").await?;

        let size_output = self.bridge.shell(serial, &["wm", "size"]).await?;
        let density_output = self.bridge.shell(serial, &["wm", "density"]).await?;
        let meminfo = self.bridge.shell(serial, &["cat", "/proc/meminfo"]).await?;

        Ok(DeviceInfo {
            serial: serial.to_string(),
            emulator: qemu == "1" || serial.starts_with("emulator-"),
            resolution: parse_physical_size(&size_output)
                .unwrap_or(ScreenResolution::new(0, 0)),
            os,
            model,
            dpi: parse_physical_density(&density_output).unwrap_or(0),
            ram_mb: parse_meminfo_total_mb(&meminfo).unwrap_or(0),
        })
    }
}

/// Parse `adb devices [-l]` output into serial/state pairs
///
/// Skips the banner line and daemon start-up chatter.
pub fn parse_adb_devices(output: &str) -> Vec<AdbDeviceLine> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some(AdbDeviceLine {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parse `wm size` output ("Physical size: 1080x1920")
fn parse_physical_size(output: &str) -> Option<ScreenResolution> {
    let value = output
        .lines()
        .find_map(|line| line.strip_prefix("Physical size:"))?
        .trim();
    let (width, height) = value.split_once('x')?;
    Some(ScreenResolution::new(
        width.parse().ok()?,
        height.parse().ok()?,
    ))
}

/// Parse `wm density` output ("Physical density: 480")
fn parse_physical_density(output: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Physical density:"))?
        .trim()
        .parse()
        .ok()
}

/// Parse /proc/meminfo content to total RAM in MB
fn parse_meminfo_total_mb(output: &str) -> Option<u64> {
    output
        .lines()
        .find(|line| line.starts_with("MemTotal"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

// ─────────────────────────────────────────────────────────
// Boot Probe
// ─────────────────────────────────────────────────────────

/// Boot-completion probe over `getprop sys.boot_completed`
#[derive(Debug, Clone)]
pub struct AdbBootProbe {
    bridge: AdbBridge,
}

impl AdbBootProbe {
    pub fn new(bridge: AdbBridge) -> Self {
        Self { bridge }
    }
}

impl crate::provisioner::BootProbe for AdbBootProbe {
    async fn boot_completed(&self, serial: &str) -> Result<bool> {
        let value = self.bridge.get_prop(serial, "sys.boot_completed").await?;
        Ok(value == "1")
    }
}

// ─────────────────────────────────────────────────────────
// Device Executor
// ─────────────────────────────────────────────────────────

/// Device executor over adb shell
///
/// Covers the query/install actions the bridge can serve directly; UI
/// automation actions belong to an on-device component and are not
/// registered here.
#[derive(Debug, Clone)]
pub struct AdbDeviceExecutor {
    bridge: AdbBridge,
}

impl AdbDeviceExecutor {
    /// Actions this executor implements
    pub const SUPPORTED: &'static [RoutingAction] = &[
        RoutingAction::GetDeviceInformation,
        RoutingAction::GetBatteryLevel,
        RoutingAction::GetBatteryState,
        RoutingAction::GetPowerState,
        RoutingAction::GetAwakeStatus,
        RoutingAction::WakeUp,
        RoutingAction::InitApkInstall,
        RoutingAction::AppendApkFragment,
        RoutingAction::BuildAndInstallApk,
        RoutingAction::DiscardApk,
    ];

    pub fn new(bridge: AdbBridge) -> Self {
        Self { bridge }
    }

    async fn battery_field(&self, serial: &str, field: &str) -> Result<String> {
        let output = self.bridge.shell(serial, &["dumpsys", "battery"]).await?;
        parse_dumpsys_field(&output, field)
            .ok_or_else(|| Error::command_failed(format!("dumpsys battery has no {}", field)))
    }

    async fn install_apk(&self, serial: &str, apk: &[u8]) -> Result<Value> {
        let id = INSTALL_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("devherd-{}-{}.apk", serial, id));
        tokio::fs::write(&path, apk).await?;

        let result = self
            .bridge
            .run(&["-s", serial, "install", "-r", &path.to_string_lossy()])
            .await;
        let _ = tokio::fs::remove_file(&path).await;

        let output = result?;
        if output.contains("Success") {
            Ok(json!("Success"))
        } else {
            Err(Error::command_failed(format!(
                "install did not report success: {}",
                output.trim()
            )))
        }
    }
}

impl DeviceExecutor for AdbDeviceExecutor {
    async fn execute(
        &self,
        serial: &str,
        action: RoutingAction,
        args: &[ActionArg],
    ) -> Result<Value> {
        match action {
            RoutingAction::GetBatteryLevel => {
                let level = self.battery_field(serial, "level").await?;
                let level: u32 = level
                    .parse()
                    .map_err(|_| Error::command_failed("battery level is not a number"))?;
                Ok(json!(level))
            }
            RoutingAction::GetBatteryState => {
                let status = self.battery_field(serial, "status").await?;
                let code: u32 = status.parse().unwrap_or(0);
                Ok(serde_json::to_value(BatteryState::from_status_code(code))?)
            }
            RoutingAction::GetPowerState => {
                let output = self.bridge.shell(serial, &["dumpsys", "battery"]).await?;
                let ac = parse_dumpsys_field(&output, "AC powered").as_deref() == Some("true");
                let usb = parse_dumpsys_field(&output, "USB powered").as_deref() == Some("true");
                Ok(json!(ac || usb))
            }
            RoutingAction::GetAwakeStatus => {
                let output = self.bridge.shell(serial, &["dumpsys", "power"]).await?;
                Ok(json!(output.contains("mWakefulness=Awake")))
            }
            RoutingAction::WakeUp => {
                self.bridge
                    .shell(serial, &["input", "keyevent", "KEYCODE_WAKEUP"])
                    .await?;
                Ok(Value::Null)
            }
            RoutingAction::BuildAndInstallApk => {
                let Some(ActionArg::Bytes(apk)) = args.first() else {
                    return Err(Error::command_failed("no APK payload to install"));
                };
                self.install_apk(serial, apk).await
            }
            other => Err(Error::unsupported_action(other.as_str())),
        }
    }
}

/// Parse one "   key: value" field from dumpsys output
fn parse_dumpsys_field(output: &str, field: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let value = line.strip_prefix(field)?.strip_prefix(':')?;
        Some(value.trim().to_string())
    })
}

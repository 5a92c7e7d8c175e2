//! Android SDK emulator launcher
//!
//! Implements the [`EmulatorLauncher`](crate::provisioner::EmulatorLauncher)
//! seam over the `emulator` command and the adb emulator console. AVDs are
//! matched to provisioning requests by the API level encoded in their name
//! (`Pixel_6_API_33`).

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use tokio::process::Command;

use devherd_core::prelude::*;
use devherd_core::EmulatorParameters;

use crate::adb::{parse_adb_devices, AdbBridge};
use crate::provisioner::{EmulatorLauncher, RunningEmulator};

/// Static regex pattern for extracting API level from AVD names
static API_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_API_(\d+)$").expect("Invalid API pattern regex"));

/// Launcher backed by the Android SDK `emulator` command
pub struct SdkEmulatorLauncher {
    emulator_path: String,
    bridge: AdbBridge,
    // Requests we launched, so running() can report effective parameters
    launched: Mutex<HashMap<String, EmulatorParameters>>,
}

impl SdkEmulatorLauncher {
    pub fn new(emulator_path: impl Into<String>, bridge: AdbBridge) -> Self {
        Self {
            emulator_path: emulator_path.into(),
            bridge,
            launched: Mutex::new(HashMap::new()),
        }
    }

    /// List all available AVD names
    pub async fn list_avds(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.emulator_path)
            .arg("-list-avds")
            .output()
            .await
            .map_err(|e| Error::bridge(format!("failed to run emulator: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::bridge(format!(
                "emulator -list-avds failed: {}",
                stderr
            )));
        }

        Ok(parse_avd_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Pick an AVD satisfying the requested parameters
    async fn choose_avd(&self, parameters: &EmulatorParameters) -> Result<String> {
        let avds = self.list_avds().await?;
        choose_avd_from(&avds, parameters).ok_or_else(|| {
            Error::provisioning(format!(
                "no AVD satisfies the requested parameters (have: {})",
                avds.join(", ")
            ))
        })
    }

    /// Spawn a detached emulator process for an AVD
    async fn spawn_emulator(&self, name: &str, wipe_data: bool) -> Result<()> {
        let mut args = vec!["-avd", name, "-no-snapshot-load"];
        if wipe_data {
            args.push("-wipe-data");
        }

        let mut child = Command::new(&self.emulator_path)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::bridge(format!("failed to start emulator: {}", e)))?;

        // The process keeps running on its own; we only reap it
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }

    /// Resolve the AVD name behind an emulator serial via the console
    async fn avd_name_of(&self, serial: &str) -> Result<Option<String>> {
        let output = self.bridge.run(&["-s", serial, "emu", "avd", "name"]).await?;
        Ok(parse_emu_avd_name(&output))
    }
}

impl EmulatorLauncher for SdkEmulatorLauncher {
    async fn launch(&self, parameters: &EmulatorParameters) -> Result<String> {
        let name = self.choose_avd(parameters).await?;
        self.spawn_emulator(&name, false).await?;

        // Record the effective parameters of this instance
        let mut effective = parameters.clone();
        if effective.api_level.is_none() {
            effective.api_level = parse_avd_api_level(&name);
        }
        self.launched
            .lock()
            .expect("launcher lock poisoned")
            .insert(name.clone(), effective);

        info!("Started emulator process for AVD {}", name);
        Ok(name)
    }

    async fn kill(&self, serial: &str) -> Result<()> {
        self.bridge.run(&["-s", serial, "emu", "kill"]).await?;
        Ok(())
    }

    async fn wipe(&self, name: &str) -> Result<()> {
        // Wiping requires a cold start with -wipe-data
        if let Some(running) = self
            .running()
            .await?
            .into_iter()
            .find(|e| e.name == name)
        {
            if let Some(serial) = running.serial {
                self.kill(&serial).await?;
            }
        }
        self.spawn_emulator(name, true).await
    }

    async fn erase(&self, name: &str) -> Result<()> {
        let avdmanager = which::which("avdmanager")
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "avdmanager".to_string());

        let output = Command::new(avdmanager)
            .args(["delete", "avd", "-n", name])
            .output()
            .await
            .map_err(|e| Error::bridge(format!("failed to run avdmanager: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::command_failed(format!(
                "avdmanager delete avd {} failed: {}",
                name,
                stderr.trim()
            )));
        }

        self.launched
            .lock()
            .expect("launcher lock poisoned")
            .remove(name);
        Ok(())
    }

    async fn running(&self) -> Result<Vec<RunningEmulator>> {
        let output = self.bridge.run(&["devices"]).await?;
        let serials: Vec<String> = parse_adb_devices(&output)
            .into_iter()
            .filter(|line| line.state == "device" && line.serial.starts_with("emulator-"))
            .map(|line| line.serial)
            .collect();

        let mut running = Vec::new();
        for serial in serials {
            let name = match self.avd_name_of(&serial).await {
                Ok(Some(name)) => name,
                Ok(None) => {
                    warn!("Emulator {} did not report an AVD name", serial);
                    continue;
                }
                Err(e) => {
                    warn!("Could not query AVD name of {}: {}", serial, e);
                    continue;
                }
            };

            let parameters = self
                .launched
                .lock()
                .expect("launcher lock poisoned")
                .get(&name)
                .cloned()
                .unwrap_or_else(|| match parse_avd_api_level(&name) {
                    Some(api) => EmulatorParameters::new().with_api_level(api),
                    None => EmulatorParameters::new(),
                });

            running.push(RunningEmulator {
                name,
                serial: Some(serial),
                parameters,
            });
        }

        Ok(running)
    }
}

/// Parse the output of `emulator -list-avds` (one AVD name per line)
fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Extract the API level encoded in an AVD name
///
/// Common naming patterns:
/// - "Pixel_6_API_33" -> Some(33)
/// - "My_Custom_AVD" -> None
fn parse_avd_api_level(name: &str) -> Option<u32> {
    API_PATTERN
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Pick the first AVD satisfying the request
///
/// A requested target must be contained in the AVD name; a requested API
/// level must match the level encoded in it. Requests without either take
/// the first AVD available.
fn choose_avd_from(avds: &[String], parameters: &EmulatorParameters) -> Option<String> {
    avds.iter()
        .find(|name| {
            let api_ok = match parameters.api_level {
                None => true,
                Some(api) => parse_avd_api_level(name) == Some(api),
            };
            let target_ok = match &parameters.target {
                None => true,
                Some(target) => name.contains(target.as_str()),
            };
            api_ok && target_ok
        })
        .cloned()
}

/// Parse the emulator console's `avd name` reply
///
/// The console replies with the name on one line followed by "OK".
fn parse_emu_avd_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty() && *line != "OK")
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_avd_list() {
        let output = "Pixel_6_API_33\nNexus_5X_API_29\nMy_Custom_AVD\n";
        let avds = parse_avd_list(output);

        assert_eq!(avds, ["Pixel_6_API_33", "Nexus_5X_API_29", "My_Custom_AVD"]);
    }

    #[test]
    fn test_parse_avd_list_with_whitespace() {
        let output = "  Pixel_6_API_33  \n\n  Nexus_5X_API_29\n";
        let avds = parse_avd_list(output);
        assert_eq!(avds, ["Pixel_6_API_33", "Nexus_5X_API_29"]);
    }

    #[test]
    fn test_parse_avd_api_level() {
        assert_eq!(parse_avd_api_level("Pixel_6_API_33"), Some(33));
        assert_eq!(parse_avd_api_level("Nexus_5X_API_29"), Some(29));
        assert_eq!(parse_avd_api_level("My_Custom_AVD"), None);
        assert_eq!(parse_avd_api_level("API_33_Pixel"), None);
    }

    #[test]
    fn test_choose_avd_by_api_level() {
        let avds = vec![
            "Pixel_6_API_33".to_string(),
            "Nexus_5X_API_29".to_string(),
        ];

        let params = EmulatorParameters::new().with_api_level(29);
        assert_eq!(
            choose_avd_from(&avds, &params).as_deref(),
            Some("Nexus_5X_API_29")
        );

        let params = EmulatorParameters::new().with_api_level(19);
        assert_eq!(choose_avd_from(&avds, &params), None);
    }

    #[test]
    fn test_choose_avd_by_target() {
        let avds = vec![
            "Pixel_6_API_33".to_string(),
            "Tablet_API_33".to_string(),
        ];

        let params = EmulatorParameters::new().with_target("Tablet");
        assert_eq!(
            choose_avd_from(&avds, &params).as_deref(),
            Some("Tablet_API_33")
        );
    }

    #[test]
    fn test_choose_avd_unconstrained_takes_first() {
        let avds = vec!["First_AVD".to_string(), "Second_AVD".to_string()];
        assert_eq!(
            choose_avd_from(&avds, &EmulatorParameters::new()).as_deref(),
            Some("First_AVD")
        );
    }

    #[test]
    fn test_choose_avd_empty_list() {
        assert_eq!(choose_avd_from(&[], &EmulatorParameters::new()), None);
    }

    #[test]
    fn test_parse_emu_avd_name() {
        assert_eq!(
            parse_emu_avd_name("Pixel_6_API_33\r\nOK\r\n").as_deref(),
            Some("Pixel_6_API_33")
        );
        assert_eq!(parse_emu_avd_name("OK\r\n"), None);
        assert_eq!(parse_emu_avd_name(""), None);
    }
}

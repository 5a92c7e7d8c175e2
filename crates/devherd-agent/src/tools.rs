//! Tool availability checking for the device bridge
//!
//! Probes for the external tools the agent drives devices with: `adb`
//! (device bridge) and `emulator` (Android SDK). Run once at startup.

use std::process::Stdio;
use tokio::process::Command;

/// Cached availability of the external device tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Whether `adb` is available
    pub adb: bool,

    /// Path to the adb command if found
    pub adb_path: Option<String>,

    /// Whether the `emulator` command is available (Android SDK)
    pub emulator: bool,

    /// Path to the emulator command if found
    pub emulator_path: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check() -> Self {
        let (adb, adb_path) = Self::check_adb().await;
        let (emulator, emulator_path) = Self::check_emulator().await;

        Self {
            adb,
            adb_path,
            emulator,
            emulator_path,
        }
    }

    /// Check if adb is available
    async fn check_adb() -> (bool, Option<String>) {
        for path in Self::adb_paths() {
            if Command::new(&path)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("adb check failed for {}: {}", path, e))
                .unwrap_or(false)
            {
                return (true, Some(path));
            }
        }

        (false, None)
    }

    /// Check if the Android emulator is available
    async fn check_emulator() -> (bool, Option<String>) {
        for path in Self::emulator_paths() {
            if Command::new(&path)
                .arg("-list-avds")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("emulator check failed for {}: {}", path, e))
                .unwrap_or(false)
            {
                return (true, Some(path));
            }
        }

        (false, None)
    }

    /// Get list of paths to try for the adb command
    fn adb_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if let Ok(found) = which::which("adb") {
            paths.push(found.to_string_lossy().into_owned());
        }
        paths.push("adb".to_string());

        if let Ok(android_home) = std::env::var("ANDROID_HOME") {
            paths.push(format!("{}/platform-tools/adb", android_home));
        }
        if let Ok(sdk_root) = std::env::var("ANDROID_SDK_ROOT") {
            paths.push(format!("{}/platform-tools/adb", sdk_root));
        }

        paths
    }

    /// Get list of paths to try for the emulator command
    fn emulator_paths() -> Vec<String> {
        let mut paths = vec!["emulator".to_string()];

        if let Ok(android_home) = std::env::var("ANDROID_HOME") {
            paths.push(format!("{}/emulator/emulator", android_home));
        }
        if let Ok(sdk_root) = std::env::var("ANDROID_SDK_ROOT") {
            paths.push(format!("{}/emulator/emulator", sdk_root));
        }

        paths
    }

    /// Get user-friendly message when the device bridge is unavailable
    pub fn adb_unavailable_message(&self) -> Option<&'static str> {
        if self.adb {
            None
        } else {
            Some("adb not found. Install Android platform-tools or set ANDROID_HOME.")
        }
    }

    /// Get user-friendly message when the emulator is unavailable
    pub fn emulator_unavailable_message(&self) -> Option<&'static str> {
        if self.emulator {
            None
        } else {
            Some("Android emulator not found. Install the Android SDK or set ANDROID_HOME.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_adb_paths_include_android_home() {
        std::env::set_var("ANDROID_HOME", "/opt/android-sdk");
        let paths = ToolAvailability::adb_paths();
        assert!(paths
            .iter()
            .any(|p| p == "/opt/android-sdk/platform-tools/adb"));
        std::env::remove_var("ANDROID_HOME");
    }

    #[test]
    #[serial]
    fn test_emulator_paths_include_sdk_root() {
        std::env::set_var("ANDROID_SDK_ROOT", "/opt/android-sdk");
        let paths = ToolAvailability::emulator_paths();
        assert!(paths.iter().any(|p| p == "/opt/android-sdk/emulator/emulator"));
        std::env::remove_var("ANDROID_SDK_ROOT");
    }

    #[test]
    fn test_unavailable_messages() {
        let tools = ToolAvailability::default();
        assert!(tools.adb_unavailable_message().is_some());
        assert!(tools.emulator_unavailable_message().is_some());

        let tools = ToolAvailability {
            adb: true,
            emulator: true,
            ..Default::default()
        };
        assert!(tools.adb_unavailable_message().is_none());
        assert!(tools.emulator_unavailable_message().is_none());
    }

    #[tokio::test]
    async fn test_check_does_not_panic() {
        // Depends on what is installed; both outcomes are acceptable.
        let tools = ToolAvailability::check().await;
        if !tools.adb {
            assert!(tools.adb_path.is_none());
        }
    }
}

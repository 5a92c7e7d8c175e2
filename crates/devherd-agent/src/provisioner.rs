//! Emulator provisioning
//!
//! Turns declarative [`EmulatorParameters`] into a running, then booted,
//! device under bounded time budgets. The actual emulator processes are
//! owned by an external launcher collaborator; this module drives the
//! per-emulator lifecycle by polling, never by callbacks:
//!
//! `Requested → Launching → Existing → Booting → Ready → Closing → Gone`,
//! with `Failed` reachable from `Launching` and `Booting`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use devherd_core::prelude::*;
use devherd_core::EmulatorParameters;

use crate::registry::DeviceRegistry;

/// Default interval between presence polls
pub const EXISTS_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default interval between boot-completion polls
pub const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// An emulator process currently running on this host
#[derive(Debug, Clone, PartialEq)]
pub struct RunningEmulator {
    /// AVD name the process was started from
    pub name: String,
    /// Serial number, once the device bridge has assigned one
    pub serial: Option<String>,
    /// Effective parameters of the running instance
    pub parameters: EmulatorParameters,
}

/// External collaborator that starts/stops emulator processes
#[trait_variant::make(EmulatorLauncher: Send)]
pub trait LocalEmulatorLauncher {
    /// Start a new emulator satisfying the parameters; returns its AVD name
    async fn launch(&self, parameters: &EmulatorParameters) -> Result<String>;

    /// Terminate the emulator process with this serial
    async fn kill(&self, serial: &str) -> Result<()>;

    /// Wipe user data of the named AVD
    async fn wipe(&self, name: &str) -> Result<()>;

    /// Delete the named AVD image
    async fn erase(&self, name: &str) -> Result<()>;

    /// Emulators currently running on this host
    async fn running(&self) -> Result<Vec<RunningEmulator>>;
}

/// External probe for emulator boot completion
#[trait_variant::make(BootProbe: Send)]
pub trait LocalBootProbe {
    /// Whether the device with this serial has finished booting
    async fn boot_completed(&self, serial: &str) -> Result<bool>;
}

/// Lifecycle state of one emulator, driven by poll results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Requested,
    Launching,
    Existing,
    Booting,
    Ready,
    Closing,
    Gone,
    Failed,
}

impl fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmulatorState::Requested => "requested",
            EmulatorState::Launching => "launching",
            EmulatorState::Existing => "existing",
            EmulatorState::Booting => "booting",
            EmulatorState::Ready => "ready",
            EmulatorState::Closing => "closing",
            EmulatorState::Gone => "gone",
            EmulatorState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a provisioning request
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    /// A running emulator satisfied the request; no new process was started
    Reused { serial: String },
    /// A new emulator process was launched; wait for it to exist and boot
    Launched { name: String },
}

/// Provisions emulators against an external launcher and boot probe
pub struct EmulatorProvisioner<L, B> {
    launcher: L,
    probe: B,
    registry: Arc<DeviceRegistry>,
    states: Mutex<HashMap<String, EmulatorState>>,
    exists_poll: Duration,
    boot_poll: Duration,
}

impl<L, B> EmulatorProvisioner<L, B>
where
    L: EmulatorLauncher + Send + Sync,
    B: BootProbe + Send + Sync,
{
    pub fn new(launcher: L, probe: B, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            launcher,
            probe,
            registry,
            states: Mutex::new(HashMap::new()),
            exists_poll: EXISTS_POLL_INTERVAL,
            boot_poll: BOOT_POLL_INTERVAL,
        }
    }

    /// Override the poll intervals (shorter in tests)
    pub fn with_poll_intervals(mut self, exists_poll: Duration, boot_poll: Duration) -> Self {
        self.exists_poll = exists_poll;
        self.boot_poll = boot_poll;
        self
    }

    /// Lifecycle state of an emulator, if this provisioner has tracked it
    pub fn state_of(&self, name: &str) -> Option<EmulatorState> {
        self.states
            .lock()
            .expect("provisioner state lock poisoned")
            .get(name)
            .copied()
    }

    fn set_state(&self, name: &str, state: EmulatorState) {
        debug!("Emulator {} -> {}", name, state);
        self.states
            .lock()
            .expect("provisioner state lock poisoned")
            .insert(name.to_string(), state);
    }

    /// Satisfy the request from a running emulator, or launch a new one
    ///
    /// Present request fields must equal the candidate's effective value;
    /// absent fields match anything.
    pub async fn create_and_start(&self, parameters: &EmulatorParameters) -> Result<Provisioned> {
        let running = self.launcher.running().await?;

        for candidate in &running {
            if parameters.satisfied_by(&candidate.parameters) {
                if let Some(serial) = &candidate.serial {
                    info!(
                        "Reusing running emulator {} ({}) for request",
                        candidate.name, serial
                    );
                    self.set_state(&candidate.name, EmulatorState::Ready);
                    return Ok(Provisioned::Reused {
                        serial: serial.clone(),
                    });
                }
            }
        }

        let name = match self.launcher.launch(parameters).await {
            Ok(name) => name,
            Err(e) => {
                return Err(Error::provisioning(format!(
                    "could not start emulator process: {}",
                    e
                )));
            }
        };

        info!("Launched emulator {}", name);
        self.set_state(&name, EmulatorState::Launching);
        Ok(Provisioned::Launched { name })
    }

    /// Serial number of the running emulator with this AVD name
    pub async fn serial_of(&self, name: &str) -> Result<String> {
        self.try_serial_of(name)
            .await?
            .ok_or_else(|| Error::emulator_not_found(name))
    }

    async fn try_serial_of(&self, name: &str) -> Result<Option<String>> {
        let running = self.launcher.running().await?;
        Ok(running
            .into_iter()
            .find(|e| e.name == name)
            .and_then(|e| e.serial))
    }

    /// Wait until the emulator is visible in the device registry
    ///
    /// Polls at a bounded interval; fails with `TimeoutReached` at or
    /// shortly after the deadline, never earlier.
    pub async fn wait_for_exists(&self, name: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(serial) = self.try_serial_of(name).await? {
                if self.registry.exists(&serial) {
                    self.set_state(name, EmulatorState::Existing);
                    return Ok(serial);
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("emulator {}", name),
                    timeout.as_millis() as u64,
                ));
            }

            sleep(remaining_or(self.exists_poll, deadline)).await;
        }
    }

    /// Wait until the emulator reports boot completion
    ///
    /// Existence must be confirmed first (`wait_for_exists`). Fails with
    /// `DeviceBootTimeout` on expiry, `CommandFailed` if the probe errors,
    /// `DeviceNotFound` if the emulator vanishes mid-wait.
    pub async fn wait_for_boot(&self, name: &str, timeout: Duration) -> Result<()> {
        let known = self.state_of(name);
        if !matches!(
            known,
            Some(EmulatorState::Existing | EmulatorState::Booting | EmulatorState::Ready)
        ) {
            return Err(Error::emulator_not_found(name));
        }

        let serial = self.serial_of(name).await?;
        self.set_state(name, EmulatorState::Booting);
        let deadline = Instant::now() + timeout;

        loop {
            if !self.registry.exists(&serial) {
                self.set_state(name, EmulatorState::Gone);
                return Err(Error::device_not_found(&serial));
            }

            match self.probe.boot_completed(&serial).await {
                Ok(true) => {
                    self.set_state(name, EmulatorState::Ready);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    self.set_state(name, EmulatorState::Failed);
                    return Err(Error::command_failed(format!(
                        "boot probe for {} failed: {}",
                        serial, e
                    )));
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::boot_timeout(name, timeout.as_millis() as u64));
            }

            sleep(remaining_or(self.boot_poll, deadline)).await;
        }
    }

    /// Terminate the emulator process and delete its AVD image
    pub async fn close_and_erase(&self, serial: &str) -> Result<()> {
        let info = self.registry.get(serial)?;
        if !info.emulator {
            return Err(Error::not_possible(
                serial,
                "cannot close and erase a physical device",
            ));
        }

        let name = self.name_of(serial).await?;
        if let Some(name) = &name {
            self.set_state(name, EmulatorState::Closing);
        }

        self.launcher.kill(serial).await?;

        if let Some(name) = &name {
            self.launcher.erase(name).await?;
            self.set_state(name, EmulatorState::Gone);
        } else {
            warn!("Emulator {} killed but its AVD name is unknown", serial);
        }

        Ok(())
    }

    /// Wipe user data of a running emulator
    pub async fn wipe(&self, serial: &str) -> Result<()> {
        let name = self.emulator_name(serial).await?;
        self.launcher.wipe(&name).await
    }

    /// Delete the AVD image backing a running emulator
    pub async fn erase(&self, serial: &str) -> Result<()> {
        let name = self.emulator_name(serial).await?;
        self.launcher.erase(&name).await
    }

    async fn emulator_name(&self, serial: &str) -> Result<String> {
        let info = self.registry.get(serial)?;
        if !info.emulator {
            return Err(Error::not_possible(
                serial,
                "operation is only possible for emulators",
            ));
        }
        self.name_of(serial)
            .await?
            .ok_or_else(|| Error::emulator_not_found(serial))
    }

    async fn name_of(&self, serial: &str) -> Result<Option<String>> {
        let running = self.launcher.running().await?;
        Ok(running
            .into_iter()
            .find(|e| e.serial.as_deref() == Some(serial))
            .map(|e| e.name))
    }
}

/// Next sleep: the poll interval, clamped so the loop wakes at the deadline
fn remaining_or(interval: Duration, deadline: Instant) -> Duration {
    let remaining = deadline.saturating_duration_since(Instant::now());
    interval.min(remaining)
}

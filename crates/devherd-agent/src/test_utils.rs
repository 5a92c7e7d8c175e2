//! Test utilities for agent types
//!
//! Provides device snapshot helpers and in-memory collaborator fakes used
//! by unit tests here and by workspace integration tests (behind the
//! `test-helpers` feature).

use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use serde_json::{json, Value};

use devherd_core::prelude::*;
use devherd_core::{DeviceInfo, DeviceListChanged, EmulatorParameters, ScreenResolution};

use crate::notifier::{ServerEndpoint, ServerLink};
use crate::provisioner::{BootProbe, EmulatorLauncher, RunningEmulator};
use crate::router::{ActionArg, DeviceExecutor, RoutingAction};

/// Creates a test device snapshot with basic defaults
pub fn test_device(serial: &str, emulator: bool) -> DeviceInfo {
    DeviceInfo {
        serial: serial.to_string(),
        emulator,
        resolution: ScreenResolution::new(1080, 1920),
        os: "7.1".to_string(),
        model: if emulator { "sdk_gphone" } else { "Pixel 2" }.to_string(),
        dpi: 420,
        ram_mb: 2048,
    }
}

/// Creates a running emulator entry for launcher fakes
pub fn test_running_emulator(
    name: &str,
    serial: &str,
    parameters: EmulatorParameters,
) -> RunningEmulator {
    RunningEmulator {
        name: name.to_string(),
        serial: Some(serial.to_string()),
        parameters,
    }
}

/// In-memory [`crate::provisioner::EmulatorLauncher`] double
#[derive(Default)]
pub struct FakeLauncher {
    pub running: Mutex<Vec<RunningEmulator>>,
    pub fail_launch: bool,
    pub killed: Mutex<Vec<String>>,
    pub erased: Mutex<Vec<String>>,
    pub wiped: Mutex<Vec<String>>,
}

impl FakeLauncher {
    pub fn with_running(running: Vec<RunningEmulator>) -> Self {
        Self {
            running: Mutex::new(running),
            ..Default::default()
        }
    }
}

impl EmulatorLauncher for FakeLauncher {
    async fn launch(&self, _parameters: &EmulatorParameters) -> Result<String> {
        if self.fail_launch {
            return Err(Error::bridge("emulator binary missing"));
        }
        let index = self.running.lock().unwrap().len();
        let name = format!("herd_avd_{}", index);
        // The console assigns even-numbered serials from 5554 up
        self.running.lock().unwrap().push(RunningEmulator {
            name: name.clone(),
            serial: Some(format!("emulator-{}", 5554 + 2 * index)),
            parameters: EmulatorParameters::new(),
        });
        Ok(name)
    }

    async fn kill(&self, serial: &str) -> Result<()> {
        self.killed.lock().unwrap().push(serial.to_string());
        self.running
            .lock()
            .unwrap()
            .retain(|e| e.serial.as_deref() != Some(serial));
        Ok(())
    }

    async fn wipe(&self, name: &str) -> Result<()> {
        self.wiped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn erase(&self, name: &str) -> Result<()> {
        self.erased.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn running(&self) -> Result<Vec<RunningEmulator>> {
        Ok(self.running.lock().unwrap().clone())
    }
}

/// [`crate::provisioner::BootProbe`] double whose answers are scripted per call
///
/// Unscripted calls report "not booted yet".
#[derive(Default)]
pub struct FakeProbe {
    pub answers: Mutex<VecDeque<Result<bool>>>,
}

impl FakeProbe {
    pub fn scripted(answers: Vec<Result<bool>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
        }
    }
}

impl BootProbe for FakeProbe {
    async fn boot_completed(&self, _serial: &str) -> Result<bool> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(false))
    }
}

/// [`crate::router::DeviceExecutor`] double that records calls and answers
/// with a canned value
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, RoutingAction, Vec<ActionArg>)>>,
    pub fail: bool,
}

impl DeviceExecutor for RecordingExecutor {
    async fn execute(
        &self,
        serial: &str,
        action: RoutingAction,
        args: &[ActionArg],
    ) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((serial.to_string(), action, args.to_vec()));
        if self.fail {
            Err(Error::command_failed("device shell died"))
        } else {
            Ok(json!(42))
        }
    }
}

/// [`crate::notifier::ServerLink`] double that records pushes and fails on
/// scripted attempts
#[derive(Default)]
pub struct RecordingLink {
    pub delivered: Mutex<Vec<DeviceListChanged>>,
    pub attempts: AtomicU64,
    pub connection_requests: Mutex<Vec<(ServerEndpoint, u16)>>,
    // true = this attempt fails
    pub failures: Mutex<VecDeque<bool>>,
}

impl RecordingLink {
    pub fn failing(script: Vec<bool>) -> Self {
        Self {
            failures: Mutex::new(script.into()),
            ..Default::default()
        }
    }
}

impl ServerLink for RecordingLink {
    async fn device_list_changed(
        &self,
        _endpoint: &ServerEndpoint,
        event: &DeviceListChanged,
    ) -> Result<()> {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let fail = self.failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail {
            return Err(Error::channel_send("server unreachable"));
        }
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn post_connection_request(&self, endpoint: &ServerEndpoint, port: u16) -> Result<()> {
        self.connection_requests
            .lock()
            .unwrap()
            .push((endpoint.clone(), port));
        Ok(())
    }
}

//! Agent manager facade
//!
//! The server-visible surface of one agent: fleet queries, emulator
//! lifecycle, hardware specification reporting, performance scoring, and
//! server registration. The manager composes the registries and the
//! provisioner without owning their internals; every operation here may be
//! invoked concurrently from independent remote workers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use tokio::time::{sleep, Instant};

use devherd_core::prelude::*;
use devherd_core::{EmulatorParameters, SystemSpecification};

use crate::bindings::WrapperBindingRegistry;
use crate::notifier::ServerRegistration;
use crate::provisioner::{BootProbe, EmulatorLauncher, EmulatorProvisioner, Provisioned};
use crate::registry::DeviceRegistry;
use crate::router::{DeviceExecutor, DeviceWrapper};

/// Interval between device presence polls in bounded waits
pub const DEVICE_EXISTS_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// How long `create_and_start_emulator` waits for a fresh emulator to
/// appear on the device bridge
pub const EMULATOR_CREATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Context of one inbound remote call
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    /// Address the call arrived from
    pub peer: IpAddr,
}

impl CallContext {
    pub fn new(peer: IpAddr) -> Self {
        Self { peer }
    }
}

/// Samples the hardware of the machine the agent runs on
///
/// Every call is a fresh point-in-time sample; nothing is cached because
/// free RAM and disk go stale immediately.
#[cfg_attr(test, mockall::automock)]
pub trait HostProbe: Send + Sync {
    fn total_ram_mb(&self) -> u64;
    fn free_ram_mb(&self) -> u64;
    fn cpu_count(&self) -> u32;
    fn hardware_acceleration(&self) -> bool;
    fn benchmark_score(&self) -> f64;
    fn free_disk_space_mb(&self) -> u64;
}

/// Probe backed by the host operating system
#[derive(Debug, Default)]
pub struct SystemHostProbe;

impl HostProbe for SystemHostProbe {
    fn total_ram_mb(&self) -> u64 {
        read_meminfo_kb("MemTotal").map(|kb| kb / 1024).unwrap_or(0)
    }

    fn free_ram_mb(&self) -> u64 {
        read_meminfo_kb("MemAvailable")
            .or_else(|| read_meminfo_kb("MemFree"))
            .map(|kb| kb / 1024)
            .unwrap_or(0)
    }

    fn cpu_count(&self) -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    fn hardware_acceleration(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            std::path::Path::new("/dev/kvm").exists()
        }
        #[cfg(target_os = "macos")]
        {
            // Hypervisor.framework ships with the OS
            true
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            false
        }
    }

    fn benchmark_score(&self) -> f64 {
        // Fixed integer workload timed on one core. The absolute number is
        // meaningless; the server only compares scores across agents.
        const ROUNDS: u64 = 2_000_000;
        let start = StdInstant::now();
        let mut acc: u64 = 0x9e3779b9;
        for i in 0..ROUNDS {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
            acc ^= acc >> 33;
        }
        let elapsed = start.elapsed().as_secs_f64();
        // Fold acc in so the loop cannot be optimized away
        let noise = (acc & 1) as f64 * f64::EPSILON;
        if elapsed > 0.0 {
            ROUNDS as f64 / elapsed / 1_000_000.0 + noise
        } else {
            0.0
        }
    }

    fn free_disk_space_mb(&self) -> u64 {
        let output = std::process::Command::new("df").args(["-Pk", "."]).output();
        match output {
            Ok(output) if output.status.success() => {
                parse_df_available_kb(&String::from_utf8_lossy(&output.stdout))
                    .map(|kb| kb / 1024)
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// Read one field of /proc/meminfo, in kB
fn read_meminfo_kb(field: &str) -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// Parse the "Available" column of `df -Pk` output
fn parse_df_available_kb(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|value| value.parse().ok())
}

/// The agent-facing facade implementing the server-visible contract
pub struct AgentManager<L, B, E, H> {
    agent_id: String,
    registry: Arc<DeviceRegistry>,
    bindings: Arc<WrapperBindingRegistry>,
    provisioner: Arc<EmulatorProvisioner<L, B>>,
    executor: Arc<E>,
    host: H,
    registration: Arc<ServerRegistration>,
    exists_poll: Duration,
}

impl<L, B, E, H> AgentManager<L, B, E, H>
where
    L: EmulatorLauncher + Send + Sync,
    B: BootProbe + Send + Sync,
    E: DeviceExecutor + Send + Sync,
    H: HostProbe,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        registry: Arc<DeviceRegistry>,
        bindings: Arc<WrapperBindingRegistry>,
        provisioner: Arc<EmulatorProvisioner<L, B>>,
        executor: Arc<E>,
        host: H,
        registration: Arc<ServerRegistration>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            registry,
            bindings,
            provisioner,
            executor,
            host,
            registration,
            exists_poll: DEVICE_EXISTS_POLL_INTERVAL,
        }
    }

    /// Override the presence poll interval (shorter in tests)
    pub fn with_exists_poll(mut self, interval: Duration) -> Self {
        self.exists_poll = interval;
        self
    }

    // ─────────────────────────────────────────────────────────
    // Identity and Registration
    // ─────────────────────────────────────────────────────────

    /// Unique identifier of this agent
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register the server's callback endpoint
    ///
    /// A single registration is active at a time; re-registration
    /// overwrites, it does not queue.
    pub fn register_server(&self, ip: impl Into<String>, port: u16) {
        self.registration.register(ip, port);
    }

    /// Address of the machine that invoked the current call
    pub fn invoker_ip_address(&self, ctx: &CallContext) -> String {
        ctx.peer.to_string()
    }

    // ─────────────────────────────────────────────────────────
    // Specification and Scoring
    // ─────────────────────────────────────────────────────────

    /// Sample the host hardware
    pub fn specification(&self) -> SystemSpecification {
        SystemSpecification {
            total_ram_mb: self.host.total_ram_mb(),
            free_ram_mb: self.host.free_ram_mb(),
            cpu_count: self.host.cpu_count(),
            hardware_acceleration: self.host.hardware_acceleration(),
            benchmark_score: self.host.benchmark_score(),
            free_disk_space_mb: self.host.free_disk_space_mb(),
        }
    }

    /// Score how well an emulator with these parameters would run here
    ///
    /// Monotonic in free RAM and CPU count; zero when the request cannot be
    /// satisfied at all. Only relative order across agents matters.
    pub fn performance_score(&self, parameters: &EmulatorParameters) -> f64 {
        let free_ram = self.host.free_ram_mb();
        let requested_ram = parameters.ram_mb.unwrap_or(0);
        if requested_ram > free_ram {
            return 0.0;
        }

        let headroom = (free_ram - requested_ram) as f64;
        self.host.benchmark_score() * self.host.cpu_count() as f64 + headroom / 16.0
    }

    // ─────────────────────────────────────────────────────────
    // Fleet Queries
    // ─────────────────────────────────────────────────────────

    /// Check if any device is present on this agent
    pub fn is_any_device_present(&self) -> bool {
        self.registry.is_any_present()
    }

    /// Check if a specific serial is present
    pub fn is_device_present(&self, serial: &str) -> bool {
        self.registry.exists(serial)
    }

    /// Check if any emulator is present on this agent
    pub fn is_any_emulator_present(&self) -> bool {
        self.registry.is_any_emulator_present()
    }

    /// Binding identifiers for every device currently present
    ///
    /// Devices that were never wrapped get their binding allocated here.
    pub fn all_device_binding_ids(&self) -> Vec<String> {
        self.registry
            .serials()
            .iter()
            .map(|serial| self.bindings.binding_for(serial))
            .collect()
    }

    /// Binding identifier for a present device
    pub fn wrapper_binding_for(&self, serial: &str) -> Result<String> {
        if !self.registry.exists(serial) {
            return Err(Error::device_not_found(serial));
        }
        Ok(self.bindings.binding_for(serial))
    }

    /// Wrapper for the first device present on this agent
    pub fn first_available_device_wrapper(&self) -> Result<DeviceWrapper<E>> {
        let info = self
            .registry
            .first_device()
            .ok_or_else(|| Error::device_not_found("*"))?;
        self.wrapper_for(&info.serial)
    }

    /// Wrapper for the first emulator present on this agent
    pub fn first_available_emulator_wrapper(&self) -> Result<DeviceWrapper<E>> {
        let info = self
            .registry
            .first_emulator()
            .ok_or_else(|| Error::device_not_found("* (emulator)"))?;
        self.wrapper_for(&info.serial)
    }

    /// Wrapper for a specific present device
    pub fn wrapper_for(&self, serial: &str) -> Result<DeviceWrapper<E>> {
        let binding = self.wrapper_binding_for(serial)?;
        Ok(DeviceWrapper::new(
            serial,
            binding,
            self.registry.clone(),
            self.bindings.clone(),
            self.executor.clone(),
        ))
    }

    /// Wrapper looked up by its published binding identifier
    pub fn wrapper_by_binding(&self, binding: &str) -> Result<DeviceWrapper<E>> {
        let serial = self.bindings.resolve(binding)?;
        self.wrapper_for(&serial)
    }

    /// Wait until a device with this serial is present
    pub async fn wait_for_device_exists(&self, serial: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.registry.exists(serial) {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("device {}", serial),
                    timeout.as_millis() as u64,
                ));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.exists_poll.min(remaining)).await;
        }
    }

    // ─────────────────────────────────────────────────────────
    // Emulator Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Create and start an emulator, or reuse a compatible running one
    ///
    /// Returns the wrapper binding identifier once the emulator is visible
    /// on the device bridge. Boot completion is waited for separately via
    /// [`Self::wait_for_emulator_to_boot`].
    pub async fn create_and_start_emulator(
        &self,
        parameters: &EmulatorParameters,
    ) -> Result<String> {
        let serial = match self.provisioner.create_and_start(parameters).await? {
            Provisioned::Reused { serial } => serial,
            Provisioned::Launched { name } => {
                self.provisioner
                    .wait_for_exists(&name, EMULATOR_CREATE_TIMEOUT)
                    .await?
            }
        };

        self.wait_for_device_exists(&serial, EMULATOR_CREATE_TIMEOUT)
            .await?;
        Ok(self.bindings.binding_for(&serial))
    }

    /// Close the emulator with this serial and erase its image
    pub async fn close_and_erase_emulator(&self, serial: &str) -> Result<()> {
        self.provisioner.close_and_erase(serial).await
    }

    /// Serial number of the running emulator with this AVD name
    pub async fn serial_of_emulator(&self, name: &str) -> Result<String> {
        self.provisioner.serial_of(name).await
    }

    /// Wait until an emulator with this AVD name is present
    pub async fn wait_for_emulator_exists(&self, name: &str, timeout: Duration) -> Result<()> {
        self.provisioner.wait_for_exists(name, timeout).await?;
        Ok(())
    }

    /// Wait until an emulator with this AVD name finishes booting
    pub async fn wait_for_emulator_to_boot(&self, name: &str, timeout: Duration) -> Result<()> {
        self.provisioner.wait_for_boot(name, timeout).await
    }
}

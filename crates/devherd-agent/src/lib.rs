//! # devherd-agent - Device Fleet Manager
//!
//! Manages the fleet of devices attached to one agent: the live device
//! registry, emulator provisioning, wrapper bindings, remote action
//! routing, and server event push.
//!
//! Depends on [`devherd_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Fleet State
//! - [`DeviceRegistry`] - Source of truth for device presence/absence
//! - [`WrapperBindingRegistry`] - Publishing identifiers for device wrappers
//!
//! ### Emulator Provisioning
//! - [`EmulatorProvisioner`] - Declarative parameters to booted emulator
//! - [`EmulatorLauncher`], [`BootProbe`] - External collaborator seams
//! - [`EmulatorState`] - Poll-driven per-emulator lifecycle
//!
//! ### Action Routing
//! - [`RoutingAction`] - Enumerated device operations with fixed signatures
//! - [`DeviceWrapper`] - The published router for one bound device
//! - [`ApkTransferSession`] - Multi-step install state machine
//!
//! ### Agent Facade
//! - [`AgentManager`] - The server-visible contract of one agent
//! - [`EventNotifier`] - Best-effort device-list-changed push
//!
//! ### Device Bridge (adb-backed collaborators)
//! - [`AdbDeviceSource`] - Presence polling via `adb devices`
//! - [`SdkEmulatorLauncher`] - Emulator lifecycle via the Android SDK
//! - [`AdbBootProbe`], [`AdbDeviceExecutor`] - Probe and executor over adb
//! - [`ToolAvailability`] - Startup check for adb/emulator binaries

pub mod adb;
pub mod bindings;
pub mod config;
pub mod manager;
pub mod notifier;
pub mod provisioner;
pub mod registry;
pub mod router;
pub mod sdk;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tools;
pub mod transfer;

// Public API re-exports
pub use adb::{AdbBootProbe, AdbBridge, AdbDeviceExecutor, AdbDeviceSource};
pub use bindings::{
    WrapperBindingRegistry, AGENT_MANAGER_BINDING, CONNECTION_REQUEST_RECEIVER_BINDING,
    FLEET_EVENT_RECEIVER_BINDING,
};
pub use config::{default_config_dir, load_or_create_agent_id, load_settings, AgentSettings};
pub use manager::{AgentManager, CallContext, HostProbe, SystemHostProbe};
pub use notifier::{EventNotifier, LoggingServerLink, ServerEndpoint, ServerLink, ServerRegistration};
pub use provisioner::{
    BootProbe, EmulatorLauncher, EmulatorProvisioner, EmulatorState, Provisioned, RunningEmulator,
};
pub use registry::DeviceRegistry;
pub use router::{ActionArg, ArgKind, DeviceExecutor, DeviceWrapper, RoutingAction};
pub use sdk::SdkEmulatorLauncher;
pub use tools::ToolAvailability;
pub use transfer::{ApkTransferSession, TransferPhase};

/// Production agent manager wired to the Android SDK collaborators
pub type SdkAgentManager =
    AgentManager<SdkEmulatorLauncher, AdbBootProbe, AdbDeviceExecutor, SystemHostProbe>;

//! Device Herd - device fleet agent daemon
//!
//! Binary entry point: loads settings, checks tool availability, wires the
//! fleet core together, and runs the presence/notification loops until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use devherd_agent::config::parse_endpoint;
use devherd_agent::{
    default_config_dir, load_or_create_agent_id, load_settings, AdbBootProbe, AdbBridge,
    AdbDeviceExecutor, AdbDeviceSource, DeviceRegistry, EmulatorProvisioner, EventNotifier,
    LoggingServerLink, SdkAgentManager, SdkEmulatorLauncher, ServerEndpoint, ServerRegistration,
    SystemHostProbe, ToolAvailability, WrapperBindingRegistry,
};

/// Device Herd - device fleet agent for distributed mobile testing
#[derive(Parser, Debug)]
#[command(name = "devherd")]
#[command(about = "Device fleet agent for distributed mobile testing", long_about = None)]
struct Args {
    /// Path to the .devherd configuration directory
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Server bootstrap endpoint (ip:port), overrides the config file
    #[arg(long, value_name = "IP:PORT")]
    server: Option<String>,

    /// Device presence poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    devherd_core::logging::init()?;

    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);
    let mut settings = load_settings(&config_dir);
    if let Some(server) = args.server {
        settings.server = Some(server);
    }
    if let Some(ms) = args.poll_interval_ms {
        settings.device_poll_ms = ms;
    }

    let agent_id = load_or_create_agent_id(&config_dir)?;
    info!("Agent id: {}", agent_id);

    let tools = ToolAvailability::check().await;
    if let Some(message) = tools.adb_unavailable_message() {
        warn!("{}", message);
        eprintln!("{}", message);
    }
    if let Some(message) = tools.emulator_unavailable_message() {
        warn!("{}", message);
    }

    let adb_path = settings
        .adb_path
        .clone()
        .or_else(|| tools.adb_path.clone())
        .unwrap_or_else(|| "adb".to_string());
    let emulator_path = settings
        .emulator_path
        .clone()
        .or_else(|| tools.emulator_path.clone())
        .unwrap_or_else(|| "emulator".to_string());

    let bridge = AdbBridge::new(adb_path);
    let (registry, changes) = DeviceRegistry::new();
    let registry = Arc::new(registry);
    let bindings = Arc::new(WrapperBindingRegistry::new());
    let registration = Arc::new(ServerRegistration::new());

    let provisioner = Arc::new(EmulatorProvisioner::new(
        SdkEmulatorLauncher::new(emulator_path, bridge.clone()),
        AdbBootProbe::new(bridge.clone()),
        registry.clone(),
    ));

    let manager = SdkAgentManager::new(
        agent_id.clone(),
        registry.clone(),
        bindings.clone(),
        provisioner,
        Arc::new(AdbDeviceExecutor::new(bridge.clone())),
        SystemHostProbe,
        registration.clone(),
    );

    let spec = manager.specification();
    info!(
        "Host: {} MB RAM ({} MB free), {} CPUs, hw accel: {}",
        spec.total_ram_mb, spec.free_ram_mb, spec.cpu_count, spec.hardware_acceleration
    );

    let notifier = Arc::new(EventNotifier::new(
        agent_id.clone(),
        LoggingServerLink,
        registration.clone(),
        bindings,
    ));
    tokio::spawn(notifier.clone().run(changes));

    let source = AdbDeviceSource::new(
        bridge,
        registry,
        Duration::from_millis(settings.device_poll_ms),
    );
    tokio::spawn(source.run());

    if let Some(server) = &settings.server {
        let (ip, port) = parse_endpoint(server)?;
        registration.register(ip.clone(), port);
        notifier
            .post_connection_request(&ServerEndpoint::new(ip, port), settings.agent_port)
            .await?;
    }

    info!("Agent {} running, press Ctrl-C to stop", agent_id);
    tokio::signal::ctrl_c().await?;

    info!(
        "Shutting down ({} devices attached)",
        manager.all_device_binding_ids().len()
    );
    Ok(())
}

//! Remote action routing
//!
//! Every device operation funnels through one dispatch entry point:
//! `route(action, args)`. A fixed per-device interface enumerating dozens
//! of operations would couple agent and server releases; the single entry
//! point with an enumerated [`RoutingAction`] lets new actions ship without
//! changing the remote contract's shape. The router validates argument
//! count and kinds against the action's declared signature before touching
//! the device, so a malformed call fails fast with `CommandFailed` instead
//! of a downstream type error.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use devherd_core::prelude::*;

use crate::bindings::WrapperBindingRegistry;
use crate::registry::DeviceRegistry;
use crate::transfer::ApkTransferSession;

/// Enumerated identifier for a single device-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingAction {
    GetDeviceInformation,
    GetBatteryLevel,
    GetBatteryState,
    GetPowerState,
    GetNetworkSpeed,
    SetNetworkSpeed,
    GetOrientation,
    SetOrientation,
    GetAwakeStatus,
    WakeUp,
    ReceiveSms,
    InitApkInstall,
    AppendApkFragment,
    BuildAndInstallApk,
    DiscardApk,
}

/// Kind of a single routed argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Str,
    UInt,
    Bool,
    Bytes,
}

/// A routed argument value
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionArg {
    Str(String),
    UInt(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl ActionArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            ActionArg::Str(_) => ArgKind::Str,
            ActionArg::UInt(_) => ArgKind::UInt,
            ActionArg::Bool(_) => ArgKind::Bool,
            ActionArg::Bytes(_) => ArgKind::Bytes,
        }
    }
}

impl RoutingAction {
    /// Every action this agent release knows about
    pub const ALL: &'static [RoutingAction] = &[
        RoutingAction::GetDeviceInformation,
        RoutingAction::GetBatteryLevel,
        RoutingAction::GetBatteryState,
        RoutingAction::GetPowerState,
        RoutingAction::GetNetworkSpeed,
        RoutingAction::SetNetworkSpeed,
        RoutingAction::GetOrientation,
        RoutingAction::SetOrientation,
        RoutingAction::GetAwakeStatus,
        RoutingAction::WakeUp,
        RoutingAction::ReceiveSms,
        RoutingAction::InitApkInstall,
        RoutingAction::AppendApkFragment,
        RoutingAction::BuildAndInstallApk,
        RoutingAction::DiscardApk,
    ];

    /// Declared argument signature of this action
    pub fn signature(&self) -> &'static [ArgKind] {
        match self {
            RoutingAction::GetDeviceInformation
            | RoutingAction::GetBatteryLevel
            | RoutingAction::GetBatteryState
            | RoutingAction::GetPowerState
            | RoutingAction::GetNetworkSpeed
            | RoutingAction::GetOrientation
            | RoutingAction::GetAwakeStatus
            | RoutingAction::WakeUp
            | RoutingAction::InitApkInstall
            | RoutingAction::BuildAndInstallApk
            | RoutingAction::DiscardApk => &[],
            RoutingAction::SetNetworkSpeed => &[ArgKind::UInt, ArgKind::UInt],
            RoutingAction::SetOrientation => &[ArgKind::UInt],
            RoutingAction::ReceiveSms => &[ArgKind::Str, ArgKind::Str],
            RoutingAction::AppendApkFragment => &[ArgKind::Bytes],
        }
    }

    /// Whether this action is a step of the APK transfer session
    pub fn is_transfer_step(&self) -> bool {
        matches!(
            self,
            RoutingAction::InitApkInstall
                | RoutingAction::AppendApkFragment
                | RoutingAction::BuildAndInstallApk
                | RoutingAction::DiscardApk
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingAction::GetDeviceInformation => "GET_DEVICE_INFORMATION",
            RoutingAction::GetBatteryLevel => "GET_BATTERY_LEVEL",
            RoutingAction::GetBatteryState => "GET_BATTERY_STATE",
            RoutingAction::GetPowerState => "GET_POWER_STATE",
            RoutingAction::GetNetworkSpeed => "GET_NETWORK_SPEED",
            RoutingAction::SetNetworkSpeed => "SET_NETWORK_SPEED",
            RoutingAction::GetOrientation => "GET_ORIENTATION",
            RoutingAction::SetOrientation => "SET_ORIENTATION",
            RoutingAction::GetAwakeStatus => "GET_AWAKE_STATUS",
            RoutingAction::WakeUp => "WAKE_UP",
            RoutingAction::ReceiveSms => "RECEIVE_SMS",
            RoutingAction::InitApkInstall => "INIT_APK_INSTALL",
            RoutingAction::AppendApkFragment => "APPEND_APK_FRAGMENT",
            RoutingAction::BuildAndInstallApk => "BUILD_AND_INSTALL_APK",
            RoutingAction::DiscardApk => "DISCARD_APK",
        }
    }
}

impl fmt::Display for RoutingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingAction {
    type Err = Error;

    /// Parse an action name from the wire
    ///
    /// A name minted by a newer server release that this agent does not
    /// know yet surfaces as `UnsupportedAction`.
    fn from_str(s: &str) -> Result<Self> {
        RoutingAction::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| Error::unsupported_action(s))
    }
}

/// The opaque per-device operation backend
///
/// Automation logic lives behind this seam; the router only validates and
/// dispatches.
#[trait_variant::make(DeviceExecutor: Send)]
pub trait LocalDeviceExecutor {
    async fn execute(
        &self,
        serial: &str,
        action: RoutingAction,
        args: &[ActionArg],
    ) -> Result<Value>;
}

/// The published action router for one bound device
pub struct DeviceWrapper<E> {
    serial: String,
    binding: String,
    registry: Arc<DeviceRegistry>,
    bindings: Arc<WrapperBindingRegistry>,
    executor: Arc<E>,
    supported: HashSet<RoutingAction>,
    // Serializes transfer-session steps for this one device; routes to
    // other devices never contend on it.
    session: Mutex<ApkTransferSession>,
}

impl<E> DeviceWrapper<E>
where
    E: DeviceExecutor + Send + Sync,
{
    pub fn new(
        serial: impl Into<String>,
        binding: impl Into<String>,
        registry: Arc<DeviceRegistry>,
        bindings: Arc<WrapperBindingRegistry>,
        executor: Arc<E>,
    ) -> Self {
        Self {
            serial: serial.into(),
            binding: binding.into(),
            registry,
            bindings,
            executor,
            supported: RoutingAction::ALL.iter().copied().collect(),
            session: Mutex::new(ApkTransferSession::new()),
        }
    }

    /// Restrict the wrapper to a subset of actions
    pub fn with_supported(mut self, actions: impl IntoIterator<Item = RoutingAction>) -> Self {
        self.supported = actions.into_iter().collect();
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Invoke an action on this device
    pub async fn route(&self, action: RoutingAction, args: Vec<ActionArg>) -> Result<Value> {
        if !self.supported.contains(&action) {
            return Err(Error::unsupported_action(action.as_str()));
        }

        validate_args(action, &args)?;

        if action.is_transfer_step() {
            return self.route_transfer_step(action, args).await;
        }

        match action {
            RoutingAction::GetDeviceInformation => {
                let info = self.registry.get(&self.serial)?;
                Ok(serde_json::to_value(info)?)
            }
            _ => self.executor.execute(&self.serial, action, &args).await,
        }
    }

    async fn route_transfer_step(
        &self,
        action: RoutingAction,
        args: Vec<ActionArg>,
    ) -> Result<Value> {
        let mut session = self.session.lock().await;
        match action {
            RoutingAction::InitApkInstall => {
                session.init()?;
                Ok(Value::Null)
            }
            RoutingAction::AppendApkFragment => {
                let ActionArg::Bytes(fragment) = &args[0] else {
                    unreachable!("signature validated above");
                };
                session.append(fragment)?;
                Ok(Value::Null)
            }
            RoutingAction::BuildAndInstallApk => {
                let apk = session.begin_install()?;
                let result = self
                    .executor
                    .execute(
                        &self.serial,
                        RoutingAction::BuildAndInstallApk,
                        &[ActionArg::Bytes(apk)],
                    )
                    .await;
                match result {
                    Ok(value) => {
                        session.finish();
                        Ok(value)
                    }
                    Err(e) => {
                        session.discard();
                        Err(e)
                    }
                }
            }
            RoutingAction::DiscardApk => {
                session.discard();
                Ok(Value::Null)
            }
            _ => unreachable!("not a transfer step"),
        }
    }

    /// Retire this wrapper's binding and release session resources
    pub async fn unbind(&self) {
        self.session.lock().await.discard();
        self.bindings.unbind(&self.serial);
        info!("Wrapper {} for device {} unbound", self.binding, self.serial);
    }
}

/// Check argument count and kinds against the action's declared signature
fn validate_args(action: RoutingAction, args: &[ActionArg]) -> Result<()> {
    let signature = action.signature();
    if args.len() != signature.len() {
        return Err(Error::command_failed(format!(
            "{} expects {} argument(s), got {}",
            action,
            signature.len(),
            args.len()
        )));
    }
    for (position, (expected, arg)) in signature.iter().zip(args).enumerate() {
        if arg.kind() != *expected {
            return Err(Error::command_failed(format!(
                "{} argument {} must be {:?}, got {:?}",
                action,
                position,
                expected,
                arg.kind()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_device, RecordingExecutor};
    use serde_json::json;

    fn wrapper_with(
        executor: RecordingExecutor,
    ) -> (DeviceWrapper<RecordingExecutor>, Arc<WrapperBindingRegistry>) {
        let (registry, _rx) = DeviceRegistry::new();
        let registry = Arc::new(registry);
        registry.upsert(test_device("emulator-5554", true));

        let bindings = Arc::new(WrapperBindingRegistry::new());
        let binding = bindings.binding_for("emulator-5554");
        let wrapper = DeviceWrapper::new(
            "emulator-5554",
            binding,
            registry,
            bindings.clone(),
            Arc::new(executor),
        );
        (wrapper, bindings)
    }

    #[test]
    fn test_action_round_trips_through_name() {
        for action in RoutingAction::ALL {
            let parsed: RoutingAction = action.as_str().parse().unwrap();
            assert_eq!(parsed, *action);
        }
    }

    #[test]
    fn test_unknown_action_name_is_unsupported() {
        let err = "SIMULATE_FOLD".parse::<RoutingAction>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { .. }));
    }

    #[tokio::test]
    async fn test_route_dispatches_to_executor() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        let result = wrapper
            .route(RoutingAction::GetBatteryLevel, vec![])
            .await
            .unwrap();
        assert_eq!(result, json!(42));

        let calls = wrapper.executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, RoutingAction::GetBatteryLevel);
    }

    #[tokio::test]
    async fn test_arity_mismatch_fails_without_invoking_executor() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        let err = wrapper
            .route(
                RoutingAction::SetNetworkSpeed,
                vec![ActionArg::UInt(256)], // needs two
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(wrapper.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kind_mismatch_fails_without_invoking_executor() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        let err = wrapper
            .route(
                RoutingAction::ReceiveSms,
                vec![ActionArg::Str("555-0100".into()), ActionArg::UInt(7)],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(wrapper.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_action_for_restricted_wrapper() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());
        let wrapper = wrapper.with_supported([RoutingAction::GetBatteryLevel]);

        let err = wrapper
            .route(RoutingAction::WakeUp, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { .. }));
    }

    #[tokio::test]
    async fn test_device_information_served_from_registry() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        let value = wrapper
            .route(RoutingAction::GetDeviceInformation, vec![])
            .await
            .unwrap();

        assert_eq!(value["serial"], "emulator-5554");
        assert_eq!(value["emulator"], true);
        // Served locally, not via the executor
        assert!(wrapper.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_cycle_through_router() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        wrapper
            .route(RoutingAction::InitApkInstall, vec![])
            .await
            .unwrap();
        wrapper
            .route(
                RoutingAction::AppendApkFragment,
                vec![ActionArg::Bytes(b"PK\x03\x04".to_vec())],
            )
            .await
            .unwrap();
        wrapper
            .route(
                RoutingAction::AppendApkFragment,
                vec![ActionArg::Bytes(b"tail".to_vec())],
            )
            .await
            .unwrap();
        wrapper
            .route(RoutingAction::BuildAndInstallApk, vec![])
            .await
            .unwrap();

        // The executor received the assembled archive
        let calls = wrapper.executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, RoutingAction::BuildAndInstallApk);
        assert_eq!(calls[0].2, vec![ActionArg::Bytes(b"PK\x03\x04tail".to_vec())]);
    }

    #[tokio::test]
    async fn test_append_before_init_fails() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        let err = wrapper
            .route(
                RoutingAction::AppendApkFragment,
                vec![ActionArg::Bytes(b"chunk".to_vec())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(wrapper.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_discards_session() {
        let (wrapper, _) = wrapper_with(RecordingExecutor {
            fail: true,
            ..Default::default()
        });

        wrapper
            .route(RoutingAction::InitApkInstall, vec![])
            .await
            .unwrap();
        wrapper
            .route(
                RoutingAction::AppendApkFragment,
                vec![ActionArg::Bytes(b"broken".to_vec())],
            )
            .await
            .unwrap();
        let err = wrapper
            .route(RoutingAction::BuildAndInstallApk, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));

        // Session fell back to idle: a fresh transfer can start
        wrapper
            .route(RoutingAction::InitApkInstall, vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_discard_is_valid_in_any_state() {
        let (wrapper, _) = wrapper_with(RecordingExecutor::default());

        wrapper
            .route(RoutingAction::DiscardApk, vec![])
            .await
            .unwrap();

        wrapper
            .route(RoutingAction::InitApkInstall, vec![])
            .await
            .unwrap();
        wrapper
            .route(RoutingAction::DiscardApk, vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unbind_retires_binding() {
        let (wrapper, bindings) = wrapper_with(RecordingExecutor::default());
        let binding = wrapper.binding().to_string();

        wrapper.unbind().await;

        assert!(!bindings.is_bound("emulator-5554"));
        assert!(bindings.resolve(&binding).is_err());
    }
}

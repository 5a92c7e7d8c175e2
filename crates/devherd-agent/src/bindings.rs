//! Wrapper binding registry
//!
//! Assigns and tracks the publishing identifiers under which each device's
//! action router is remotely reachable. Identifiers are unique for the
//! agent's process lifetime; a retired identifier is never handed out nor
//! resolved again, so the server cannot act on a stale reference.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;

use devherd_core::prelude::*;

/// Publishing name of the agent manager endpoint
pub const AGENT_MANAGER_BINDING: &str = "AgentManager";

/// Publishing name of the server's connection request receiver
pub const CONNECTION_REQUEST_RECEIVER_BINDING: &str = "ConnectionRequestReceiver";

/// Publishing name of the server's fleet event receiver
pub const FLEET_EVENT_RECEIVER_BINDING: &str = "FleetEventReceiver";

/// Process-wide binding counter
static BINDING_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Tracks the live binding identifier for each wrapped device
#[derive(Debug, Default)]
pub struct WrapperBindingRegistry {
    inner: Mutex<BindingsInner>,
}

#[derive(Debug, Default)]
struct BindingsInner {
    by_serial: HashMap<String, String>,
    by_binding: HashMap<String, String>,
    retired: HashSet<String>,
}

impl WrapperBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the binding identifier for a serial, allocating one if absent
    ///
    /// Idempotent: a device that is already bound keeps its identifier.
    pub fn binding_for(&self, serial: &str) -> String {
        let mut inner = self.inner.lock().expect("binding registry lock poisoned");
        if let Some(existing) = inner.by_serial.get(serial) {
            return existing.clone();
        }

        let binding = allocate_identifier(serial);
        debug!("Publishing device {} under {}", serial, binding);
        inner.by_serial.insert(serial.to_string(), binding.clone());
        inner.by_binding.insert(binding.clone(), serial.to_string());
        binding
    }

    /// Retire the binding for a serial, if one exists
    ///
    /// The retired identifier will never resolve again within this process.
    pub fn unbind(&self, serial: &str) -> Option<String> {
        let mut inner = self.inner.lock().expect("binding registry lock poisoned");
        let binding = inner.by_serial.remove(serial)?;
        inner.by_binding.remove(&binding);
        inner.retired.insert(binding.clone());
        debug!("Retired binding {} for device {}", binding, serial);
        Some(binding)
    }

    /// Resolve a binding identifier back to its serial number
    pub fn resolve(&self, binding: &str) -> Result<String> {
        let inner = self.inner.lock().expect("binding registry lock poisoned");
        inner
            .by_binding
            .get(binding)
            .cloned()
            .ok_or_else(|| Error::binding_not_found(binding))
    }

    /// Check whether a serial currently has a live binding
    pub fn is_bound(&self, serial: &str) -> bool {
        self.inner
            .lock()
            .expect("binding registry lock poisoned")
            .by_serial
            .contains_key(serial)
    }

    /// All currently live binding identifiers
    pub fn active_bindings(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("binding registry lock poisoned")
            .by_binding
            .keys()
            .cloned()
            .collect()
    }
}

/// Build a process-unique binding identifier for a serial number
///
/// The counter guarantees uniqueness within this process; the nonce guards
/// against collisions with identifiers minted by a previous agent process
/// the server may still remember.
fn allocate_identifier(serial: &str) -> String {
    let counter = BINDING_COUNTER.fetch_add(1, Ordering::SeqCst);
    let nonce: u16 = rand::thread_rng().gen();
    let sanitized: String = serial
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("device_{}_{}_{:04x}", sanitized, counter, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_for_is_idempotent() {
        let bindings = WrapperBindingRegistry::new();
        let first = bindings.binding_for("emulator-5554");
        let second = bindings.binding_for("emulator-5554");
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_serials_get_distinct_bindings() {
        let bindings = WrapperBindingRegistry::new();
        let a = bindings.binding_for("A");
        let b = bindings.binding_for("B");
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_round_trip() {
        let bindings = WrapperBindingRegistry::new();
        let binding = bindings.binding_for("R58M123ABC");
        assert_eq!(bindings.resolve(&binding).unwrap(), "R58M123ABC");
    }

    #[test]
    fn test_retired_identifier_never_resolves() {
        let bindings = WrapperBindingRegistry::new();
        let old = bindings.binding_for("A");
        assert_eq!(bindings.unbind("A").unwrap(), old);

        let err = bindings.resolve(&old).unwrap_err();
        assert!(matches!(err, Error::BindingNotFound { .. }));

        // Re-wrapping allocates a fresh identifier, never the retired one
        let fresh = bindings.binding_for("A");
        assert_ne!(fresh, old);
        assert_eq!(bindings.resolve(&fresh).unwrap(), "A");
    }

    #[test]
    fn test_unbind_unknown_serial() {
        let bindings = WrapperBindingRegistry::new();
        assert!(bindings.unbind("ghost").is_none());
    }

    #[test]
    fn test_is_bound() {
        let bindings = WrapperBindingRegistry::new();
        assert!(!bindings.is_bound("A"));
        bindings.binding_for("A");
        assert!(bindings.is_bound("A"));
        bindings.unbind("A");
        assert!(!bindings.is_bound("A"));
    }

    #[test]
    fn test_active_bindings_lists_live_only() {
        let bindings = WrapperBindingRegistry::new();
        let a = bindings.binding_for("A");
        let b = bindings.binding_for("B");
        bindings.unbind("A");

        let active = bindings.active_bindings();
        assert_eq!(active.len(), 1);
        assert!(!active.contains(&a));
        assert!(active.contains(&b));
    }

    #[test]
    fn test_identifier_sanitizes_serial() {
        let binding = allocate_identifier("10.0.0.2:5555");
        assert!(binding.starts_with("device_10_0_0_2_5555_"));
        assert!(!binding.contains(':'));
    }
}

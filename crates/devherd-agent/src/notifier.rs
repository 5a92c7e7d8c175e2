//! Server event push
//!
//! Consumes the registry's ordered change stream, keeps wrapper bindings in
//! step with device presence, and pushes `deviceListChanged` events to the
//! registered server endpoint. Delivery is best-effort: one retry, then the
//! event is dropped -- the server reconciles with a full fleet query when
//! it reconnects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;

use devherd_core::prelude::*;
use devherd_core::{DeviceChange, DeviceListChanged};

use crate::bindings::WrapperBindingRegistry;

/// The server callback endpoint an agent pushes events to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The single active server registration, last-writer-wins
#[derive(Debug, Default)]
pub struct ServerRegistration {
    endpoint: Mutex<Option<ServerEndpoint>>,
}

impl ServerRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server endpoint, replacing any previous registration
    pub fn register(&self, ip: impl Into<String>, port: u16) {
        let endpoint = ServerEndpoint::new(ip, port);
        info!("Server registered at {}", endpoint);
        *self
            .endpoint
            .lock()
            .expect("server registration lock poisoned") = Some(endpoint);
    }

    pub fn current(&self) -> Option<ServerEndpoint> {
        self.endpoint
            .lock()
            .expect("server registration lock poisoned")
            .clone()
    }

    pub fn is_registered(&self) -> bool {
        self.current().is_some()
    }
}

/// The abstract remote bus from this agent to the server
#[trait_variant::make(ServerLink: Send)]
pub trait LocalServerLink {
    /// Push a fleet change to the server's event receiver
    async fn device_list_changed(
        &self,
        endpoint: &ServerEndpoint,
        event: &DeviceListChanged,
    ) -> Result<()>;

    /// Ask the server to connect back to this agent's port
    async fn post_connection_request(&self, endpoint: &ServerEndpoint, port: u16) -> Result<()>;
}

/// Pushes device-list changes to the registered server
pub struct EventNotifier<S> {
    agent_id: String,
    link: S,
    registration: Arc<ServerRegistration>,
    bindings: Arc<WrapperBindingRegistry>,
    pings: AtomicU64,
}

impl<S> EventNotifier<S>
where
    S: ServerLink + Send + Sync,
{
    pub fn new(
        agent_id: impl Into<String>,
        link: S,
        registration: Arc<ServerRegistration>,
        bindings: Arc<WrapperBindingRegistry>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            link,
            registration,
            bindings,
            pings: AtomicU64::new(0),
        }
    }

    /// Answer a liveness ping
    ///
    /// Synchronous and independent of fleet state: a ping must succeed even
    /// while the registry is churning.
    pub fn ping(&self) -> u64 {
        self.pings.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The underlying server link
    pub fn link(&self) -> &S {
        &self.link
    }

    /// Post the connection bootstrap request to a well-known server receiver
    pub async fn post_connection_request(
        &self,
        endpoint: &ServerEndpoint,
        port: u16,
    ) -> Result<()> {
        info!("Posting connection request to {} for port {}", endpoint, port);
        self.link.post_connection_request(endpoint, port).await
    }

    /// Consume registry changes until the registry is dropped
    pub async fn run(self: Arc<Self>, mut changes: UnboundedReceiver<DeviceChange>) {
        while let Some(change) = changes.recv().await {
            self.handle_change(change).await;
        }
        debug!("Device change stream closed, notifier stopping");
    }

    async fn handle_change(&self, change: DeviceChange) {
        let binding = match &change {
            DeviceChange::Up(info) => self.bindings.binding_for(&info.serial),
            DeviceChange::Down { serial, .. } => match self.bindings.unbind(serial) {
                Some(binding) => binding,
                None => {
                    debug!("Device {} was never bound, nothing to report", serial);
                    return;
                }
            },
        };

        let event = DeviceListChanged {
            agent_id: self.agent_id.clone(),
            binding_id: binding,
            available: change.available(),
        };

        let Some(endpoint) = self.registration.current() else {
            debug!(
                "No server registered, dropping change for {}",
                change.serial()
            );
            return;
        };

        // One retry, then drop. The server reconciles on reconnect.
        for attempt in 1..=2 {
            match self.link.device_list_changed(&endpoint, &event).await {
                Ok(()) => return,
                Err(e) if attempt == 1 => {
                    warn!(
                        "Event push to {} failed (attempt {}): {}",
                        endpoint, attempt, e
                    );
                }
                Err(e) => {
                    warn!(
                        "Event push to {} failed twice, dropping change for {}: {}",
                        endpoint,
                        change.serial(),
                        e
                    );
                }
            }
        }
    }
}

/// Stand-in link that records events in the agent log
///
/// The production transport implements [`ServerLink`] outside this crate;
/// this one keeps the daemon runnable without a server.
#[derive(Debug, Default)]
pub struct LoggingServerLink;

impl ServerLink for LoggingServerLink {
    async fn device_list_changed(
        &self,
        endpoint: &ServerEndpoint,
        event: &DeviceListChanged,
    ) -> Result<()> {
        info!(
            "deviceListChanged -> {}: {} {}",
            endpoint,
            event.binding_id,
            if event.available { "up" } else { "down" }
        );
        Ok(())
    }

    async fn post_connection_request(&self, endpoint: &ServerEndpoint, port: u16) -> Result<()> {
        info!("postConnectionRequest -> {}: port {}", endpoint, port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::test_utils::{test_device, RecordingLink};
    use std::time::Duration;

    struct Fixture {
        registry: Arc<DeviceRegistry>,
        bindings: Arc<WrapperBindingRegistry>,
        registration: Arc<ServerRegistration>,
        notifier: Arc<EventNotifier<RecordingLink>>,
    }

    fn start_notifier(link: RecordingLink, registered: bool) -> Fixture {
        let (registry, rx) = DeviceRegistry::new();
        let registry = Arc::new(registry);
        let bindings = Arc::new(WrapperBindingRegistry::new());
        let registration = Arc::new(ServerRegistration::new());
        if registered {
            registration.register("10.0.0.7", 1980);
        }

        let notifier = Arc::new(EventNotifier::new(
            "agent-01",
            link,
            registration.clone(),
            bindings.clone(),
        ));
        tokio::spawn(notifier.clone().run(rx));

        Fixture {
            registry,
            bindings,
            registration,
            notifier,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_upsert_pushes_available_event() {
        let fx = start_notifier(RecordingLink::default(), true);

        fx.registry.upsert(test_device("emulator-5554", true));
        settle().await;

        let delivered = fx.notifier.link.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].agent_id, "agent-01");
        assert!(delivered[0].available);
        assert_eq!(
            fx.bindings.resolve(&delivered[0].binding_id).unwrap(),
            "emulator-5554"
        );
    }

    #[tokio::test]
    async fn test_remove_retires_binding_and_pushes_down_event() {
        let fx = start_notifier(RecordingLink::default(), true);

        fx.registry.upsert(test_device("A", false));
        fx.registry.remove("A");
        settle().await;

        let delivered = fx.notifier.link.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].available);
        assert!(!delivered[1].available);
        // Same binding reported up and down, then retired
        assert_eq!(delivered[0].binding_id, delivered[1].binding_id);
        assert!(!fx.bindings.is_bound("A"));
        assert!(fx.bindings.resolve(&delivered[1].binding_id).is_err());
    }

    #[tokio::test]
    async fn test_single_retry_then_delivered() {
        let fx = start_notifier(RecordingLink::failing(vec![true]), true);

        fx.registry.upsert(test_device("A", false));
        settle().await;

        assert_eq!(fx.notifier.link.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(fx.notifier.link.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_after_two_failures() {
        let fx = start_notifier(RecordingLink::failing(vec![true, true]), true);

        fx.registry.upsert(test_device("A", false));
        settle().await;

        // Exactly one retry, never a queue
        assert_eq!(fx.notifier.link.attempts.load(Ordering::SeqCst), 2);
        assert!(fx.notifier.link.delivered.lock().unwrap().is_empty());

        // The next change is pushed independently of the dropped one
        fx.registry.upsert(test_device("B", false));
        settle().await;
        assert_eq!(fx.notifier.link.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_server_drops_events() {
        let fx = start_notifier(RecordingLink::default(), false);

        fx.registry.upsert(test_device("A", false));
        settle().await;

        assert_eq!(fx.notifier.link.attempts.load(Ordering::SeqCst), 0);
        // The binding is still allocated so a later fleet query sees it
        assert!(fx.bindings.is_bound("A"));
    }

    #[tokio::test]
    async fn test_registration_is_last_writer_wins() {
        let registration = ServerRegistration::new();
        assert!(!registration.is_registered());

        registration.register("10.0.0.1", 1980);
        registration.register("10.0.0.2", 1981);

        let current = registration.current().unwrap();
        assert_eq!(current.ip, "10.0.0.2");
        assert_eq!(current.port, 1981);
    }

    #[tokio::test]
    async fn test_ping_is_synchronous_counter() {
        let fx = start_notifier(RecordingLink::default(), false);

        // Answered with or without a registration
        assert_eq!(fx.notifier.ping(), 1);
        fx.registration.register("10.0.0.9", 1980);
        assert_eq!(fx.notifier.ping(), 2);
    }
}

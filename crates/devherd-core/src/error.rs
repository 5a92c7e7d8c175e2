//! Agent error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Agent error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    // ─────────────────────────────────────────────────────────────
    // Fleet/Registry Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No device matching {serial} is present on this agent")]
    DeviceNotFound { serial: String },

    #[error("No emulator with AVD name {name} is present on this agent")]
    EmulatorNotFound { name: String },

    #[error("No device wrapper is published under {binding}")]
    BindingNotFound { binding: String },

    // ─────────────────────────────────────────────────────────────
    // Bounded-Wait Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Timeout of {timeout_ms} ms reached while waiting for {what}")]
    TimeoutReached { what: String, timeout_ms: u64 },

    #[error("Emulator {name} did not boot within {timeout_ms} ms")]
    DeviceBootTimeout { name: String, timeout_ms: u64 },

    // ─────────────────────────────────────────────────────────────
    // Device Operation Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Operation not possible for device {serial}: {message}")]
    NotPossibleForDevice { serial: String, message: String },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Routing action {action} is not supported by this wrapper")]
    UnsupportedAction { action: String },

    // ─────────────────────────────────────────────────────────────
    // Provisioning/Bridge Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Emulator provisioning failed: {message}")]
    ProvisioningFailed { message: String },

    #[error("Device bridge failure: {message}")]
    AdbBridgeFailed { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn device_not_found(serial: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            serial: serial.into(),
        }
    }

    pub fn emulator_not_found(name: impl Into<String>) -> Self {
        Self::EmulatorNotFound { name: name.into() }
    }

    pub fn binding_not_found(binding: impl Into<String>) -> Self {
        Self::BindingNotFound {
            binding: binding.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, timeout_ms: u64) -> Self {
        Self::TimeoutReached {
            what: what.into(),
            timeout_ms,
        }
    }

    pub fn boot_timeout(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self::DeviceBootTimeout {
            name: name.into(),
            timeout_ms,
        }
    }

    pub fn not_possible(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotPossibleForDevice {
            serial: serial.into(),
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    pub fn unsupported_action(action: impl Into<String>) -> Self {
        Self::UnsupportedAction {
            action: action.into(),
        }
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            message: message.into(),
        }
    }

    pub fn bridge(message: impl Into<String>) -> Self {
        Self::AdbBridgeFailed {
            message: message.into(),
        }
    }

    /// Check if the caller can meaningfully retry after this error
    ///
    /// Bounded-wait expiries and failed device commands are retryable by
    /// the Server; identifier lookups that missed may succeed later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TimeoutReached { .. }
                | Error::DeviceBootTimeout { .. }
                | Error::CommandFailed { .. }
                | Error::DeviceNotFound { .. }
                | Error::EmulatorNotFound { .. }
                | Error::AdbBridgeFailed { .. }
        )
    }

    /// Check if this error should take the whole agent down
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::ChannelSend { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

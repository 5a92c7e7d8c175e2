//! # devherd-core - Core Domain Types
//!
//! Foundation crate for Device Herd. Provides the fleet domain types, error
//! taxonomy, event definitions, and logging setup shared by the agent and
//! the binary.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceInfo`] - Snapshot of a device visible on the agent
//! - [`EmulatorParameters`] - Requested emulator provisioning spec
//! - [`SystemSpecification`] - Point-in-time host hardware sample
//! - [`BatteryState`] - Battery charging state reported by a device
//!
//! ### Events (`events`)
//! - [`DeviceChange`] - Ordered registry mutation record
//! - [`DeviceListChanged`] - Agent-to-server fleet change push
//! - [`AgentEvent`] - Wrapper enum for agent-to-server events
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error taxonomy with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use devherd_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{AgentEvent, DeviceChange, DeviceListChanged};
pub use types::{
    BatteryState, DeviceInfo, EmulatorParameters, ScreenResolution, SystemSpecification,
};

//! Per-device APK transfer session
//!
//! Multi-step installs (`init → append* → build-and-install`) are modeled
//! as an explicit state machine so a misordered step fails fast instead of
//! producing a corrupt install:
//!
//! `Idle → Collecting → Installing → Idle`, with `discard` valid from any
//! state and always returning to `Idle`.

use devherd_core::prelude::*;

/// Phase of an APK transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    #[default]
    Idle,
    Collecting,
    Installing,
}

/// Collects APK fragments for one device until they are built and installed
#[derive(Debug, Default)]
pub struct ApkTransferSession {
    phase: TransferPhase,
    buffer: Vec<u8>,
}

impl ApkTransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Bytes collected so far
    pub fn collected(&self) -> usize {
        self.buffer.len()
    }

    /// Begin a new transfer
    pub fn init(&mut self) -> Result<()> {
        if self.phase != TransferPhase::Idle {
            return Err(Error::command_failed(
                "an APK transfer is already in progress",
            ));
        }
        self.buffer.clear();
        self.phase = TransferPhase::Collecting;
        Ok(())
    }

    /// Append a fragment to the transfer in progress
    pub fn append(&mut self, fragment: &[u8]) -> Result<()> {
        if self.phase != TransferPhase::Collecting {
            return Err(Error::command_failed(
                "no APK transfer in progress to append to",
            ));
        }
        self.buffer.extend_from_slice(fragment);
        Ok(())
    }

    /// Take the collected bytes for installation
    ///
    /// The session stays in `Installing` until `finish` or `discard`.
    pub fn begin_install(&mut self) -> Result<Vec<u8>> {
        if self.phase != TransferPhase::Collecting {
            return Err(Error::command_failed(
                "no collected APK to build and install",
            ));
        }
        self.phase = TransferPhase::Installing;
        Ok(std::mem::take(&mut self.buffer))
    }

    /// Mark the install finished and return to idle
    pub fn finish(&mut self) {
        self.phase = TransferPhase::Idle;
        self.buffer.clear();
    }

    /// Abandon the transfer; valid in every phase
    pub fn discard(&mut self) {
        self.phase = TransferPhase::Idle;
        self.buffer.clear();
    }
}

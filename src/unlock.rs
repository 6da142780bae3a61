//! Passphrase-gated volume unlock
//!
//! Two interchangeable strategies behind [`UnlockStrategy`]:
//!
//! - [`HelperUnlock`]: the privilege-separated path. An external helper
//!   binary is spawned with fixed arguments naming the data device, header
//!   device, and mapping name; the passphrase travels as raw bytes over an
//!   anonymous pipe to the helper's stdin and nowhere else.
//! - [`CryptsetupUnlock`]: drives `cryptsetup open` directly with the
//!   passphrase on stdin (`--key-file -`), for environments that ship
//!   cryptsetup instead of the helper.
//!
//! # Security Model
//!
//! Passphrase bytes are never written to disk, never logged, and never
//! passed via argv or the environment (both visible in `ps`/`/proc`). The
//! [`Passphrase`] wrapper enforces a length bound before any process is
//! spawned, redacts itself from `Debug` output, and zeroes its buffer when
//! dropped.
//!
//! # Exit-code contract
//!
//! `0` = unlocked, `2` = wrong passphrase, anything else (other codes,
//! signal death, spawn/pipe/write failure) is a helper error. Helper
//! errors fail closed and are never counted as a wrong passphrase.

use crate::devices::DeviceLayout;
use crate::error::{RecoveryError, Result};
use crate::runner::{ExitDisposition, PipedCommand};
use std::path::PathBuf;

/// Privilege-separated unlock helper shipped in the recovery ramdisk.
pub const HELPER_BIN: &str = "/usr/libexec/droidian-encryption-helper";

/// Passphrases at or above this length are rejected before spawning.
pub const PASSPHRASE_MAX: usize = 256;

/// Exit code the helper and cryptsetup use for a rejected passphrase.
const EXIT_WRONG_PASSPHRASE: i32 = 2;

/// Outcome of a single unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Mapping activated; the decrypted mapper node now exists.
    Unlocked,
    /// The helper rejected the passphrase. Counts against the lockout.
    WrongPassphrase,
    /// Infrastructure failure: spawn/pipe error, unexpected exit code, or
    /// signal death. Never counted as a wrong passphrase.
    HelperError,
}

/// A bounded, sensitive passphrase.
///
/// Holds the raw bytes exactly as submitted (no trailing newline is added;
/// the helper is invoked with its newline-strip flag so interactive input
/// works either way). The buffer is zeroed on drop.
pub struct Passphrase {
    bytes: Vec<u8>,
}

impl Passphrase {
    /// Wrap passphrase bytes, rejecting input at or above [`PASSPHRASE_MAX`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() >= PASSPHRASE_MAX {
            return Err(RecoveryError::validation(format!(
                "passphrase too long ({} bytes, limit {})",
                bytes.len(),
                PASSPHRASE_MAX
            )));
        }
        Ok(Self { bytes })
    }

    /// Raw bytes for transmission to the helper's stdin.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        // Best-effort wipe. volatile writes keep the loop from being
        // optimized out.
        for b in self.bytes.iter_mut() {
            unsafe { std::ptr::write_volatile(b, 0) };
        }
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase").field("len", &self.bytes.len()).finish()
    }
}

/// A way of activating the decrypted mapping from a passphrase.
pub trait UnlockStrategy {
    /// Attempt to unlock. Infrastructure failures are folded into
    /// [`UnlockOutcome::HelperError`]; this never errors out so the caller
    /// always gets a classification.
    fn unlock(&self, passphrase: &Passphrase) -> UnlockOutcome;
}

fn classify(result: Result<ExitDisposition>) -> UnlockOutcome {
    match result {
        Ok(ExitDisposition::Exited(0)) => UnlockOutcome::Unlocked,
        Ok(ExitDisposition::Exited(EXIT_WRONG_PASSPHRASE)) => UnlockOutcome::WrongPassphrase,
        Ok(ExitDisposition::Exited(code)) => {
            log::error!("unlock process exited with unexpected code {}", code);
            UnlockOutcome::HelperError
        }
        Ok(ExitDisposition::Signaled(sig)) => {
            log::error!("unlock process killed by signal {}", sig);
            UnlockOutcome::HelperError
        }
        Err(e) => {
            log::error!("unlock process failed: {}", e);
            UnlockOutcome::HelperError
        }
    }
}

/// Privilege-separated unlock via the encryption helper binary.
pub struct HelperUnlock {
    helper: PathBuf,
    layout: DeviceLayout,
}

impl HelperUnlock {
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            helper: PathBuf::from(HELPER_BIN),
            layout,
        }
    }

    /// Override the helper binary path (tests substitute a stub script).
    pub fn with_helper(helper: impl Into<PathBuf>, layout: DeviceLayout) -> Self {
        Self {
            helper: helper.into(),
            layout,
        }
    }

    fn command(&self) -> PipedCommand {
        PipedCommand::new(&self.helper)
            .arg("--device")
            .arg(self.layout.data_device.display().to_string())
            .arg("--header")
            .arg(self.layout.header_device.display().to_string())
            .arg("--name")
            .arg(self.layout.mapping_name.clone())
            .arg("--strip-newline")
    }
}

impl UnlockStrategy for HelperUnlock {
    fn unlock(&self, passphrase: &Passphrase) -> UnlockOutcome {
        let outcome = classify(self.command().run_with_stdin(passphrase.as_bytes()));
        log::info!("helper unlock attempt finished: {:?}", outcome);
        outcome
    }
}

/// Direct unlock through the `cryptsetup` binary, key bytes on stdin.
pub struct CryptsetupUnlock {
    binary: PathBuf,
    layout: DeviceLayout,
}

impl CryptsetupUnlock {
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            binary: PathBuf::from("cryptsetup"),
            layout,
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>, layout: DeviceLayout) -> Self {
        Self {
            binary: binary.into(),
            layout,
        }
    }

    fn command(&self) -> PipedCommand {
        PipedCommand::new(&self.binary)
            .arg("open")
            .arg("--type")
            .arg("luks")
            .arg("--header")
            .arg(self.layout.header_device.display().to_string())
            .arg("--key-file")
            .arg("-")
            .arg(self.layout.data_device.display().to_string())
            .arg(self.layout.mapping_name.clone())
    }
}

impl UnlockStrategy for CryptsetupUnlock {
    fn unlock(&self, passphrase: &Passphrase) -> UnlockOutcome {
        let outcome = classify(self.command().run_with_stdin(passphrase.as_bytes()));
        log::info!("cryptsetup unlock attempt finished: {:?}", outcome);
        outcome
    }
}

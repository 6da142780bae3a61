//! FuriOS recovery library
//!
//! Credential-gated storage-unlock and factory-reset pipeline: probe the
//! data volume for LUKS encryption, unlock it through a privilege-separated
//! helper under an attempt-lockout policy, mount the active dynamic system
//! partition, and reflash the userdata partition from the archive it
//! carries.

pub mod attempts;
pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod install;
pub mod orchestrator;
pub mod partitions;
pub mod power;
pub mod probe;
pub mod process_guard;
pub mod runner;
pub mod unlock;

// Re-export main types for convenience
pub use attempts::{AttemptCounter, ATTEMPT_LIMIT};
pub use config::RecoveryConfig;
pub use devices::DeviceLayout;
pub use error::{RecoveryError, Result};
pub use install::{ImageInstaller, InstallError, ARCHIVE_CANDIDATES, IMAGE_CANDIDATES};
pub use orchestrator::{RecoveryEvent, RecoveryOrchestrator, RecoveryState, ResetOutcome};
pub use partitions::{MountError, MountOps, PartitionResolver, PartitionSet, Slot, SysMount};
pub use power::{PowerMonitor, PowerStatus};
pub use probe::{probe, DeviceClass, DeviceState, DEFAULT_HEADER_READ, LUKS_MAGIC};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use runner::{ExitDisposition, PipedCommand};
pub use unlock::{
    CryptsetupUnlock, HelperUnlock, Passphrase, UnlockOutcome, UnlockStrategy, PASSPHRASE_MAX,
};

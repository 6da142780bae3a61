//! Dynamic-partition discovery and system mount
//!
//! Resolves the active system slot (A/B) from the Android super device,
//! materializing the dynamic-partition mappers if neither slot exists yet,
//! and mounts the active slot read-only for the installer.
//!
//! The mount is owned by a [`MountGuard`] inside the returned
//! [`PartitionSet`]: whatever happens later in the pipeline, the partition
//! is unmounted by the same code path that mounted it. Mount syscalls go
//! through the [`MountOps`] trait so tests run against a fake.

use crate::devices::DeviceLayout;
use crate::runner::PipedCommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Tool that prints a dmsetup concise table for the super device.
const DYNPARTS_TOOL: &str = "parse-android-dynparts";

/// Resolution failure. Carries enough detail for the log, but the UI only
/// ever sees the `MountFailed` classification.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("no system slot could be mounted: {0}")]
    MountFailed(String),
}

/// Which system slot ended up mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::A => write!(f, "system_a"),
            Slot::B => write!(f, "system_b"),
        }
    }
}

/// Mount and unmount primitives. Production uses [`SysMount`]; tests
/// substitute a recording fake.
pub trait MountOps: Send + Sync {
    /// Mount `source` at `target` as read-only ext4.
    fn mount_ext4(&self, source: &Path, target: &Path) -> std::io::Result<()>;
    /// Unmount `target`.
    fn unmount(&self, target: &Path) -> std::io::Result<()>;
}

/// Real mount(2)/umount(2) via nix.
pub struct SysMount;

impl MountOps for SysMount {
    fn mount_ext4(&self, source: &Path, target: &Path) -> std::io::Result<()> {
        nix::mount::mount(
            Some(source),
            target,
            Some("ext4"),
            nix::mount::MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(std::io::Error::from)
    }

    fn unmount(&self, target: &Path) -> std::io::Result<()> {
        nix::mount::umount(target).map_err(std::io::Error::from)
    }
}

/// RAII handle for an active mount. Unmounts on drop unless already
/// released explicitly.
pub struct MountGuard {
    ops: Arc<dyn MountOps>,
    target: PathBuf,
    armed: bool,
}

impl MountGuard {
    fn new(ops: Arc<dyn MountOps>, target: PathBuf) -> Self {
        Self {
            ops,
            target,
            armed: true,
        }
    }

    /// Unmount now and disarm the guard.
    pub fn unmount(&mut self) -> std::io::Result<()> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        log::info!("unmounting {}", self.target.display());
        self.ops.unmount(&self.target)
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.unmount() {
                log::error!("failed to unmount {}: {}", self.target.display(), e);
            }
        }
    }
}

/// The resolved and mounted system partition.
pub struct PartitionSet {
    /// Slot that was successfully mounted.
    pub active_slot: Slot,
    /// Where it is mounted.
    pub mountpoint: PathBuf,
    guard: MountGuard,
}

impl std::fmt::Debug for PartitionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionSet")
            .field("active_slot", &self.active_slot)
            .field("mountpoint", &self.mountpoint)
            .finish_non_exhaustive()
    }
}

impl PartitionSet {
    /// Unmount the system partition. Called on every pipeline exit path;
    /// dropping the set without calling this unmounts too.
    pub fn unmount(mut self) -> std::io::Result<()> {
        self.guard.unmount()
    }
}

/// Discovers slot mappers and mounts the active system partition.
pub struct PartitionResolver {
    layout: DeviceLayout,
    ops: Arc<dyn MountOps>,
    dynparts_tool: PathBuf,
}

impl PartitionResolver {
    pub fn new(layout: DeviceLayout) -> Self {
        Self::with_ops(layout, Arc::new(SysMount))
    }

    pub fn with_ops(layout: DeviceLayout, ops: Arc<dyn MountOps>) -> Self {
        Self {
            layout,
            ops,
            dynparts_tool: PathBuf::from(DYNPARTS_TOOL),
        }
    }

    /// Resolve slot mappers and mount the active one.
    ///
    /// Steps:
    /// 1. If the super device exists and neither slot mapper does, run the
    ///    one-time materialization (idempotent repair; skipped whenever a
    ///    slot is already present).
    /// 2. Create the mountpoint if absent.
    /// 3. Mount slot A; on failure try slot B. If neither device exists or
    ///    both mounts fail, report `MountFailed` with no partial mount left
    ///    behind.
    pub fn resolve_and_mount(&self) -> Result<PartitionSet, MountError> {
        if self.layout.super_device.exists()
            && !self.layout.slot_a_device.exists()
            && !self.layout.slot_b_device.exists()
        {
            self.materialize_dynparts();
        }

        if let Err(e) = std::fs::create_dir_all(&self.layout.mountpoint) {
            // create_dir_all already tolerates "exists"; anything else is a
            // real failure.
            return Err(MountError::MountFailed(format!(
                "cannot create mountpoint {}: {}",
                self.layout.mountpoint.display(),
                e
            )));
        }

        let candidates = [
            (Slot::A, &self.layout.slot_a_device),
            (Slot::B, &self.layout.slot_b_device),
        ];

        let mut last_error = String::from("no slot mapper device exists");
        for (slot, device) in candidates {
            if !device.exists() {
                continue;
            }
            match self.ops.mount_ext4(device, &self.layout.mountpoint) {
                Ok(()) => {
                    log::info!(
                        "mounted {} ({}) at {}",
                        device.display(),
                        slot,
                        self.layout.mountpoint.display()
                    );
                    return Ok(PartitionSet {
                        active_slot: slot,
                        mountpoint: self.layout.mountpoint.clone(),
                        guard: MountGuard::new(self.ops.clone(), self.layout.mountpoint.clone()),
                    });
                }
                Err(e) => {
                    log::warn!("failed to mount {} ({}): {}", device.display(), slot, e);
                    last_error = format!("{}: {}", device.display(), e);
                }
            }
        }

        Err(MountError::MountFailed(last_error))
    }

    /// Materialize the dynamic-partition mappers from the super device:
    /// `parse-android-dynparts <super>` prints a concise table which is
    /// handed to `dmsetup create --concise` as a single structured
    /// argument. No shell is involved.
    ///
    /// Failures are logged and swallowed; the slot existence checks in
    /// `resolve_and_mount` decide whether the pipeline can continue.
    fn materialize_dynparts(&self) {
        log::info!(
            "no slot mappers found, materializing from {}",
            self.layout.super_device.display()
        );

        let table = match PipedCommand::new(&self.dynparts_tool)
            .arg(self.layout.super_device.display().to_string())
            .run_capture()
        {
            Ok(out) if out.disposition.success() => out.stdout.trim().to_string(),
            Ok(out) => {
                log::error!(
                    "{} failed ({:?}): {}",
                    DYNPARTS_TOOL,
                    out.disposition,
                    out.stderr.trim()
                );
                return;
            }
            Err(e) => {
                log::error!("{} could not run: {}", DYNPARTS_TOOL, e);
                return;
            }
        };

        if table.is_empty() {
            log::error!("{} produced an empty table", DYNPARTS_TOOL);
            return;
        }

        match PipedCommand::new("dmsetup")
            .arg("create")
            .arg("--concise")
            .arg(table)
            .run_capture()
        {
            Ok(out) if out.disposition.success() => {
                log::info!("dynamic partition mappers created");
            }
            Ok(out) => log::error!(
                "dmsetup create failed ({:?}): {}",
                out.disposition,
                out.stderr.trim()
            ),
            Err(e) => log::error!("dmsetup could not run: {}", e),
        }
    }
}

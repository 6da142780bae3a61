//! Recovery state machine
//!
//! Sequences probe → unlock → partition mount → image install and reports
//! every outcome to the UI callback. This is the single place that
//! translates component results into state transitions; components
//! themselves only return classified results.
//!
//! # State flow
//!
//! ```text
//! Init
//!   ↓ start()
//! Probing
//!   ├─ ProbeError ──────────────→ Failed(ProbeFailed)
//!   ├─ Unencrypted / AlreadyUnlocked ─→ Installing
//!   └─ Encrypted ──────────────→ AwaitingPassphrase
//!
//! AwaitingPassphrase + submit_passphrase()
//!   ├─ Unlocked ───────────────→ Installing
//!   ├─ WrongPassphrase ────────→ AwaitingPassphrase or LockedOut
//!   └─ HelperError ────────────→ Failed(UnlockFailed)   (not counted)
//!
//! Installing ──→ Done, or Failed(MountFailed | ArchiveNotFound |
//!                                ExtractFailed | WriteFailed)
//! ```
//!
//! `Done`, `Failed`, and `LockedOut` are terminal for this invocation. The
//! surrounding application decides whether to reboot afterwards.
//!
//! Everything here runs on one cooperative loop; mount, extraction, raw
//! write, and the helper wait are blocking calls. The device is otherwise
//! idle during recovery, so simplicity wins over responsiveness.

use crate::attempts::AttemptCounter;
use crate::devices::DeviceLayout;
use crate::error::{RecoveryError, Result};
use crate::install::{ImageInstaller, InstallError};
use crate::partitions::PartitionResolver;
use crate::probe::{self, DeviceClass, DEFAULT_HEADER_READ};
use crate::unlock::{HelperUnlock, Passphrase, UnlockOutcome, UnlockStrategy};

/// Terminal classification reported to the UI collaborator. Never retried
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Success,
    ProbeFailed,
    UnlockFailed,
    MountFailed,
    ArchiveNotFound,
    ExtractFailed,
    WriteFailed,
    LockedOut,
}

impl std::fmt::Display for ResetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "successfully reset to factory settings",
            Self::ProbeFailed => "could not determine encryption state",
            Self::UnlockFailed => "unlock helper failed",
            Self::MountFailed => "could not mount the system partition",
            Self::ArchiveNotFound => "userdata archive not found",
            Self::ExtractFailed => "could not extract the userdata archive",
            Self::WriteFailed => "could not write the userdata image",
            Self::LockedOut => "maximum passphrase attempts reached",
        };
        write!(f, "{}", s)
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Nothing started yet.
    Init,
    /// Probe in progress.
    Probing,
    /// Waiting for the UI to submit a passphrase. The only state that
    /// suspends for external input.
    AwaitingPassphrase,
    /// Partition resolution and image installation in progress.
    Installing,
    /// Terminal: reset completed.
    Done,
    /// Terminal: reset failed with the recorded classification.
    Failed(ResetOutcome),
    /// Terminal: attempt limit reached; no further attempts accepted.
    LockedOut,
}

impl RecoveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::LockedOut)
    }
}

/// Events delivered to the UI callback as the pipeline progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// Probe finished with this classification.
    DeviceProbed(DeviceClass),
    /// A credential prompt should be shown. Carries attempts used vs limit
    /// so the UI can display remaining tries.
    PassphraseRequired { attempts_used: u32, attempts_limit: u32 },
    /// A submitted passphrase was rejected.
    WrongPassphrase { attempts_used: u32, attempts_limit: u32 },
    /// The volume was unlocked.
    Unlocked,
    /// Partition mount and install started.
    InstallStarted,
    /// Terminal result of this invocation.
    Finished(ResetOutcome),
}

type Reporter = Box<dyn FnMut(&RecoveryEvent)>;

/// Top-level factory-reset driver.
///
/// Owns the attempt counter, the probed classification, and the system
/// mount exclusively; all mutation happens from the caller's single
/// execution context, so no locking is needed.
pub struct RecoveryOrchestrator {
    layout: DeviceLayout,
    header_read: usize,
    unlock: Box<dyn UnlockStrategy>,
    resolver: PartitionResolver,
    installer: ImageInstaller,
    attempts: AttemptCounter,
    state: RecoveryState,
    report: Reporter,
}

impl RecoveryOrchestrator {
    /// Production wiring: helper-based unlock, real mount(2), real tar.
    pub fn new(layout: DeviceLayout) -> Self {
        let unlock = Box::new(HelperUnlock::new(layout.clone()));
        let resolver = PartitionResolver::new(layout.clone());
        let installer = ImageInstaller::new(layout.clone());
        Self::with_components(layout, unlock, resolver, installer)
    }

    /// Explicit wiring for tests and alternative unlock strategies.
    pub fn with_components(
        layout: DeviceLayout,
        unlock: Box<dyn UnlockStrategy>,
        resolver: PartitionResolver,
        installer: ImageInstaller,
    ) -> Self {
        Self {
            layout,
            header_read: DEFAULT_HEADER_READ,
            unlock,
            resolver,
            installer,
            attempts: AttemptCounter::default(),
            state: RecoveryState::Init,
            report: Box::new(|_| {}),
        }
    }

    /// Install the UI callback invoked with the outcome of each operation.
    pub fn set_reporter(&mut self, report: impl FnMut(&RecoveryEvent) + 'static) {
        self.report = Box::new(report);
    }

    /// Override how many header bytes the probe reads.
    pub fn set_header_read(&mut self, bytes: usize) {
        self.header_read = bytes;
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Attempts used and the lockout limit, for the credential prompt.
    pub fn attempts(&self) -> (u32, u32) {
        (self.attempts.count(), self.attempts.limit())
    }

    /// Begin the reset: probe the device and either proceed straight to
    /// installation or suspend awaiting a passphrase.
    ///
    /// Valid only in `Init`.
    pub fn start(&mut self) -> Result<RecoveryState> {
        if self.state != RecoveryState::Init {
            return Err(RecoveryError::state(format!(
                "start() called in {:?}",
                self.state
            )));
        }

        self.state = RecoveryState::Probing;
        let device_state = probe::probe(&self.layout, self.header_read);
        self.emit(RecoveryEvent::DeviceProbed(device_state.classification));

        match device_state.classification {
            DeviceClass::ProbeError => self.fail(ResetOutcome::ProbeFailed),
            c if c.skips_unlock() => self.install(),
            DeviceClass::Encrypted => {
                self.state = RecoveryState::AwaitingPassphrase;
                let (attempts_used, attempts_limit) = self.attempts();
                self.emit(RecoveryEvent::PassphraseRequired {
                    attempts_used,
                    attempts_limit,
                });
            }
            // skips_unlock covered Unencrypted and AlreadyUnlocked above.
            _ => unreachable!("unhandled device classification"),
        }

        Ok(self.state)
    }

    /// Feed a submitted passphrase to the unlock strategy.
    ///
    /// Valid only in `AwaitingPassphrase`. A wrong passphrase consumes one
    /// attempt; a helper error does not (it is an infrastructure failure,
    /// not a credential signal) and terminates the run instead.
    pub fn submit_passphrase(&mut self, passphrase: &Passphrase) -> Result<RecoveryState> {
        if self.state != RecoveryState::AwaitingPassphrase {
            return Err(RecoveryError::state(format!(
                "submit_passphrase() called in {:?}",
                self.state
            )));
        }

        match self.unlock.unlock(passphrase) {
            UnlockOutcome::Unlocked => {
                self.emit(RecoveryEvent::Unlocked);
                self.install();
            }
            UnlockOutcome::WrongPassphrase => {
                self.attempts.record_failure();
                let (attempts_used, attempts_limit) = self.attempts();
                if self.attempts.is_locked_out() {
                    log::warn!("attempt limit reached after {} failures", attempts_used);
                    self.state = RecoveryState::LockedOut;
                    self.emit(RecoveryEvent::Finished(ResetOutcome::LockedOut));
                } else {
                    self.emit(RecoveryEvent::WrongPassphrase {
                        attempts_used,
                        attempts_limit,
                    });
                }
            }
            UnlockOutcome::HelperError => self.fail(ResetOutcome::UnlockFailed),
        }

        Ok(self.state)
    }

    /// Mount the system partition, install the userdata image, and tear
    /// the mount down on every exit path.
    fn install(&mut self) {
        self.state = RecoveryState::Installing;
        self.emit(RecoveryEvent::InstallStarted);

        let set = match self.resolver.resolve_and_mount() {
            Ok(set) => set,
            Err(e) => {
                log::error!("{}", e);
                return self.fail(ResetOutcome::MountFailed);
            }
        };
        log::info!("installing from slot {}", set.active_slot);

        let result = self.installer.install(&set.mountpoint);

        // Unmount unconditionally before reporting the terminal result.
        if let Err(e) = set.unmount() {
            log::warn!("failed to unmount system partition: {}", e);
        }

        match result {
            Ok(()) => {
                self.state = RecoveryState::Done;
                self.emit(RecoveryEvent::Finished(ResetOutcome::Success));
            }
            Err(InstallError::ArchiveNotFound) => self.fail(ResetOutcome::ArchiveNotFound),
            Err(InstallError::ExtractFailed(msg)) => {
                log::error!("extraction failed: {}", msg);
                self.fail(ResetOutcome::ExtractFailed)
            }
            Err(InstallError::WriteFailed(e)) => {
                log::error!("userdata write failed: {}", e);
                self.fail(ResetOutcome::WriteFailed)
            }
        }
    }

    fn fail(&mut self, outcome: ResetOutcome) {
        log::error!("recovery failed: {}", outcome);
        self.state = RecoveryState::Failed(outcome);
        self.emit(RecoveryEvent::Finished(outcome));
    }

    fn emit(&mut self, event: RecoveryEvent) {
        (self.report)(&event);
    }
}

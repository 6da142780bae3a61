//! End-to-end pipeline tests
//!
//! Drive the orchestrator through complete runs against a scratch device
//! layout: fake mount backend, scripted unlock outcomes, and a real tarball
//! for the install path. Only the block devices are simulated; probing,
//! extraction, and the raw copy all do real I/O under a tempdir.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use furios_recovery::install::ImageInstaller;
use furios_recovery::orchestrator::{
    RecoveryEvent, RecoveryOrchestrator, RecoveryState, ResetOutcome,
};
use furios_recovery::partitions::{MountOps, PartitionResolver};
use furios_recovery::probe::{DEFAULT_HEADER_READ, LUKS_MAGIC};
use furios_recovery::unlock::{Passphrase, UnlockOutcome, UnlockStrategy};
use furios_recovery::DeviceLayout;

/// Records mount/unmount calls; mounting is a no-op on the filesystem so
/// the mountpoint directory contents stand in for the mounted partition.
#[derive(Default)]
struct FakeMount {
    mounts: Mutex<Vec<PathBuf>>,
    unmounts: Mutex<Vec<PathBuf>>,
}

impl MountOps for FakeMount {
    fn mount_ext4(&self, source: &Path, _target: &Path) -> std::io::Result<()> {
        self.mounts.lock().unwrap().push(source.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> std::io::Result<()> {
        self.unmounts.lock().unwrap().push(target.to_path_buf());
        Ok(())
    }
}

/// Returns a fixed sequence of unlock outcomes, one per attempt.
struct ScriptedUnlock {
    outcomes: Mutex<Vec<UnlockOutcome>>,
    calls: Mutex<usize>,
}

impl ScriptedUnlock {
    fn new(outcomes: Vec<UnlockOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            calls: Mutex::new(0),
        }
    }
}

impl UnlockStrategy for ScriptedUnlock {
    fn unlock(&self, _passphrase: &Passphrase) -> UnlockOutcome {
        *self.calls.lock().unwrap() += 1;
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            UnlockOutcome::HelperError
        } else {
            outcomes.remove(0)
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: DeviceLayout,
    mount_ops: Arc<FakeMount>,
    events: Arc<Mutex<Vec<RecoveryEvent>>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let root = dir.path();
        let mut layout = DeviceLayout::rooted_at(root);
        layout.extract_dir = root.join("extract");

        std::fs::create_dir_all(layout.slot_a_device.parent().unwrap()).unwrap();
        std::fs::create_dir_all(&layout.mountpoint).unwrap();
        std::fs::create_dir_all(&layout.extract_dir).unwrap();
        std::fs::write(&layout.slot_a_device, b"").unwrap();

        Self {
            _dir: dir,
            layout,
            mount_ops: Arc::new(FakeMount::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn write_header(&self, encrypted: bool) {
        let mut header = vec![0u8; DEFAULT_HEADER_READ];
        if encrypted {
            header[..LUKS_MAGIC.len()].copy_from_slice(&LUKS_MAGIC);
            header[5] = 0xbe;
        }
        std::fs::write(&self.layout.header_device, header).unwrap();
    }

    /// Build a real gzipped tarball containing `userdata-raw.img` and drop
    /// it on the fake system partition.
    fn stage_archive(&self, image_payload: &[u8]) {
        let staging = self.layout.extract_dir.parent().unwrap().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("userdata-raw.img"), image_payload).unwrap();

        let archive = self.layout.mountpoint.join("userdata.img.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&staging)
            .arg("userdata-raw.img")
            .status()
            .expect("tar available");
        assert!(status.success(), "staging tarball failed");
    }

    fn orchestrator(&self, unlock: ScriptedUnlock) -> RecoveryOrchestrator {
        let resolver =
            PartitionResolver::with_ops(self.layout.clone(), self.mount_ops.clone());
        let installer = ImageInstaller::new(self.layout.clone());
        let mut orch = RecoveryOrchestrator::with_components(
            self.layout.clone(),
            Box::new(unlock),
            resolver,
            installer,
        );
        let events = self.events.clone();
        orch.set_reporter(move |e| events.lock().unwrap().push(*e));
        orch
    }

    fn events(&self) -> Vec<RecoveryEvent> {
        self.events.lock().unwrap().clone()
    }

    fn mount_balance(&self) -> (usize, usize) {
        (
            self.mount_ops.mounts.lock().unwrap().len(),
            self.mount_ops.unmounts.lock().unwrap().len(),
        )
    }
}

#[test]
fn test_unencrypted_device_resets_without_passphrase() {
    let fx = Fixture::new();
    fx.write_header(false);
    let payload = vec![0x5au8; 256 * 1024 + 77];
    fx.stage_archive(&payload);

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![]));
    let state = orch.start().expect("start");

    assert_eq!(state, RecoveryState::Done);
    assert_eq!(std::fs::read(&fx.layout.userdata_device).unwrap(), payload);
    assert_eq!(fx.mount_balance(), (1, 1));

    let events = fx.events();
    assert!(events.contains(&RecoveryEvent::InstallStarted));
    assert!(events.contains(&RecoveryEvent::Finished(ResetOutcome::Success)));
    assert!(!events.iter().any(|e| matches!(e, RecoveryEvent::PassphraseRequired { .. })));
}

#[test]
fn test_existing_mapper_skips_unlock() {
    let fx = Fixture::new();
    fx.write_header(true);
    std::fs::write(&fx.layout.decrypted_mapper, b"").unwrap();
    let payload = b"already unlocked".to_vec();
    fx.stage_archive(&payload);

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![]));
    let state = orch.start().expect("start");

    assert_eq!(state, RecoveryState::Done);
    assert_eq!(std::fs::read(&fx.layout.userdata_device).unwrap(), payload);
}

#[test]
fn test_correct_passphrase_after_failures_resets() {
    let fx = Fixture::new();
    fx.write_header(true);
    let payload = vec![1u8; 4096];
    fx.stage_archive(&payload);

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![
        UnlockOutcome::WrongPassphrase,
        UnlockOutcome::WrongPassphrase,
        UnlockOutcome::Unlocked,
    ]));
    let state = orch.start().expect("start");
    assert_eq!(state, RecoveryState::AwaitingPassphrase);

    let pw = Passphrase::new(b"guess".to_vec()).unwrap();
    assert_eq!(
        orch.submit_passphrase(&pw).unwrap(),
        RecoveryState::AwaitingPassphrase
    );
    assert_eq!(
        orch.submit_passphrase(&pw).unwrap(),
        RecoveryState::AwaitingPassphrase
    );
    assert_eq!(orch.submit_passphrase(&pw).unwrap(), RecoveryState::Done);

    assert_eq!(std::fs::read(&fx.layout.userdata_device).unwrap(), payload);
    let events = fx.events();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RecoveryEvent::WrongPassphrase { .. }))
            .count(),
        2
    );
    assert!(events.contains(&RecoveryEvent::Unlocked));
}

#[test]
fn test_three_failures_locks_out_without_mounting() {
    let fx = Fixture::new();
    fx.write_header(true);
    fx.stage_archive(b"never written");

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![
        UnlockOutcome::WrongPassphrase,
        UnlockOutcome::WrongPassphrase,
        UnlockOutcome::WrongPassphrase,
    ]));
    orch.start().expect("start");

    let pw = Passphrase::new(b"wrong".to_vec()).unwrap();
    orch.submit_passphrase(&pw).unwrap();
    orch.submit_passphrase(&pw).unwrap();
    let state = orch.submit_passphrase(&pw).unwrap();

    assert_eq!(state, RecoveryState::LockedOut);
    assert_eq!(fx.mount_balance(), (0, 0));
    assert!(!fx.layout.userdata_device.exists());
    assert!(fx
        .events()
        .contains(&RecoveryEvent::Finished(ResetOutcome::LockedOut)));

    // Locked out is terminal: further submissions are state errors.
    assert!(orch.submit_passphrase(&pw).is_err());
}

#[test]
fn test_helper_error_fails_without_consuming_attempt() {
    let fx = Fixture::new();
    fx.write_header(true);

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![UnlockOutcome::HelperError]));
    orch.start().expect("start");
    assert_eq!(orch.attempts().0, 0);

    let pw = Passphrase::new(b"pw".to_vec()).unwrap();
    let state = orch.submit_passphrase(&pw).unwrap();

    assert_eq!(state, RecoveryState::Failed(ResetOutcome::UnlockFailed));
    assert_eq!(orch.attempts().0, 0);
    assert_eq!(fx.mount_balance(), (0, 0));
}

#[test]
fn test_missing_archive_fails_but_still_unmounts() {
    let fx = Fixture::new();
    fx.write_header(false);
    // No archive staged on the system partition.

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![]));
    let state = orch.start().expect("start");

    assert_eq!(state, RecoveryState::Failed(ResetOutcome::ArchiveNotFound));
    assert_eq!(fx.mount_balance(), (1, 1));
    assert!(fx
        .events()
        .contains(&RecoveryEvent::Finished(ResetOutcome::ArchiveNotFound)));
}

#[test]
fn test_missing_header_device_is_probe_failure() {
    let fx = Fixture::new();
    // Header device never created.

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![]));
    let state = orch.start().expect("start");

    assert_eq!(state, RecoveryState::Failed(ResetOutcome::ProbeFailed));
    assert_eq!(fx.mount_balance(), (0, 0));
}

#[test]
fn test_no_slot_devices_is_mount_failure() {
    let fx = Fixture::new();
    fx.write_header(false);
    std::fs::remove_file(&fx.layout.slot_a_device).unwrap();

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![]));
    let state = orch.start().expect("start");

    assert_eq!(state, RecoveryState::Failed(ResetOutcome::MountFailed));
    assert_eq!(fx.mount_balance(), (0, 0));
}

#[test]
fn test_event_order_for_full_encrypted_run() {
    let fx = Fixture::new();
    fx.write_header(true);
    fx.stage_archive(b"payload");

    let mut orch = fx.orchestrator(ScriptedUnlock::new(vec![UnlockOutcome::Unlocked]));
    orch.start().expect("start");
    let pw = Passphrase::new(b"correct".to_vec()).unwrap();
    orch.submit_passphrase(&pw).unwrap();

    let events = fx.events();
    let position = |pred: fn(&RecoveryEvent) -> bool| {
        events.iter().position(pred).expect("event present")
    };
    let probed = position(|e| matches!(e, RecoveryEvent::DeviceProbed(_)));
    let required = position(|e| matches!(e, RecoveryEvent::PassphraseRequired { .. }));
    let unlocked = position(|e| matches!(e, RecoveryEvent::Unlocked));
    let install = position(|e| matches!(e, RecoveryEvent::InstallStarted));
    let finished = position(|e| matches!(e, RecoveryEvent::Finished(_)));

    assert!(probed < required);
    assert!(required < unlocked);
    assert!(unlocked < install);
    assert!(install < finished);
    assert_eq!(
        events[finished],
        RecoveryEvent::Finished(ResetOutcome::Success)
    );
}

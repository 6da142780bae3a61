//! Property tests for the probe classifier and the attempt counter.

use proptest::prelude::*;

use furios_recovery::attempts::AttemptCounter;
use furios_recovery::probe::{probe, DeviceClass, DEFAULT_HEADER_READ, LUKS_MAGIC};
use furios_recovery::DeviceLayout;

fn probe_header(header: &[u8]) -> DeviceClass {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let layout = DeviceLayout::rooted_at(dir.path());
    std::fs::write(&layout.header_device, header).expect("write header");
    probe(&layout, DEFAULT_HEADER_READ).classification
}

proptest! {
    #[test]
    fn prop_non_magic_prefix_is_unencrypted(
        header in prop::collection::vec(any::<u8>(), DEFAULT_HEADER_READ)
    ) {
        prop_assume!(header[..LUKS_MAGIC.len()] != LUKS_MAGIC);
        prop_assert_eq!(probe_header(&header), DeviceClass::Unencrypted);
    }

    #[test]
    fn prop_magic_prefix_is_encrypted_regardless_of_tail(
        tail in prop::collection::vec(any::<u8>(), DEFAULT_HEADER_READ - LUKS_MAGIC.len())
    ) {
        let mut header = LUKS_MAGIC.to_vec();
        header.extend_from_slice(&tail);
        prop_assert_eq!(probe_header(&header), DeviceClass::Encrypted);
    }

    #[test]
    fn prop_truncated_header_is_probe_error(
        len in 0..DEFAULT_HEADER_READ,
        byte in any::<u8>()
    ) {
        let header = vec![byte; len];
        prop_assert_eq!(probe_header(&header), DeviceClass::ProbeError);
    }

    #[test]
    fn prop_lockout_exactly_at_limit(limit in 1u32..10, failures in 0u32..20) {
        let mut counter = AttemptCounter::new(limit);
        for _ in 0..failures {
            counter.record_failure();
        }
        prop_assert_eq!(counter.is_locked_out(), failures >= limit);
        prop_assert_eq!(counter.remaining(), limit.saturating_sub(failures));
    }

    #[test]
    fn prop_lockout_is_monotonic(limit in 1u32..10, failures in 0u32..20) {
        let mut counter = AttemptCounter::new(limit);
        let mut was_locked = false;
        for _ in 0..failures {
            counter.record_failure();
            let locked = counter.is_locked_out();
            prop_assert!(!was_locked || locked, "lockout must never clear");
            was_locked = locked;
        }
    }
}

//! Encryption state probing
//!
//! Classifies whether the target volume is LUKS-encrypted by reading a
//! fixed-size prefix of the raw header device and comparing the leading
//! bytes against the LUKS magic signature.
//!
//! The probe is deliberately conservative: any failure to open or fully
//! read the device classifies as [`DeviceClass::ProbeError`], which callers
//! must treat as "do not continue", never as "proceed unencrypted".

use crate::devices::DeviceLayout;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

/// On-disk LUKS signature is `LUKS\xba\xbe`; only the first five bytes are
/// compared and the trailing `\xbe` variant byte is ignored.
pub const LUKS_MAGIC: [u8; 5] = [0x4c, 0x55, 0x4b, 0x53, 0xba];

/// Number of header bytes read by default.
pub const DEFAULT_HEADER_READ: usize = 64;

/// Classification of the probed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Header carries no LUKS signature.
    Unencrypted,
    /// Header starts with the LUKS magic.
    Encrypted,
    /// The decrypted mapper node already exists; header contents are
    /// irrelevant and were not read.
    AlreadyUnlocked,
    /// Device could not be opened or fully read. Fail closed.
    ProbeError,
}

impl DeviceClass {
    /// True if the pipeline may proceed to install without an unlock.
    pub fn skips_unlock(self) -> bool {
        matches!(self, Self::Unencrypted | Self::AlreadyUnlocked)
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unencrypted => "unencrypted",
            Self::Encrypted => "encrypted",
            Self::AlreadyUnlocked => "already unlocked",
            Self::ProbeError => "probe error",
        };
        write!(f, "{}", s)
    }
}

/// Result of a single probe call. Created per call, never persisted.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Device whose header was inspected.
    pub device_path: PathBuf,
    /// Bytes actually read from the header (empty when the raw device was
    /// never touched, i.e. `AlreadyUnlocked` or an open failure).
    pub probed_magic_bytes: Vec<u8>,
    /// Classification outcome.
    pub classification: DeviceClass,
}

/// Probe the header device for a LUKS signature.
///
/// The well-known decrypted mapper path is checked first: if it exists the
/// volume is already unlocked and the raw device is not opened at all, so
/// repeated probes after an unlock are cheap and side-effect-free.
///
/// `header_bytes` controls how much of the header prefix is read; a read
/// shorter than requested is a `ProbeError`. The only side effect is a
/// transient read-only file descriptor, closed on every path.
pub fn probe(layout: &DeviceLayout, header_bytes: usize) -> DeviceState {
    if layout.decrypted_mapper.exists() {
        log::info!(
            "decrypted mapper {} present, volume already unlocked",
            layout.decrypted_mapper.display()
        );
        return DeviceState {
            device_path: layout.header_device.clone(),
            probed_magic_bytes: Vec::new(),
            classification: DeviceClass::AlreadyUnlocked,
        };
    }

    let mut file = match File::open(&layout.header_device) {
        Ok(f) => f,
        Err(e) => {
            log::error!(
                "failed to open {}: {}",
                layout.header_device.display(),
                e
            );
            return DeviceState {
                device_path: layout.header_device.clone(),
                probed_magic_bytes: Vec::new(),
                classification: DeviceClass::ProbeError,
            };
        }
    };

    let mut buffer = vec![0u8; header_bytes];
    let mut filled = 0;
    // Loop until the requested prefix is complete; block devices may return
    // short reads at any boundary.
    while filled < header_bytes {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!(
                    "failed to read {}: {}",
                    layout.header_device.display(),
                    e
                );
                return DeviceState {
                    device_path: layout.header_device.clone(),
                    probed_magic_bytes: buffer[..filled].to_vec(),
                    classification: DeviceClass::ProbeError,
                };
            }
        }
    }
    buffer.truncate(filled);

    let classification = if filled < header_bytes {
        log::error!(
            "short read from {}: wanted {} bytes, got {}",
            layout.header_device.display(),
            header_bytes,
            filled
        );
        DeviceClass::ProbeError
    } else if buffer.len() >= LUKS_MAGIC.len() && buffer[..LUKS_MAGIC.len()] == LUKS_MAGIC {
        DeviceClass::Encrypted
    } else {
        DeviceClass::Unencrypted
    };

    log::info!(
        "probed {}: {}",
        layout.header_device.display(),
        classification
    );

    DeviceState {
        device_path: layout.header_device.clone(),
        probed_magic_bytes: buffer,
        classification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout_with_header(header: &[u8]) -> (TempDir, DeviceLayout) {
        let dir = TempDir::new().expect("tempdir");
        let layout = DeviceLayout::rooted_at(dir.path());
        fs::write(&layout.header_device, header).expect("write header");
        (dir, layout)
    }

    fn luks_header() -> Vec<u8> {
        let mut h = vec![0u8; DEFAULT_HEADER_READ];
        h[..5].copy_from_slice(&LUKS_MAGIC);
        h[5] = 0xbe;
        h
    }

    #[test]
    fn test_luks_magic_classifies_encrypted() {
        let (_dir, layout) = layout_with_header(&luks_header());
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::Encrypted);
        assert_eq!(&state.probed_magic_bytes[..5], &LUKS_MAGIC);
    }

    #[test]
    fn test_sixth_byte_is_ignored() {
        let mut header = luks_header();
        header[5] = 0x00; // not 0xbe, still encrypted
        let (_dir, layout) = layout_with_header(&header);
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::Encrypted);
    }

    #[test]
    fn test_non_magic_classifies_unencrypted() {
        let mut header = luks_header();
        header[0] = b'X';
        let (_dir, layout) = layout_with_header(&header);
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::Unencrypted);
    }

    #[test]
    fn test_short_read_is_probe_error() {
        let (_dir, layout) = layout_with_header(&[0x4c, 0x55, 0x4b]);
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::ProbeError);
    }

    #[test]
    fn test_missing_device_is_probe_error() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DeviceLayout::rooted_at(dir.path());
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::ProbeError);
        assert!(state.probed_magic_bytes.is_empty());
    }

    #[test]
    fn test_existing_mapper_short_circuits_header() {
        // Corrupted header plus a present mapper must still report
        // AlreadyUnlocked: the mapper check comes first.
        let (_dir, layout) = layout_with_header(b"garbage");
        fs::create_dir_all(layout.decrypted_mapper.parent().unwrap()).unwrap();
        fs::write(&layout.decrypted_mapper, b"").unwrap();
        let state = probe(&layout, DEFAULT_HEADER_READ);
        assert_eq!(state.classification, DeviceClass::AlreadyUnlocked);
        assert!(state.probed_magic_bytes.is_empty());
    }

    #[test]
    fn test_probe_is_idempotent_after_unlock() {
        let (_dir, layout) = layout_with_header(&luks_header());
        fs::create_dir_all(layout.decrypted_mapper.parent().unwrap()).unwrap();
        fs::write(&layout.decrypted_mapper, b"").unwrap();
        for _ in 0..3 {
            let state = probe(&layout, DEFAULT_HEADER_READ);
            assert_eq!(state.classification, DeviceClass::AlreadyUnlocked);
        }
    }

    #[test]
    fn test_skips_unlock_predicate() {
        assert!(DeviceClass::Unencrypted.skips_unlock());
        assert!(DeviceClass::AlreadyUnlocked.skips_unlock());
        assert!(!DeviceClass::Encrypted.skips_unlock());
        assert!(!DeviceClass::ProbeError.skips_unlock());
    }
}

//! Fixed device paths shared by the probe, unlock, and mount steps.
//!
//! The production paths are constants: the recovery environment is built
//! around a known device tree and nothing here is user-configurable. They
//! are grouped in a [`DeviceLayout`] that is passed explicitly into each
//! component so tests can redirect every path at a temporary directory
//! without touching real block devices.

use std::path::PathBuf;

/// Encrypted data logical volume.
pub const DATA_DEVICE: &str = "/dev/droidian/droidian-rootfs";

/// Detached LUKS header device. This is also the device whose leading bytes
/// the probe inspects.
pub const HEADER_DEVICE: &str = "/dev/droidian/droidian-reserved";

/// Mapper node that exists once the data volume has been unlocked.
pub const DECRYPTED_MAPPER: &str = "/dev/mapper/droidian_encrypted";

/// Name under which the decrypted mapping is activated.
pub const MAPPING_NAME: &str = "droidian_encrypted";

/// Android dynamic-partition super device.
pub const SUPER_DEVICE: &str = "/dev/disk/by-partlabel/super";

/// Slot A system mapper, materialized from the super device.
pub const SLOT_A_DEVICE: &str = "/dev/mapper/dynpart-system_a";

/// Slot B system mapper.
pub const SLOT_B_DEVICE: &str = "/dev/mapper/dynpart-system_b";

/// Raw userdata partition that the extracted image is flashed onto.
pub const USERDATA_DEVICE: &str = "/dev/disk/by-partlabel/userdata";

/// Where the active system partition gets mounted read-only.
pub const SYSTEM_MOUNTPOINT: &str = "/system_mnt";

/// All device paths the pipeline touches, bundled so they travel as one
/// explicit parameter instead of ambient globals.
#[derive(Debug, Clone)]
pub struct DeviceLayout {
    /// Encrypted data volume.
    pub data_device: PathBuf,
    /// Detached LUKS header device (probe target).
    pub header_device: PathBuf,
    /// Mapper path that exists after a successful unlock.
    pub decrypted_mapper: PathBuf,
    /// Mapping name handed to the unlock helper.
    pub mapping_name: String,
    /// Dynamic-partition super device.
    pub super_device: PathBuf,
    /// Slot A system mapper.
    pub slot_a_device: PathBuf,
    /// Slot B system mapper.
    pub slot_b_device: PathBuf,
    /// Raw userdata partition (flash target).
    pub userdata_device: PathBuf,
    /// Mountpoint for the active system partition.
    pub mountpoint: PathBuf,
    /// Directory the userdata archive is extracted into.
    pub extract_dir: PathBuf,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            data_device: PathBuf::from(DATA_DEVICE),
            header_device: PathBuf::from(HEADER_DEVICE),
            decrypted_mapper: PathBuf::from(DECRYPTED_MAPPER),
            mapping_name: MAPPING_NAME.to_string(),
            super_device: PathBuf::from(SUPER_DEVICE),
            slot_a_device: PathBuf::from(SLOT_A_DEVICE),
            slot_b_device: PathBuf::from(SLOT_B_DEVICE),
            userdata_device: PathBuf::from(USERDATA_DEVICE),
            mountpoint: PathBuf::from(SYSTEM_MOUNTPOINT),
            // Archives unpack into the ramdisk root; the extracted image
            // is probed at /userdata-raw.img.
            extract_dir: PathBuf::from("/"),
        }
    }
}

impl DeviceLayout {
    /// Layout rooted at a scratch directory. Every path lives under `root`
    /// so tests never touch real devices.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            data_device: root.join("droidian-rootfs"),
            header_device: root.join("droidian-reserved"),
            decrypted_mapper: root.join("mapper/droidian_encrypted"),
            mapping_name: MAPPING_NAME.to_string(),
            super_device: root.join("super"),
            slot_a_device: root.join("mapper/dynpart-system_a"),
            slot_b_device: root.join("mapper/dynpart-system_b"),
            userdata_device: root.join("userdata"),
            mountpoint: root.join("system_mnt"),
            extract_dir: root.to_path_buf(),
        }
    }
}

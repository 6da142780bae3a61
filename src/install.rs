//! Userdata image installation
//!
//! Locates the userdata archive on the mounted system partition, extracts
//! it, and flashes the resulting raw image onto the userdata partition with
//! a block-aligned bulk copy.
//!
//! The final write is destructive and non-resumable: a failure partway
//! through leaves the partition in an indeterminate state, which is
//! reported as `WriteFailed` and never retried or rolled back. There is no
//! journal for this step; the accepted recovery procedure is to run the
//! reset again.

use crate::devices::DeviceLayout;
use crate::runner::PipedCommand;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted archive names on the system partition, in priority order.
pub const ARCHIVE_CANDIDATES: [&str; 2] = ["userdata.img.tar.gz", "userdata-raw.img.tar.gz"];

/// Accepted extracted image names, in priority order.
pub const IMAGE_CANDIDATES: [&str; 2] = ["userdata-raw.img", "userdata.img"];

/// Block size for the raw partition copy.
pub const COPY_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Installation failure classifications surfaced to the orchestrator.
#[derive(Error, Debug)]
pub enum InstallError {
    /// Neither accepted archive name exists on the system partition.
    #[error("userdata archive not found on system partition")]
    ArchiveNotFound,

    /// Extraction failed, or succeeded without producing an expected image.
    #[error("failed to extract userdata archive: {0}")]
    ExtractFailed(String),

    /// The raw copy onto the userdata partition failed. The partition may
    /// be partially written.
    #[error("failed to write userdata image: {0}")]
    WriteFailed(#[from] std::io::Error),
}

/// Extracts the userdata archive and flashes the image.
pub struct ImageInstaller {
    layout: DeviceLayout,
    tar: PathBuf,
}

impl ImageInstaller {
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            layout,
            tar: PathBuf::from("tar"),
        }
    }

    /// Override the tar binary (tests point this at a stub).
    pub fn with_tar(mut self, tar: impl Into<PathBuf>) -> Self {
        self.tar = tar.into();
        self
    }

    /// Run the full install against the mounted system root.
    ///
    /// The caller keeps ownership of the mount; this function never
    /// unmounts. The orchestrator tears the mount down on every exit path,
    /// success or failure.
    pub fn install(&self, mounted_root: &Path) -> Result<(), InstallError> {
        let archive =
            find_candidate(mounted_root, &ARCHIVE_CANDIDATES).ok_or(InstallError::ArchiveNotFound)?;
        log::info!("found userdata archive {}", archive.display());

        self.extract(&archive)?;

        let image = find_candidate(&self.layout.extract_dir, &IMAGE_CANDIDATES).ok_or_else(|| {
            // Extraction reported success but the expected artifact is
            // missing; the archive did not contain a userdata image.
            InstallError::ExtractFailed(format!(
                "archive {} did not contain a userdata image",
                archive.display()
            ))
        })?;
        log::info!("found extracted image {}", image.display());

        let written = raw_copy(&image, &self.layout.userdata_device, COPY_BLOCK_SIZE)?;
        log::info!(
            "wrote {} bytes to {}",
            written,
            self.layout.userdata_device.display()
        );

        Ok(())
    }

    fn extract(&self, archive: &Path) -> Result<(), InstallError> {
        let result = PipedCommand::new(&self.tar)
            .arg("-xzf")
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(self.layout.extract_dir.display().to_string())
            .run_capture();

        match result {
            Ok(out) if out.disposition.success() => Ok(()),
            Ok(out) => Err(InstallError::ExtractFailed(format!(
                "tar exited {:?}: {}",
                out.disposition,
                out.stderr.trim()
            ))),
            Err(e) => Err(InstallError::ExtractFailed(e.to_string())),
        }
    }
}

/// First existing path among `names` under `dir`, in the given priority
/// order.
fn find_candidate(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names.iter().map(|n| dir.join(n)).find(|p| p.exists())
}

/// Bulk-copy `src` onto `dst` in `block_size` chunks, syncing before
/// returning. `dst` is opened for writing without truncation so block
/// devices work. Returns the number of bytes written.
pub fn raw_copy(src: &Path, dst: &Path, block_size: usize) -> std::io::Result<u64> {
    let mut input = File::open(src)?;
    let mut output = OpenOptions::new().write(true).create(true).open(dst)?;

    let mut buffer = vec![0u8; block_size];
    let mut total: u64 = 0;
    loop {
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buffer[..n])?;
        total += n as u64;
    }
    output.flush()?;
    output.sync_all()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, DeviceLayout) {
        let dir = TempDir::new().expect("tempdir");
        let mut layout = DeviceLayout::rooted_at(dir.path());
        layout.extract_dir = dir.path().join("extract");
        std::fs::create_dir_all(&layout.extract_dir).unwrap();
        std::fs::create_dir_all(&layout.mountpoint).unwrap();
        (dir, layout)
    }

    #[test]
    fn test_find_candidate_priority_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("userdata-raw.img.tar.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("userdata.img.tar.gz"), b"x").unwrap();

        let found = find_candidate(dir.path(), &ARCHIVE_CANDIDATES).unwrap();
        assert!(found.ends_with("userdata.img.tar.gz"));
    }

    #[test]
    fn test_find_candidate_second_choice() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("userdata-raw.img.tar.gz"), b"x").unwrap();

        let found = find_candidate(dir.path(), &ARCHIVE_CANDIDATES).unwrap();
        assert!(found.ends_with("userdata-raw.img.tar.gz"));
    }

    #[test]
    fn test_find_candidate_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_candidate(dir.path(), &ARCHIVE_CANDIDATES).is_none());
    }

    #[test]
    fn test_missing_archive_is_archive_not_found() {
        let (_dir, layout) = scratch();
        let installer = ImageInstaller::new(layout.clone());
        let err = installer.install(&layout.mountpoint).unwrap_err();
        assert!(matches!(err, InstallError::ArchiveNotFound));
    }

    #[test]
    fn test_failed_extraction_is_extract_failed() {
        let (_dir, layout) = scratch();
        std::fs::write(layout.mountpoint.join("userdata.img.tar.gz"), b"not a tarball").unwrap();

        let installer = ImageInstaller::new(layout.clone()).with_tar("false");
        let err = installer.install(&layout.mountpoint).unwrap_err();
        assert!(matches!(err, InstallError::ExtractFailed(_)));
    }

    #[test]
    fn test_extraction_without_image_is_extract_failed() {
        let (_dir, layout) = scratch();
        std::fs::write(layout.mountpoint.join("userdata.img.tar.gz"), b"x").unwrap();

        // "true" extracts nothing but exits zero: the expected image never
        // appears, which must still classify as an extraction failure.
        let installer = ImageInstaller::new(layout.clone()).with_tar("true");
        let err = installer.install(&layout.mountpoint).unwrap_err();
        assert!(matches!(err, InstallError::ExtractFailed(_)));
    }

    #[test]
    fn test_raw_copy_round_trips_content() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("image");
        let dst = dir.path().join("partition");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &payload).unwrap();

        let written = raw_copy(&src, &dst, 4096).unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), payload);
    }

    #[test]
    fn test_raw_copy_handles_non_block_aligned_tail() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("image");
        let dst = dir.path().join("partition");
        // 3 full blocks plus a ragged tail.
        let payload = vec![0xabu8; 4096 * 3 + 17];
        std::fs::write(&src, &payload).unwrap();

        let written = raw_copy(&src, &dst, 4096).unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), payload);
    }

    #[test]
    fn test_raw_copy_missing_source_is_error() {
        let dir = TempDir::new().unwrap();
        let err = raw_copy(
            &dir.path().join("missing"),
            &dir.path().join("dst"),
            4096,
        )
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}

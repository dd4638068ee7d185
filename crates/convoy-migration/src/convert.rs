//! Disk image format conversion.
//!
//! Fetched disks are converted to the destination format in the worker's
//! conversion directory before being forwarded. The target path is
//! deterministic (source path with the target format's extension), and the
//! conversion step skips work when the target already exists; a crashed and
//! recreated migration can therefore re-run the fetch phase without
//! converting the same disk twice.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::statvfs::statvfs;
use tokio::process::Command;

use crate::provider::{DiskArtifact, DiskFormat, ProviderError};

/// Converts disk images between formats.
#[async_trait]
pub trait ImageConverter: Send + Sync {
    /// Convert `source` into `target` with the given format.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the conversion fails.
    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        target_format: DiskFormat,
    ) -> Result<(), ProviderError>;
}

/// Converter shelling out to `qemu-img convert`.
#[derive(Debug, Default)]
pub struct QemuImgConverter;

#[async_trait]
impl ImageConverter for QemuImgConverter {
    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        target_format: DiskFormat,
    ) -> Result<(), ProviderError> {
        let output = Command::new("qemu-img")
            .arg("convert")
            .arg("-O")
            .arg(target_format.as_str())
            .arg(source)
            .arg(target)
            .output()
            .await
            .map_err(|e| ProviderError::Failed {
                operation: "qemu-img convert".to_string(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ProviderError::Failed {
                operation: "qemu-img convert".to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// The deterministic conversion target for a staged image.
#[must_use]
pub fn converted_path(source: &Path, target_format: DiskFormat) -> PathBuf {
    source.with_extension(target_format.extension())
}

/// Convert each disk to the target format, independently.
///
/// Disks already in the target format pass through untouched. A disk whose
/// conversion target already exists on disk is skipped, which makes the
/// step idempotent.
///
/// # Errors
///
/// Returns the first conversion failure.
pub async fn convert_disks(
    converter: &dyn ImageConverter,
    disks: Vec<DiskArtifact>,
    target_format: DiskFormat,
) -> Result<Vec<DiskArtifact>, ProviderError> {
    tracing::info!(count = disks.len(), format = target_format.as_str(), "disk conversion started");

    let mut converted = Vec::with_capacity(disks.len());
    for disk in disks {
        if disk.format == target_format {
            converted.push(disk);
            continue;
        }

        let target = converted_path(&disk.path, target_format);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            tracing::info!(target = %target.display(), "converted artifact already present, skipping");
        } else {
            converter.convert(&disk.path, &target, target_format).await?;
        }

        converted.push(DiskArtifact {
            index: disk.index,
            path: target,
            format: target_format,
        });
    }

    Ok(converted)
}

/// Bytes available in the filesystem holding the given directory.
///
/// # Errors
///
/// Returns an I/O error if the filesystem cannot be queried.
pub fn free_space(path: &Path) -> std::io::Result<u64> {
    let stat = statvfs(path).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(u64::from(stat.blocks_available()) * u64::from(stat.fragment_size()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Converter that copies the source file and counts invocations.
    #[derive(Default)]
    struct CopyConverter {
        calls: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ImageConverter for CopyConverter {
        async fn convert(
            &self,
            source: &Path,
            target: &Path,
            _target_format: DiskFormat,
        ) -> Result<(), ProviderError> {
            tokio::fs::copy(source, target)
                .await
                .map_err(|e| ProviderError::Failed {
                    operation: "copy".to_string(),
                    message: e.to_string(),
                })?;
            self.calls.lock().push(target.to_path_buf());
            Ok(())
        }
    }

    async fn staged_disk(dir: &TempDir, name: &str) -> DiskArtifact {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"image-bytes").await.unwrap();
        DiskArtifact {
            index: 0,
            path,
            format: DiskFormat::Vmdk,
        }
    }

    #[test]
    fn converted_path_swaps_extension() {
        let path = converted_path(Path::new("/stage/disk0.vmdk"), DiskFormat::Qcow2);
        assert_eq!(path, Path::new("/stage/disk0.qcow2"));
    }

    #[tokio::test]
    async fn conversion_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let converter = CopyConverter::default();
        let disk = staged_disk(&dir, "disk0.vmdk").await;

        let first = convert_disks(&converter, vec![disk.clone()], DiskFormat::Qcow2)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].format, DiskFormat::Qcow2);
        assert!(first[0].path.ends_with("disk0.qcow2"));
        assert_eq!(converter.calls.lock().len(), 1);

        // second run detects the pre-existing target and performs no work
        let second = convert_disks(&converter, vec![disk], DiskFormat::Qcow2)
            .await
            .unwrap();
        assert_eq!(second[0].path, first[0].path);
        assert_eq!(converter.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn disks_in_target_format_pass_through() {
        let dir = TempDir::new().unwrap();
        let converter = CopyConverter::default();
        let mut disk = staged_disk(&dir, "disk0.qcow2").await;
        disk.format = DiskFormat::Qcow2;

        let out = convert_disks(&converter, vec![disk.clone()], DiskFormat::Qcow2)
            .await
            .unwrap();
        assert_eq!(out[0].path, disk.path);
        assert!(converter.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn each_disk_converted_independently() {
        let dir = TempDir::new().unwrap();
        let converter = CopyConverter::default();
        let mut disks = Vec::new();
        for (i, name) in ["disk0.vmdk", "disk1.vmdk"].iter().enumerate() {
            let mut disk = staged_disk(&dir, name).await;
            disk.index = i;
            disks.push(disk);
        }

        let out = convert_disks(&converter, disks, DiskFormat::Qcow2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].index, 0);
        assert_eq!(out[1].index, 1);
        assert_eq!(converter.calls.lock().len(), 2);
    }

    #[test]
    fn free_space_reports_nonzero_for_tempdir() {
        let dir = TempDir::new().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
    }
}

// Block-device enumeration via /sys/block. Linux-only, best effort: a device
// that fails analysis is logged and skipped rather than failing the listing.

use super::Device;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Enumerate physical block devices.
pub fn list_devices() -> Result<Vec<Device>> {
    list_devices_from("/sys/block", "/proc/mounts")
}

fn list_devices_from(sys_block: impl AsRef<Path>, mounts: impl AsRef<Path>) -> Result<Vec<Device>> {
    let mounts = fs::read_to_string(mounts.as_ref()).unwrap_or_default();
    let mut devices = Vec::new();

    let entries = fs::read_dir(sys_block.as_ref())
        .with_context(|| format!("reading {}", sys_block.as_ref().display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if should_skip_device(&name) {
            continue;
        }
        match analyze_device(&entry.path(), &name, &mounts) {
            Ok(dev) => devices.push(dev),
            Err(err) => warn!(device = %name, error = %err, "skipping unanalyzable device"),
        }
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

/// Skip loop devices, ram disks, device mapper, optical drives and zram.
fn should_skip_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("sr")
        || name.starts_with("zram")
}

fn analyze_device(sys_path: &Path, name: &str, mounts: &str) -> Result<Device> {
    // /sys/block/<dev>/size counts 512-byte units regardless of sector size
    let size_units: u64 = read_trimmed(&sys_path.join("size"))?
        .parse()
        .context("parsing device size")?;
    let sector_size: u32 = read_trimmed(&sys_path.join("queue/hw_sector_size"))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(512);
    let model = read_trimmed(&sys_path.join("device/model")).unwrap_or_else(|_| "Unknown".into());

    let dev_path = PathBuf::from(format!("/dev/{}", name));
    Ok(Device {
        capacity: size_units * 512,
        sector_size,
        ata_capable: is_ata_capable(sys_path, name),
        mounted: is_mounted(&dev_path, mounts),
        model,
        path: dev_path,
    })
}

fn read_trimmed(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?
        .trim()
        .to_string())
}

/// ATA capability heuristic: the device link passes through the ata subsystem,
/// or it is a classic sdX SCSI-disk name.
fn is_ata_capable(sys_path: &Path, name: &str) -> bool {
    if let Ok(target) = fs::read_link(sys_path.join("device")) {
        if target.to_string_lossy().contains("/ata") {
            return true;
        }
    }
    name.starts_with("sd")
}

/// Mounted if the node or any of its partitions appears in the mount table.
fn is_mounted(dev_path: &Path, mounts: &str) -> bool {
    let node = dev_path.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|source| source == node || source.starts_with(node.as_ref()))
}

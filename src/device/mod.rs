// Raw block-device access: discovery facts plus an exclusively-owned
// read-write handle doing positioned sector I/O.

pub mod listing;

use crate::procedure::OpenError;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::PathBuf;

/// One discovered block device. Immutable after discovery; owned by the
/// listing layer and borrowed by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub path: PathBuf,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Logical sector size in bytes, typically 512.
    pub sector_size: u32,
    pub ata_capable: bool,
    pub mounted: bool,
    pub model: String,
}

impl Device {
    pub fn total_sectors(&self) -> u64 {
        self.capacity / self.sector_size as u64
    }
}

/// Positioned sector I/O. Procedures talk to the device through this seam so
/// tests can stand in doubles for the real descriptor.
pub trait BlockIo {
    /// Positioned read of `buf.len()` bytes starting at `lba`. Returns the
    /// byte count actually read; a single syscall, no retry on short reads.
    fn read_at(&self, lba: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Positioned write of `buf` starting at `lba`. Returns the byte count
    /// actually written.
    fn write_at(&self, lba: u64, buf: &[u8]) -> io::Result<usize>;
}

/// Exclusively-owned read-write descriptor to a device node.
///
/// Offsets are sector-aligned (`lba * sector_size`). Short reads and writes
/// are reported, not retried; retry and interpretation policy belongs to the
/// calling procedure.
pub struct DeviceHandle {
    file: File,
    sector_size: u32,
}

impl DeviceHandle {
    /// Open the device node read-write with large-file semantics. The
    /// descriptor is held until the handle drops.
    pub fn open_rw(dev: &Device) -> Result<Self, OpenError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_LARGEFILE)
            .open(&dev.path)
            .map_err(|source| OpenError::Device {
                path: dev.path.clone(),
                source,
            })?;
        Ok(Self {
            file,
            sector_size: dev.sector_size,
        })
    }
}

impl BlockIo for DeviceHandle {
    fn read_at(&self, lba: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, lba * self.sector_size as u64)
    }

    fn write_at(&self, lba: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.write_at(buf, lba * self.sector_size as u64)
    }
}

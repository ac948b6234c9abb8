//! Image device interface
//!
//! The engine addresses the image by absolute byte offset: FAT entries are 4
//! bytes, directory slots 32, so block-aligned I/O would force every caller
//! to do its own splitting. Devices therefore expose positioned byte reads
//! and writes plus a flush barrier; all FAT and directory mutations must be
//! durable once `flush` returns.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;

use log::error;
use lru::LruCache;
use spin::RwLock;

use crate::{BLOCK_CACHE_LIMIT, BLOCK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    ReadError,
    WriteError,
}

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceError::ReadError => write!(f, "read failed"),
            DeviceError::WriteError => write!(f, "write failed"),
        }
    }
}

pub trait ImageDevice: Send + Sync {
    /// Fill `buf` from the image starting at absolute byte `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Write `buf` to the image starting at absolute byte `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError>;

    /// Barrier: earlier writes are durable when this returns.
    fn flush(&self) -> Result<(), DeviceError>;
}

/// File-backed image with a bounded write-through sector cache.
///
/// Reads are served per 512-byte sector through an LRU of recently used
/// sectors; writes go straight to the file and patch any cached copy, so the
/// cache never holds dirty data and `flush` only has to sync the file.
pub struct ImageFile {
    file: RwLock<File>,
    cache: RwLock<LruCache<u64, [u8; BLOCK_SIZE]>>,
}

impl ImageFile {
    pub fn new(file: File) -> Self {
        Self {
            file: RwLock::new(file),
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(BLOCK_CACHE_LIMIT).unwrap(),
            )),
        }
    }

    fn load_sector(&self, block_id: u64) -> Result<[u8; BLOCK_SIZE], DeviceError> {
        let mut cache = self.cache.write();
        if let Some(sector) = cache.get(&block_id) {
            return Ok(*sector);
        }
        let mut sector = [0u8; BLOCK_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64))
            .map_err(|_| DeviceError::ReadError)?;
        file.read_exact(&mut sector).map_err(|err| {
            error!("image read failed at block {block_id}: {err}");
            DeviceError::ReadError
        })?;
        cache.put(block_id, sector);
        Ok(sector)
    }
}

impl ImageDevice for ImageFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut pos = offset;
        let mut done = 0usize;
        while done < buf.len() {
            let block_id = pos / BLOCK_SIZE as u64;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let len = (BLOCK_SIZE - in_block).min(buf.len() - done);
            let sector = self.load_sector(block_id)?;
            buf[done..done + len].copy_from_slice(&sector[in_block..in_block + len]);
            pos += len as u64;
            done += len;
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError> {
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))
                .map_err(|_| DeviceError::WriteError)?;
            file.write_all(buf).map_err(|err| {
                error!("image write failed at offset {offset}: {err}");
                DeviceError::WriteError
            })?;
        }

        // Patch cached copies so later reads see the new bytes.
        let mut cache = self.cache.write();
        let mut pos = offset;
        let mut done = 0usize;
        while done < buf.len() {
            let block_id = pos / BLOCK_SIZE as u64;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let len = (BLOCK_SIZE - in_block).min(buf.len() - done);
            if let Some(sector) = cache.get_mut(&block_id) {
                sector[in_block..in_block + len].copy_from_slice(&buf[done..done + len]);
            }
            pos += len as u64;
            done += len;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), DeviceError> {
        self.file.write().sync_all().map_err(|err| {
            error!("image sync failed: {err}");
            DeviceError::WriteError
        })
    }
}

/// Memory-backed image. Substituted for [`ImageFile`] in tests so the engine
/// can be exercised without touching the host file system.
pub struct MemDevice {
    data: RwLock<Vec<u8>>,
}

impl MemDevice {
    pub fn new(bytes: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; bytes]),
        }
    }
}

impl ImageDevice for MemDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(DeviceError::ReadError)?;
        if end > data.len() {
            return Err(DeviceError::ReadError);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or(DeviceError::WriteError)?;
        if end > data.len() {
            return Err(DeviceError::WriteError);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

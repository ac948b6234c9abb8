//! Command surface
//!
//! A `Session` bundles everything one interactive run needs: the mounted
//! volume, the open-file table, the current directory cluster, and the
//! display path. Each command is a method that returns values or an
//! [`FsError`](crate::FsError); rendering is entirely the shell's business,
//! so tests drive the engine through this type directly.

use crate::fs::{Volume, VolumeInfo};
use crate::table::{HandleInfo, Mode, OpenFileTable, OpenRecord};
use crate::{to_fat32_name, FsError, Result, ATTR_ARCHIVE, ATTR_DIRECTORY};

pub struct Session {
    vol: Volume,
    table: OpenFileTable,
    current_cluster: u32,
    path: String,
}

impl Session {
    pub fn new(vol: Volume) -> Self {
        let current_cluster = vol.root_cluster();
        Self {
            vol,
            table: OpenFileTable::new(),
            current_cluster,
            path: String::from("/"),
        }
    }

    pub fn volume(&self) -> &Volume {
        &self.vol
    }

    pub fn current_cluster(&self) -> u32 {
        self.current_cluster
    }

    /// Display path of the current directory, always starting at `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> VolumeInfo {
        self.vol.info()
    }

    /// Names in the current directory, `.`/`..` and tombstones excluded.
    pub fn ls(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for slot in self.vol.read_dir(self.current_cluster)? {
            if slot.entry.is_dot() {
                continue;
            }
            // Plain directories and files only; volume labels and other
            // attribute combinations stay hidden.
            if slot.entry.attr == ATTR_DIRECTORY || slot.entry.attr == ATTR_ARCHIVE {
                names.push(slot.entry.format_name());
            }
        }
        Ok(names)
    }

    pub fn cd(&mut self, name: &str) -> Result<()> {
        if name == "." {
            return Ok(());
        }
        self.current_cluster = self.vol.change_dir(self.current_cluster, name)?;
        if name == ".." {
            if self.path != "/" {
                match self.path.rfind('/') {
                    Some(0) => self.path.truncate(1),
                    Some(pos) => self.path.truncate(pos),
                    None => {}
                }
            }
        } else {
            if self.path != "/" {
                self.path.push('/');
            }
            self.path.push_str(name);
        }
        Ok(())
    }

    pub fn mkdir(&self, name: &str) -> Result<()> {
        self.vol.create_dir(self.current_cluster, name)
    }

    pub fn creat(&self, name: &str) -> Result<()> {
        self.vol.create_file(self.current_cluster, name)
    }

    pub fn open(&mut self, name: &str, mode_arg: &str) -> Result<usize> {
        let mode = Mode::parse(mode_arg).ok_or(FsError::BadMode)?;
        let key = to_fat32_name(name);
        if self.table.is_open(&key) {
            return Err(FsError::InUse);
        }
        let slot = self.vol.lookup(self.current_cluster, name)?;
        if !slot.entry.is_file() {
            return Err(FsError::NotAFile);
        }
        self.table.open(OpenRecord {
            name: key,
            mode,
            first_cluster: slot.entry.first_cluster(),
            entry_offset: slot.offset,
            offset: 0,
            path: self.path.clone(),
        })
    }

    pub fn close(&mut self, name: &str) -> Result<()> {
        self.table.close(&to_fat32_name(name))
    }

    pub fn lsof(&self) -> Vec<HandleInfo> {
        self.table.list()
    }

    pub fn lseek(&mut self, name: &str, offset: u32) -> Result<()> {
        let key = to_fat32_name(name);
        let size = {
            let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
            self.vol.chain_size(record.first_cluster)?
        };
        if offset as u64 > size {
            return Err(FsError::OffsetTooLarge);
        }
        let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
        record.offset = offset;
        Ok(())
    }

    /// Read up to `count` bytes from the handle's position. Short (possibly
    /// empty) results mean the position is at or near the computed end.
    pub fn read(&mut self, name: &str, count: u32) -> Result<Vec<u8>> {
        let key = to_fat32_name(name);
        let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
        if !record.mode.readable() {
            return Err(FsError::NotOpenForRead);
        }
        let (first_cluster, offset) = (record.first_cluster, record.offset);

        let size = self.vol.chain_size(first_cluster)?;
        let remaining = size.saturating_sub(offset as u64);
        let to_read = (count as u64).min(remaining) as usize;
        let mut buf = vec![0u8; to_read];
        let got = self.vol.read_chain(first_cluster, offset as u64, &mut buf)?;
        buf.truncate(got);

        let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
        record.offset += got as u32;
        Ok(buf)
    }

    /// Write `data` at the handle's position, growing the chain on demand.
    /// A file that has never been written owns no cluster yet; its first
    /// write claims one and patches the directory entry in place.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<usize> {
        let key = to_fat32_name(name);
        let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
        if !record.mode.writable() {
            return Err(FsError::NotOpenForWrite);
        }
        let (mut first_cluster, offset, entry_offset) =
            (record.first_cluster, record.offset, record.entry_offset);

        if first_cluster == 0 {
            first_cluster = self.vol.alloc_first_cluster(entry_offset)?;
            let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
            record.first_cluster = first_cluster;
        }

        let need = offset as u64 + data.len() as u64;
        self.vol.extend_chain(first_cluster, need)?;
        let written = self.vol.write_chain(first_cluster, offset as u64, data)?;

        let record = self.table.get_mut(&key).ok_or(FsError::NotOpen)?;
        record.offset += written as u32;
        Ok(written)
    }

    /// Delete a file from the current directory.
    pub fn rm(&mut self, name: &str) -> Result<()> {
        let key = to_fat32_name(name);
        if self.table.is_open(&key) {
            return Err(FsError::InUse);
        }
        let slot = self.vol.lookup(self.current_cluster, name)?;
        if slot.entry.is_dir() {
            return Err(FsError::NotAFile);
        }
        self.vol.remove_entry(slot.offset)?;
        self.vol.fat().free_chain(slot.entry.first_cluster())?;
        self.vol.flush()
    }

    /// Delete an empty directory from the current directory.
    pub fn rmdir(&mut self, name: &str) -> Result<()> {
        let slot = self.vol.lookup(self.current_cluster, name)?;
        if !slot.entry.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let cluster = slot.entry.first_cluster();
        if !self.vol.is_dir_empty(cluster)? {
            return Err(FsError::NotEmpty);
        }
        self.vol.remove_entry(slot.offset)?;
        self.vol.fat().free_chain(cluster)?;
        self.vol.flush()
    }

    /// Delete a directory tree from the current directory.
    pub fn rm_tree(&mut self, name: &str) -> Result<()> {
        let slot = self.vol.lookup(self.current_cluster, name)?;
        if !slot.entry.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let cluster = slot.entry.first_cluster();
        self.vol.delete_tree(cluster, &self.table)?;
        self.vol.remove_entry(slot.offset)?;
        self.vol.fat().free_chain(cluster)?;
        self.vol.flush()
    }
}

impl Volume {
    /// Allocate the first cluster of a previously empty file and patch the
    /// `firstClusterHi/Lo` words of its directory entry at `entry_offset`.
    pub(crate) fn alloc_first_cluster(&self, entry_offset: u64) -> Result<u32> {
        let cluster = self.alloc_cluster()?;
        let mut buf = [0u8; crate::DIRENT_SIZE];
        self.device.read_at(entry_offset, &mut buf)?;
        let mut entry = crate::entry::DirEntry::from_bytes(&buf);
        entry.set_first_cluster(cluster);
        self.device.write_at(entry_offset, &entry.to_bytes())?;
        self.device.flush()?;
        Ok(cluster)
    }
}

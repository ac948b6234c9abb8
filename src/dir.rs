//! Directory engine
//!
//! A directory's content is scanned strictly through its cluster chain, 32
//! bytes at a time. A first byte of 0x00 ends the directory (no live entry
//! follows anywhere in the chain); 0xE5 marks a tombstone that a later
//! insert may reuse. All name matching here is byte-wise on the 11-byte
//! on-disk form; display strings never reach a comparison.
//!
//! On-disk layout of a freshly made subdirectory cluster:
//!     "."  entry  (points at the directory itself)
//!     ".." entry  (points at the parent; under the root this stores the
//!                  real root cluster number, and a stored 0 is read back
//!                  as the root)
//!     0x00 end-of-directory sentinel

use log::debug;

use crate::entry::{DirEntry, DOTDOT_NAME};
use crate::fat::ClusterWalker;
use crate::fs::Volume;
use crate::table::OpenFileTable;
use crate::{to_fat32_name, FsError, Result, DIRENT_SIZE, DIR_ENTRY_UNUSED};

/// A live directory record plus the absolute image offset it was read from;
/// the offset is what mutation (tombstoning, first-cluster patching) needs.
#[derive(Debug, Clone, Copy)]
pub struct DirSlot {
    pub entry: DirEntry,
    pub offset: u64,
}

/// Every 32-byte slot of a directory chain in order, end markers and
/// tombstones included; callers apply their own sentinel handling.
struct SlotIter<'a> {
    vol: &'a Volume,
    clusters: ClusterWalker<'a>,
    current: Option<u32>,
    slot: usize,
}

impl Iterator for SlotIter<'_> {
    type Item = Result<DirSlot>;

    fn next(&mut self) -> Option<Self::Item> {
        let slots_per_cluster = self.vol.cluster_bytes() / DIRENT_SIZE;
        let cluster = match self.current {
            Some(c) if self.slot < slots_per_cluster => c,
            _ => match self.clusters.next()? {
                Ok(c) => {
                    self.current = Some(c);
                    self.slot = 0;
                    c
                }
                Err(err) => return Some(Err(err)),
            },
        };
        let offset = self.vol.bpb.offset(cluster) + (self.slot * DIRENT_SIZE) as u64;
        self.slot += 1;
        let mut buf = [0u8; DIRENT_SIZE];
        if let Err(err) = self.vol.device.read_at(offset, &mut buf) {
            return Some(Err(err.into()));
        }
        Some(Ok(DirSlot {
            entry: DirEntry::from_bytes(&buf),
            offset,
        }))
    }
}

impl Volume {
    fn dir_slots(&self, dir_cluster: u32) -> SlotIter<'_> {
        SlotIter {
            vol: self,
            clusters: self.fat.walker(dir_cluster),
            current: None,
            slot: 0,
        }
    }

    /// Live entries of a directory, `.`/`..` included, in slot order.
    pub fn read_dir(&self, dir_cluster: u32) -> Result<Vec<DirSlot>> {
        let mut entries = Vec::new();
        for slot in self.dir_slots(dir_cluster) {
            let slot = slot?;
            if slot.entry.is_end() {
                break;
            }
            if slot.entry.is_deleted() {
                continue;
            }
            entries.push(slot);
        }
        Ok(entries)
    }

    /// Find `name` in `dir_cluster`.
    pub fn lookup(&self, dir_cluster: u32, name: &str) -> Result<DirSlot> {
        self.lookup_raw(dir_cluster, &to_fat32_name(name))
    }

    fn lookup_raw(&self, dir_cluster: u32, key: &[u8; 11]) -> Result<DirSlot> {
        for slot in self.dir_slots(dir_cluster) {
            let slot = slot?;
            if slot.entry.is_end() {
                break;
            }
            if slot.entry.is_deleted() {
                continue;
            }
            if &slot.entry.name == key {
                return Ok(slot);
            }
        }
        Err(FsError::NotFound)
    }

    /// Place `entry` into `dir_cluster`: the first tombstone if one precedes
    /// the end-of-directory marker, else the marker slot, else the first
    /// slot of a freshly linked cluster. The whole chain is checked for a
    /// duplicate name before anything is written.
    pub(crate) fn insert_entry(&self, dir_cluster: u32, entry: &DirEntry) -> Result<u64> {
        let chain: Vec<u32> = self
            .fat
            .walker(dir_cluster)
            .collect::<Result<Vec<u32>>>()?;
        let slots_per_cluster = self.cluster_bytes() / DIRENT_SIZE;

        let mut target: Option<u64> = None;
        'scan: for &cluster in &chain {
            for slot in 0..slots_per_cluster {
                let offset = self.bpb.offset(cluster) + (slot * DIRENT_SIZE) as u64;
                let mut buf = [0u8; DIRENT_SIZE];
                self.device.read_at(offset, &mut buf)?;
                let existing = DirEntry::from_bytes(&buf);
                if existing.is_end() {
                    if target.is_none() {
                        target = Some(offset);
                    }
                    break 'scan;
                }
                if existing.is_deleted() {
                    if target.is_none() {
                        target = Some(offset);
                    }
                    continue;
                }
                if existing.name == entry.name {
                    return Err(FsError::AlreadyExists);
                }
            }
        }

        let offset = match target {
            Some(offset) => offset,
            None => {
                // Chain is packed: grow the directory by one zeroed cluster.
                let new_cluster = self.alloc_cluster()?;
                let last = *chain.last().unwrap_or(&dir_cluster);
                self.fat.write(last, new_cluster)?;
                debug!("directory {dir_cluster} grew with cluster {new_cluster}");
                self.bpb.offset(new_cluster)
            }
        };
        self.device.write_at(offset, &entry.to_bytes())?;
        self.device.flush()?;
        Ok(offset)
    }

    /// Tombstone the 32-byte record at `offset`.
    pub(crate) fn remove_entry(&self, offset: u64) -> Result<()> {
        let mut buf = [0u8; DIRENT_SIZE];
        self.device.read_at(offset, &mut buf)?;
        buf[0] = DIR_ENTRY_UNUSED;
        self.device.write_at(offset, &buf)?;
        self.device.flush()?;
        Ok(())
    }

    /// Create an empty file entry. No cluster is allocated until the first
    /// write grows it.
    pub fn create_file(&self, dir_cluster: u32, name: &str) -> Result<()> {
        self.insert_entry(dir_cluster, &DirEntry::new_file(to_fat32_name(name)))?;
        Ok(())
    }

    /// Create a subdirectory: one terminated, zeroed cluster seeded with
    /// `.` and `..` and an end-of-directory sentinel.
    pub fn create_dir(&self, dir_cluster: u32, name: &str) -> Result<()> {
        // Check the name first so a collision does not leak the cluster.
        match self.lookup(dir_cluster, name) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let new_cluster = self.alloc_cluster()?;
        self.insert_entry(
            dir_cluster,
            &DirEntry::new_dir(to_fat32_name(name), new_cluster),
        )?;

        let base = self.bpb.offset(new_cluster);
        self.device
            .write_at(base, &DirEntry::dot(new_cluster).to_bytes())?;
        self.device.write_at(
            base + DIRENT_SIZE as u64,
            &DirEntry::dotdot(dir_cluster).to_bytes(),
        )?;
        self.device
            .write_at(base + 2 * DIRENT_SIZE as u64, &[0u8; DIRENT_SIZE])?;
        self.device.flush()?;
        Ok(())
    }

    /// True when the directory holds no live entry besides `.` and `..`.
    pub fn is_dir_empty(&self, dir_cluster: u32) -> Result<bool> {
        for slot in self.dir_slots(dir_cluster) {
            let slot = slot?;
            if slot.entry.is_end() {
                break;
            }
            if slot.entry.is_deleted() || slot.entry.is_dot() {
                continue;
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Recursively delete everything inside `dir_cluster` (not the
    /// directory itself). Each removed entry is tombstoned in the directory
    /// that contains it. Hitting a file with a live handle aborts with
    /// `InUse`; entries already removed stay removed.
    pub fn delete_tree(&self, dir_cluster: u32, table: &OpenFileTable) -> Result<()> {
        for slot in self.dir_slots(dir_cluster) {
            let slot = slot?;
            if slot.entry.is_end() {
                break;
            }
            if slot.entry.is_deleted() || slot.entry.is_dot() {
                continue;
            }
            if slot.entry.is_dir() {
                self.delete_tree(slot.entry.first_cluster(), table)?;
            } else if table.is_open(&slot.entry.name) {
                return Err(FsError::InUse);
            }
            self.remove_entry(slot.offset)?;
            self.fat.free_chain(slot.entry.first_cluster())?;
        }
        Ok(())
    }

    /// Resolve `cd` against `current_cluster`, returning the new current
    /// cluster. `..` walks the stored parent pointer (0 reads as root, and
    /// the root is its own parent).
    pub fn change_dir(&self, current_cluster: u32, name: &str) -> Result<u32> {
        let root = self.root_cluster();
        if name == ".." {
            if current_cluster == root {
                return Ok(root);
            }
            let slot = self.lookup_raw(current_cluster, &DOTDOT_NAME)?;
            let parent = slot.entry.first_cluster();
            return Ok(if parent == 0 { root } else { parent });
        }
        let slot = self.lookup(current_cluster, name)?;
        if slot.entry.is_dir() {
            Ok(slot.entry.first_cluster())
        } else {
            Err(FsError::NotADirectory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ImageDevice, MemDevice};
    use crate::fs::FormatParams;
    use std::sync::Arc;

    fn formatted() -> Volume {
        let device: Arc<dyn ImageDevice> = Arc::new(MemDevice::new(10 * 1024 * 1024));
        Volume::format(&device, FormatParams::default()).unwrap();
        Volume::mount(device).unwrap()
    }

    #[test]
    fn create_and_lookup_file() {
        let vol = formatted();
        let root = vol.root_cluster();
        vol.create_file(root, "a.txt").unwrap();
        let slot = vol.lookup(root, "a.txt").unwrap();
        assert!(slot.entry.is_file());
        assert_eq!(slot.entry.first_cluster(), 0);
        assert!(matches!(vol.lookup(root, "b.txt"), Err(FsError::NotFound)));
    }

    #[test]
    fn insert_rejects_duplicates_and_reuses_tombstones() {
        let vol = formatted();
        let root = vol.root_cluster();
        vol.create_file(root, "one").unwrap();
        vol.create_file(root, "two").unwrap();
        assert!(matches!(
            vol.create_file(root, "ONE"),
            Err(FsError::AlreadyExists)
        ));

        let first = vol.lookup(root, "one").unwrap();
        vol.remove_entry(first.offset).unwrap();
        vol.create_file(root, "three").unwrap();
        let third = vol.lookup(root, "three").unwrap();
        assert_eq!(third.offset, first.offset, "tombstone slot must be reused");
    }

    #[test]
    fn packed_directory_grows_by_one_cluster() {
        let vol = formatted();
        let root = vol.root_cluster();
        let slots = vol.cluster_bytes() / DIRENT_SIZE;
        for i in 0..slots {
            vol.create_file(root, &format!("F{i}")).unwrap();
        }
        assert_eq!(vol.fat().chain_len(root).unwrap(), 1);
        vol.create_file(root, "SPILL").unwrap();
        assert_eq!(vol.fat().chain_len(root).unwrap(), 2);
        assert!(vol.lookup(root, "SPILL").is_ok());
        // The appended cluster was zeroed, so the directory still ends.
        assert_eq!(vol.read_dir(root).unwrap().len(), slots + 1);
    }

    #[test]
    fn mkdir_seeds_dot_entries() {
        let vol = formatted();
        let root = vol.root_cluster();
        vol.create_dir(root, "SUB").unwrap();
        let sub = vol.lookup(root, "SUB").unwrap();
        assert!(sub.entry.is_dir());
        let sub_cluster = sub.entry.first_cluster();

        let entries = vol.read_dir(sub_cluster).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry.first_cluster(), sub_cluster);
        // The parent pointer under the root stores the real root cluster.
        assert_eq!(entries[1].entry.first_cluster(), root);
        assert!(vol.is_dir_empty(sub_cluster).unwrap());
    }

    #[test]
    fn change_dir_walks_down_and_back_up() {
        let vol = formatted();
        let root = vol.root_cluster();
        vol.create_dir(root, "D").unwrap();
        vol.create_file(root, "F").unwrap();

        let d = vol.change_dir(root, "D").unwrap();
        assert_ne!(d, root);
        assert_eq!(vol.change_dir(d, "..").unwrap(), root);
        assert_eq!(vol.change_dir(root, "..").unwrap(), root);
        assert!(matches!(
            vol.change_dir(root, "F"),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(
            vol.change_dir(root, "NOPE"),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn delete_tree_clears_nested_content() {
        let vol = formatted();
        let root = vol.root_cluster();
        vol.create_dir(root, "TOP").unwrap();
        let top = vol.lookup(root, "TOP").unwrap().entry.first_cluster();
        vol.create_file(top, "LEAF").unwrap();
        vol.create_dir(top, "MID").unwrap();
        let mid = vol.lookup(top, "MID").unwrap().entry.first_cluster();
        vol.create_file(mid, "DEEP").unwrap();

        let table = OpenFileTable::new();
        vol.delete_tree(top, &table).unwrap();
        assert!(vol.is_dir_empty(top).unwrap());
        // MID's cluster went back to the free pool.
        assert_eq!(vol.fat().read(mid).unwrap(), crate::FREE_CLUSTER);
    }
}

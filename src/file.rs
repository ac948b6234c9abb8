//! File I/O engine
//!
//! Positioned reads and writes across a file's cluster chain. The on-disk
//! `fileSize` field is not trusted or maintained; a file's effective size is
//! its chain length times the cluster size, so sizes are always a whole
//! number of clusters and an empty file (first cluster 0) is size 0. Bytes
//! between the last write and the end of the final cluster are
//! indeterminate to readers.

use log::debug;

use crate::fs::Volume;
use crate::Result;

impl Volume {
    /// Effective size of the chain starting at `first_cluster`.
    pub fn chain_size(&self, first_cluster: u32) -> Result<u64> {
        if first_cluster == 0 {
            return Ok(0);
        }
        Ok(self.fat.chain_len(first_cluster)? as u64 * self.cluster_bytes() as u64)
    }

    /// Read up to `buf.len()` bytes starting `offset` bytes into the chain.
    /// Returns the bytes actually delivered, which falls short only when the
    /// chain ends first. Callers bound `buf` by the computed size.
    pub fn read_chain(&self, first_cluster: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if first_cluster == 0 || buf.is_empty() {
            return Ok(0);
        }
        let cluster_bytes = self.cluster_bytes() as u64;
        let skip = (offset / cluster_bytes) as usize;
        let mut pos = offset % cluster_bytes;
        let mut done = 0usize;

        for cluster in self.fat.walker(first_cluster).skip(skip) {
            let cluster = cluster?;
            let len = ((cluster_bytes - pos) as usize).min(buf.len() - done);
            self.device
                .read_at(self.bpb.offset(cluster) + pos, &mut buf[done..done + len])?;
            done += len;
            pos = 0;
            if done == buf.len() {
                break;
            }
        }
        Ok(done)
    }

    /// Write `data` starting `offset` bytes into the chain. The chain must
    /// already cover `offset + data.len()` (see [`Volume::extend_chain`]).
    pub fn write_chain(&self, first_cluster: u32, offset: u64, data: &[u8]) -> Result<usize> {
        if first_cluster == 0 || data.is_empty() {
            return Ok(0);
        }
        let cluster_bytes = self.cluster_bytes() as u64;
        let skip = (offset / cluster_bytes) as usize;
        let mut pos = offset % cluster_bytes;
        let mut done = 0usize;

        for cluster in self.fat.walker(first_cluster).skip(skip) {
            let cluster = cluster?;
            let len = ((cluster_bytes - pos) as usize).min(data.len() - done);
            self.device
                .write_at(self.bpb.offset(cluster) + pos, &data[done..done + len])?;
            done += len;
            pos = 0;
            if done == data.len() {
                break;
            }
        }
        self.device.flush()?;
        Ok(done)
    }

    /// Grow the chain until it covers `need` bytes. Clusters are linked
    /// eagerly, so running out of space mid-extension leaves the links made
    /// so far in place (`NoSpace` is returned and the file keeps the larger
    /// chain).
    pub fn extend_chain(&self, first_cluster: u32, need: u64) -> Result<()> {
        debug_assert!(first_cluster >= 2, "extending a file with no chain");
        let cluster_bytes = self.cluster_bytes() as u64;
        let mut size = self.chain_size(first_cluster)?;
        if size >= need {
            return Ok(());
        }
        let mut tail = self.fat.tail(first_cluster)?;
        while size < need {
            let new_cluster = self.alloc_cluster()?;
            self.fat.write(tail, new_cluster)?;
            tail = new_cluster;
            size += cluster_bytes;
        }
        debug!("chain {first_cluster} extended to {size} bytes");
        self.device.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ImageDevice, MemDevice};
    use crate::fs::{FormatParams, Volume};
    use crate::FsError;
    use std::sync::Arc;

    fn formatted() -> Volume {
        let device: Arc<dyn ImageDevice> = Arc::new(MemDevice::new(10 * 1024 * 1024));
        Volume::format(&device, FormatParams::default()).unwrap();
        Volume::mount(device).unwrap()
    }

    #[test]
    fn empty_file_reports_zero_size() {
        let vol = formatted();
        assert_eq!(vol.chain_size(0).unwrap(), 0);
    }

    #[test]
    fn write_then_read_across_cluster_boundaries() {
        let vol = formatted();
        let first = vol.alloc_cluster().unwrap();
        // Three 512-byte clusters worth of patterned data.
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        vol.extend_chain(first, data.len() as u64).unwrap();
        assert_eq!(vol.chain_size(first).unwrap(), 1536);
        assert_eq!(vol.write_chain(first, 0, &data).unwrap(), data.len());

        let mut back = vec![0u8; data.len()];
        assert_eq!(vol.read_chain(first, 0, &mut back).unwrap(), data.len());
        assert_eq!(back, data);

        // A mid-chain positioned read lands on the right bytes.
        let mut mid = [0u8; 100];
        vol.read_chain(first, 700, &mut mid).unwrap();
        assert_eq!(&mid[..], &data[700..800]);
    }

    #[test]
    fn positioned_write_leaves_neighbors_alone() {
        let vol = formatted();
        let first = vol.alloc_cluster().unwrap();
        vol.extend_chain(first, 1024).unwrap();
        vol.write_chain(first, 0, &[b'a'; 1024]).unwrap();
        vol.write_chain(first, 510, b"XYZW").unwrap();

        let mut back = vec![0u8; 1024];
        vol.read_chain(first, 0, &mut back).unwrap();
        assert_eq!(&back[508..516], b"aaXYZWaa");
        assert!(back[..508].iter().all(|&b| b == b'a'));
    }

    #[test]
    fn read_stops_at_end_of_chain() {
        let vol = formatted();
        let first = vol.alloc_cluster().unwrap();
        let mut buf = vec![0u8; 2048];
        assert_eq!(vol.read_chain(first, 0, &mut buf).unwrap(), 512);
    }

    #[test]
    fn extension_failure_reports_no_space() {
        let vol = formatted();
        let first = vol.alloc_cluster().unwrap();
        // Exhaust the FAT behind the allocator's back.
        for c in 2..vol.fat().entry_cnt() {
            if vol.fat().read(c).unwrap() == crate::FREE_CLUSTER {
                vol.fat().write(c, crate::END_OF_CLUSTER).unwrap();
            }
        }
        assert!(matches!(
            vol.extend_chain(first, 4096),
            Err(FsError::NoSpace)
        ));
    }
}

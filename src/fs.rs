//! Volume: a mounted FAT32 image.
//!
//! `mount` reads and validates the boot sector once; the parsed geometry is
//! immutable for the life of the volume. `format` lays down a blank FAT32
//! image (boot sector, zeroed FATs, empty root directory) so tests and new
//! images have something to mount. FSInfo content and the backup boot
//! region are not produced; the running driver maintains the primary FAT
//! only.

use std::sync::Arc;

use log::debug;

use crate::bpb::BootSector;
use crate::device::ImageDevice;
use crate::fat::FatTable;
use crate::{Result, BLOCK_SIZE, END_OF_CLUSTER};

pub struct Volume {
    pub(crate) device: Arc<dyn ImageDevice>,
    pub(crate) bpb: BootSector,
    pub(crate) fat: FatTable,
}

/// Geometry figures reported by the `info` command.
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub root_cluster: u32,
    pub data_clusters: u32,
    pub fat_entries: u32,
    pub image_bytes: u64,
}

/// Shape of a volume produced by [`Volume::format`].
#[derive(Debug, Clone, Copy)]
pub struct FormatParams {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u32,
}

impl Default for FormatParams {
    fn default() -> Self {
        // 10 MiB, one sector per cluster.
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            total_sectors: 20480,
        }
    }
}

const RESERVED_SECTORS: u16 = 32;
const NUM_FATS: u8 = 2;
const ROOT_CLUSTER: u32 = 2;

impl Volume {
    /// Mount an already formatted image.
    pub fn mount(device: Arc<dyn ImageDevice>) -> Result<Volume> {
        let mut sector = [0u8; BLOCK_SIZE];
        device.read_at(0, &mut sector)?;
        let bpb = BootSector::parse(&sector)?;
        let fat = FatTable::new(Arc::clone(&device), &bpb);
        debug!(
            "mounted: {} bytes/sector, {} sectors/cluster, root cluster {}",
            bpb.bytes_per_sector(),
            bpb.sectors_per_cluster(),
            bpb.root_cluster()
        );
        Ok(Volume { device, bpb, fat })
    }

    /// Write a blank FAT32 layout onto `device`. The device must already be
    /// at least `total_sectors * bytes_per_sector` large.
    pub fn format(device: &Arc<dyn ImageDevice>, params: FormatParams) -> Result<()> {
        let bps = params.bytes_per_sector as u32;
        let spc = params.sectors_per_cluster as u32;

        // Size one FAT so its entries roughly cover the data region: first
        // assume every non-reserved sector is data, then refine once with
        // the resulting FAT subtracted out.
        let entries_per_sector = bps / 4;
        let guess_clusters = (params.total_sectors - RESERVED_SECTORS as u32) / spc + 2;
        let fat_sz = (guess_clusters + entries_per_sector - 1) / entries_per_sector;
        let data_sectors = params.total_sectors - RESERVED_SECTORS as u32 - NUM_FATS as u32 * fat_sz;
        let fat_sz = (data_sectors / spc + 2 + entries_per_sector - 1) / entries_per_sector;

        let mut sector = [0u8; BLOCK_SIZE];
        sector[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        sector[3..11].copy_from_slice(b"FAT32SH ");
        sector[11..13].copy_from_slice(&params.bytes_per_sector.to_le_bytes());
        sector[13] = params.sectors_per_cluster;
        sector[14..16].copy_from_slice(&RESERVED_SECTORS.to_le_bytes());
        sector[16] = NUM_FATS;
        sector[21] = 0xF8; // media: fixed disk
        sector[32..36].copy_from_slice(&params.total_sectors.to_le_bytes());
        sector[36..40].copy_from_slice(&fat_sz.to_le_bytes());
        sector[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
        sector[48..50].copy_from_slice(&1u16.to_le_bytes()); // FSInfo sector number
        sector[50..52].copy_from_slice(&6u16.to_le_bytes()); // backup boot sector
        sector[64] = 0x80; // drive number
        sector[66] = 0x29; // extended boot signature
        sector[67..71].copy_from_slice(&0x2023_0F32u32.to_le_bytes()); // volume id
        sector[71..82].copy_from_slice(b"NO NAME    ");
        sector[82..90].copy_from_slice(b"FAT32   ");
        sector[510] = 0x55;
        sector[511] = 0xAA;
        device.write_at(0, &sector)?;

        // Zero both FATs, then the reserved entries and the root chain.
        let zeros = [0u8; BLOCK_SIZE];
        let fat_start = RESERVED_SECTORS as u64 * bps as u64;
        let fat_bytes = fat_sz as u64 * bps as u64;
        let mut offset = fat_start;
        let fat_end = fat_start + NUM_FATS as u64 * fat_bytes;
        while offset < fat_end {
            let len = (BLOCK_SIZE as u64).min(fat_end - offset) as usize;
            device.write_at(offset, &zeros[..len])?;
            offset += len as u64;
        }
        // FAT[0] holds the media byte, FAT[1] an EOC mark, and the root
        // directory is a single terminated cluster.
        device.write_at(fat_start, &0x0FFF_FFF8u32.to_le_bytes())?;
        device.write_at(fat_start + 4, &END_OF_CLUSTER.to_le_bytes())?;
        device.write_at(
            fat_start + 4 * ROOT_CLUSTER as u64,
            &END_OF_CLUSTER.to_le_bytes(),
        )?;

        // Zero the root directory cluster.
        let root_offset =
            (RESERVED_SECTORS as u64 + NUM_FATS as u64 * fat_sz as u64) * bps as u64;
        let cluster_bytes = (bps * spc) as u64;
        let mut offset = root_offset;
        while offset < root_offset + cluster_bytes {
            let len = (BLOCK_SIZE as u64).min(root_offset + cluster_bytes - offset) as usize;
            device.write_at(offset, &zeros[..len])?;
            offset += len as u64;
        }

        device.flush()?;
        Ok(())
    }

    pub fn bpb(&self) -> &BootSector {
        &self.bpb
    }

    pub fn fat(&self) -> &FatTable {
        &self.fat
    }

    pub fn root_cluster(&self) -> u32 {
        self.bpb.root_cluster()
    }

    pub fn cluster_bytes(&self) -> usize {
        self.bpb.cluster_bytes()
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            bytes_per_sector: self.bpb.byts_per_sec,
            sectors_per_cluster: self.bpb.sec_per_clus,
            root_cluster: self.bpb.root_cluster(),
            data_clusters: self.bpb.data_cluster_cnt(),
            fat_entries: self.bpb.fat_entry_cnt(),
            image_bytes: self.bpb.total_bytes(),
        }
    }

    /// Free clusters left in the FAT.
    pub fn free_cluster_cnt(&self) -> Result<u32> {
        let mut free = 0;
        for cluster in 2..self.fat.entry_cnt() {
            if self.fat.read(cluster)? == crate::FREE_CLUSTER {
                free += 1;
            }
        }
        Ok(free)
    }

    /// Claim one free cluster: EOC-terminated and zero-filled, so a
    /// directory appended onto it keeps its end-of-directory invariant.
    pub(crate) fn alloc_cluster(&self) -> Result<u32> {
        let cluster = self.fat.find_free()?;
        self.fat.terminate(cluster)?;
        self.zero_cluster(cluster)?;
        debug!("allocated cluster {cluster}");
        Ok(cluster)
    }

    pub(crate) fn zero_cluster(&self, cluster: u32) -> Result<()> {
        let zeros = [0u8; BLOCK_SIZE];
        let start = self.bpb.offset(cluster);
        let end = start + self.cluster_bytes() as u64;
        let mut offset = start;
        while offset < end {
            let len = (BLOCK_SIZE as u64).min(end - offset) as usize;
            self.device.write_at(offset, &zeros[..len])?;
            offset += len as u64;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.device.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    fn formatted() -> Volume {
        let device: Arc<dyn ImageDevice> = Arc::new(MemDevice::new(10 * 1024 * 1024));
        Volume::format(&device, FormatParams::default()).unwrap();
        Volume::mount(device).unwrap()
    }

    #[test]
    fn format_then_mount_reports_geometry() {
        let vol = formatted();
        let info = vol.info();
        assert_eq!(info.bytes_per_sector, 512);
        assert_eq!(info.sectors_per_cluster, 1);
        assert_eq!(info.root_cluster, 2);
        assert_eq!(info.image_bytes, 10 * 1024 * 1024);
        assert_eq!(info.fat_entries, vol.fat().entry_cnt());
    }

    #[test]
    fn fresh_volume_has_terminated_root_and_free_data_region() {
        let vol = formatted();
        assert_eq!(vol.fat().next_cluster(2).unwrap(), None);
        assert_eq!(vol.fat().find_free().unwrap(), 3);
    }

    #[test]
    fn alloc_cluster_terminates_and_zeroes() {
        let vol = formatted();
        let c = vol.alloc_cluster().unwrap();
        assert_eq!(vol.fat().next_cluster(c).unwrap(), None);
        let mut buf = vec![0xFFu8; vol.cluster_bytes()];
        vol.device.read_at(vol.bpb().offset(c), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}

//! Interactive driver for a FAT32 volume stored in a regular image file.
//!
//! FAT File System Layout:
//!     Boot Sector - Reserved Sectors - FAT1 - FAT2 - Data Region
//! Note:
//!     1. The reserved sectors include the boot sector, and the boot sector
//!        holds the BPB.
//!     2. fat1_offset = reserved_sector_count * bytes_per_sector
//!     3. For FAT32 the root directory has no fixed region; it is an ordinary
//!        cluster chain whose first cluster is recorded in BPB_RootClus.
//!
//! A FAT32 FAT entry is actually only a 28-bit entry. The high 4 bits are
//! reserved and must be masked off when an entry is read. Cluster numbers 0
//! and 1 are reserved; the first data cluster is cluster 2.
//!
//! The engine is split by on-disk concern: [`bpb`] parses the boot-sector
//! view, [`fat`] owns the allocation table, [`entry`] encodes 32-byte
//! directory records, [`dir`] and [`file`] walk cluster chains for directory
//! and byte I/O, [`table`] tracks open handles, and [`session`] exposes the
//! command surface the shell drives. All state is threaded through explicit
//! values; the crate holds no globals.

pub mod bpb;
pub mod device;
pub mod dir;
pub mod entry;
pub mod fat;
pub mod file;
pub mod fs;
pub mod session;
pub mod table;

use core::fmt;

use crate::device::DeviceError;

pub const FREE_CLUSTER: u32 = 0x0000_0000;
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
/// Any FAT value at or above this marks the end of a cluster chain.
pub const END_CLUSTER: u32 = 0x0FFF_FFF8;
/// The EOC value this driver writes when it terminates a chain.
pub const END_OF_CLUSTER: u32 = 0x0FFF_FFFF;
/// Only the low 28 bits of a FAT32 entry are meaningful.
pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

pub const DIRENT_SIZE: usize = 32;

/// For Directory Entry Name[0]
///
/// Deleted (free for reuse)
pub const DIR_ENTRY_UNUSED: u8 = 0xE5;
/// For Directory Entry Name[0]
///
/// Free, and no allocated entries follow it in this directory
pub const DIR_ENTRY_LAST_AND_UNUSED: u8 = 0x00;

// Characters
pub const SPACE: u8 = 0x20;
pub const DOT: u8 = 0x2E;

/// Granularity of the sector cache inside the file-backed device.
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_CACHE_LIMIT: usize = 64;

pub type Result<T> = core::result::Result<T, FsError>;

/// Error kinds surfaced by the engine. Every operation either completes or
/// returns one of these; none of them tears down the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    NotAFile,
    AlreadyExists,
    NotEmpty,
    InUse,
    BadMode,
    NotOpen,
    NotOpenForRead,
    NotOpenForWrite,
    TooMany,
    OffsetTooLarge,
    NoSpace,
    BadVolume,
    Io(DeviceError),
}

impl From<DeviceError> for FsError {
    fn from(err: DeviceError) -> Self {
        FsError::Io(err)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::NotADirectory => write!(f, "not a directory"),
            FsError::NotAFile => write!(f, "not a file"),
            FsError::AlreadyExists => {
                write!(f, "a file or directory with that name already exists")
            }
            FsError::NotEmpty => write!(f, "directory is not empty"),
            FsError::InUse => write!(f, "file is currently open"),
            FsError::BadMode => write!(f, "invalid mode"),
            FsError::NotOpen => write!(f, "file is not open"),
            FsError::NotOpenForRead => write!(f, "file is not opened for read"),
            FsError::NotOpenForWrite => write!(f, "file is not opened for writing"),
            FsError::TooMany => write!(f, "max open files limit reached"),
            FsError::OffsetTooLarge => write!(f, "offset is larger than the file"),
            FsError::NoSpace => write!(f, "no free clusters available"),
            FsError::BadVolume => write!(f, "not a valid FAT32 volume"),
            FsError::Io(err) => write!(f, "image device error: {err}"),
        }
    }
}

impl std::error::Error for FsError {}

pub(crate) fn read_le_u16(input: &[u8]) -> u16 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u16>());
    u16::from_le_bytes(int_bytes.try_into().unwrap())
}

pub(crate) fn read_le_u32(input: &[u8]) -> u32 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u32>());
    u32::from_le_bytes(int_bytes.try_into().unwrap())
}

/// Convert a user string to the on-disk 11-byte 8.3 form.
///
/// Uppercased, split on the first `.`; up to 8 base and 3 extension bytes,
/// space padded, anything longer silently truncated. A name with no dot gets
/// a blank extension.
pub fn to_fat32_name(input: &str) -> [u8; 11] {
    let mut name = [SPACE; 11];
    let bytes = input.as_bytes();

    let mut i = 0;
    let mut j = 0;
    while i < bytes.len() && bytes[i] != DOT && j < 8 {
        name[j] = bytes[i].to_ascii_uppercase();
        i += 1;
        j += 1;
    }
    // Skip the rest of an over-long base up to the dot.
    while i < bytes.len() && bytes[i] != DOT {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == DOT {
        i += 1;
        j = 8;
        while i < bytes.len() && j < 11 {
            name[j] = bytes[i].to_ascii_uppercase();
            i += 1;
            j += 1;
        }
    }
    name
}

/// Render an 11-byte on-disk name for display: base up to the first space,
/// then `.` and the extension when one is present. Engine code never
/// compares these strings; comparisons stay on the 11-byte form.
pub fn format_dir_name(name: &[u8; 11]) -> String {
    let mut formatted = String::with_capacity(12);
    for &b in name[..8].iter() {
        if b == SPACE {
            break;
        }
        formatted.push(b.to_ascii_uppercase() as char);
    }
    if name[8] != SPACE {
        formatted.push('.');
        for &b in name[8..].iter() {
            if b == SPACE {
                break;
            }
            formatted.push(b.to_ascii_uppercase() as char);
        }
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_conversion_pads_and_uppercases() {
        assert_eq!(&to_fat32_name("a.txt"), b"A       TXT");
        assert_eq!(&to_fat32_name("FOO"), b"FOO        ");
        assert_eq!(&to_fat32_name("longfilename.text"), b"LONGFILETEX");
        assert_eq!(&to_fat32_name(""), b"           ");
    }

    #[test]
    fn format_name_round_trip() {
        assert_eq!(format_dir_name(b"A       TXT"), "A.TXT");
        assert_eq!(format_dir_name(b"FOO        "), "FOO");
        assert_eq!(format_dir_name(b"B          "), "B");
    }

    /// Contract: conversion is idempotent for names whose base/extension
    /// already fit 8.3.
    #[test]
    fn conversion_idempotent_for_short_names() {
        for s in ["a.txt", "FOO", "readme.md", "x", "EIGHTCHR.EXT"] {
            let once = to_fat32_name(s);
            let again = to_fat32_name(&format_dir_name(&once));
            assert_eq!(once, again, "not idempotent for {s:?}");
        }
    }
}

//! Convert Windows LDM "dynamic disks" into plain basic partitions.
//!
//! A dynamic disk keeps its real layout in the LDM database instead of the
//! partition table; this crate reads that database and rewrites the
//! surrounding GPT or MBR so every simple or spanned sub-partition becomes a
//! directly mountable basic partition at the same byte offsets. The LDM
//! metadata itself is never modified.
//!
//! ```no_run
//! use ldm2basic::disk::{BlockIo, DEFAULT_SECTOR_SIZE};
//! use ldm2basic::mbr::{DiskScheme, Mbr};
//!
//! fn convert() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = std::fs::OpenOptions::new()
//!         .read(true)
//!         .write(true)
//!         .open("/dev/sdz")?;
//!     let mut io = BlockIo::new(file, DEFAULT_SECTOR_SIZE);
//!
//!     let mut boot = Mbr::read_from(&mut io)?;
//!     match boot.scheme()? {
//!         DiskScheme::Gpt => {
//!             let mut scan = ldm2basic::scan_gpt(&mut io)?;
//!             ldm2basic::rewrite::rewrite_gpt(&mut io, &mut scan.entries, &scan.ranges)?;
//!         }
//!         DiskScheme::LdmMbr => {
//!             let ranges = ldm2basic::scan_mbr(&mut io)?;
//!             ldm2basic::rewrite::rewrite_mbr(&mut io, &mut boot, &ranges)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

use std::io::{Read, Seek, Write};
use std::{fmt, io};

#[macro_use]
mod macros;
#[macro_use]
mod logging;
pub mod disk;
pub mod header;
pub mod ldm;
pub mod mbr;
pub mod partition_types;
pub mod rewrite;

use disk::{BlockIo, DeviceError};
use header::HeaderError;
use ldm::resolve::PartitionRange;
use ldm::LdmError;
use mbr::MbrError;
use rewrite::RewriteError;

/// A generic device that partition tables can be read from and written to.
pub trait DiskDevice: Read + Write + Seek + std::fmt::Debug {}
/// Implement the DiskDevice trait for anything that meets the
/// requirements, e.g., `std::fs::File`
impl<T> DiskDevice for T where T: Read + Write + Seek + std::fmt::Debug {}

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned when converting a disk.
pub enum Error {
    /// Generic IO Error
    Io(io::Error),
    /// Positioned device access failed.
    Device(DeviceError),
    /// GPT header or entry array error.
    Header(HeaderError),
    /// MBR error.
    Mbr(MbrError),
    /// LDM metadata error.
    Ldm(LdmError),
    /// Partition table rewrite error.
    Rewrite(RewriteError),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<HeaderError> for Error {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<MbrError> for Error {
    fn from(e: MbrError) -> Self {
        Self::Mbr(e)
    }
}

impl From<LdmError> for Error {
    fn from(e: LdmError) -> Self {
        Self::Ldm(e)
    }
}

impl From<RewriteError> for Error {
    fn from(e: RewriteError) -> Self {
        Self::Rewrite(e)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            Io(e) => write!(fmt, "IO error: {e}"),
            Device(e) => write!(fmt, "{e}"),
            Header(e) => write!(fmt, "{e}"),
            Mbr(e) => write!(fmt, "{e}"),
            Ldm(e) => write!(fmt, "{e}"),
            Rewrite(e) => write!(fmt, "{e}"),
        }
    }
}

/// Everything learned from scanning a GPT-schemed dynamic disk.
#[derive(Debug)]
pub struct GptScan {
    /// The header the entry array was loaded with.
    pub header: header::Header,
    /// The decoded entry array, the rewriter's working copy.
    pub entries: Vec<header::Entry>,
    /// The resolved basic partition ranges, in LDM stream order.
    pub ranges: Vec<PartitionRange>,
}

/// Scan a GPT disk for LDM metadata and resolve its partitions.
///
/// Every entry of LDM-metadata type roots one database read at that entry's
/// last LBA. A disk without any such entry (for example one this tool
/// already converted) yields an empty range list.
pub fn scan_gpt<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<GptScan, Error> {
    let header = header::read_any(io)?;
    let entries = header::read_entries(io, &header)?;

    let mut ranges = Vec::new();
    for entry in &entries {
        if entry.type_guid != partition_types::LDM_METADATA.guid {
            continue;
        }
        debug!("LDM metadata entry, PRIVHEAD expected at LBA {}", entry.last_lba);
        let (head, db) = ldm::read_ldm(io, entry.last_lba)?;
        ranges.extend(ldm::resolve::resolve(&db, &head.disk_guid, head.logical_disk_start)?);
    }

    Ok(GptScan {
        header,
        entries,
        ranges,
    })
}

/// Scan an MBR-schemed dynamic disk and resolve its partitions.
///
/// The PRIVHEAD of an MBR dynamic disk sits at the fixed sector 6.
pub fn scan_mbr<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<Vec<PartitionRange>, Error> {
    let (head, db) = ldm::read_ldm(io, ldm::MBR_PRIVHEAD_LBA)?;
    let ranges = ldm::resolve::resolve(&db, &head.disk_guid, head.logical_disk_start)?;
    Ok(ranges)
}

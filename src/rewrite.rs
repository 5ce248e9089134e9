//! Patch the on-disk partition tables with the resolved basic partitions.
//!
//! The complete new state is assembled in memory and only written once every
//! check has passed. On the GPT path the backup copies go out before the
//! primary ones, so an interrupted run still leaves a valid primary table.

use std::fmt;

use uuid::Uuid;

use crate::disk::{BlockIo, DeviceError};
use crate::header::{self, Entry, HeaderError};
use crate::ldm::resolve::PartitionRange;
use crate::mbr::{self, Mbr, MbrError, PartRecord};
use crate::partition_types;
use crate::DiskDevice;

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned while rewriting a partition table.
pub enum RewriteError {
    /// Positioned device access failed.
    Device(DeviceError),
    /// GPT header or entry array error.
    Header(HeaderError),
    /// MBR error.
    Mbr(MbrError),
    /// Primary and backup GPT copies do not describe the same table.
    HeadersDisagree,
    /// No unused GPT entry slot is left for a converted partition.
    NoFreeSlot,
    /// More ranges than an MBR can hold.
    TooManyPartitions(usize),
    /// A range does not fit the 32-bit LBA fields of an MBR record.
    LbaOutOfRange(u64),
}

impl From<DeviceError> for RewriteError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<HeaderError> for RewriteError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<MbrError> for RewriteError {
    fn from(e: MbrError) -> Self {
        Self::Mbr(e)
    }
}

impl std::error::Error for RewriteError {}

impl fmt::Display for RewriteError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RewriteError::*;
        match self {
            Device(e) => write!(fmt, "rewrite device error: {e}"),
            Header(e) => write!(fmt, "rewrite header error: {e}"),
            Mbr(e) => write!(fmt, "rewrite MBR error: {e}"),
            HeadersDisagree => write!(fmt, "primary and backup GPT headers do not match"),
            NoFreeSlot => write!(fmt, "no free GPT entry slot left"),
            TooManyPartitions(count) => {
                write!(fmt, "found {count} partitions, exceeds 4 partitions")
            }
            LbaOutOfRange(lba) => write!(fmt, "LBA {lba} does not fit an MBR record"),
        }
    }
}

/// Replace the LDM-typed GPT entries with basic-data entries at `ranges`.
///
/// `entries` is the working array the scan decoded; LDM-typed slots are
/// zeroed and every range fills the first unused slot with a fresh v4 GUID.
/// Both on-disk copies are rewritten with a recomputed entry-array CRC.
pub fn rewrite_gpt<D: DiskDevice>(
    io: &mut BlockIo<D>,
    entries: &mut [Entry],
    ranges: &[PartitionRange],
) -> Result<(), RewriteError> {
    if ranges.is_empty() {
        debug!("no ranges resolved, leaving the GPT untouched");
        return Ok(());
    }

    let mut primary = header::read_primary(io)?;
    let mut backup = header::read_backup(io)?;
    if primary.crc32_parts != backup.crc32_parts
        || primary.backup_lba != backup.current_lba
        || primary.current_lba != backup.backup_lba
        || primary.num_parts != backup.num_parts
        || primary.part_size != backup.part_size
    {
        return Err(RewriteError::HeadersDisagree);
    }

    for entry in entries.iter_mut() {
        if entry.is_ldm() {
            debug!("clearing LDM entry {} .. {}", entry.first_lba, entry.last_lba);
            *entry = Entry::ZERO;
        }
    }

    for range in ranges {
        let slot = entries
            .iter_mut()
            .find(|entry| entry.is_unused())
            .ok_or(RewriteError::NoFreeSlot)?;
        *slot = Entry {
            type_guid: partition_types::BASIC_DATA.guid,
            unique_guid: Uuid::new_v4(),
            first_lba: range.start,
            last_lba: range.start + range.size - 1,
            flags: 0,
            name: [0u8; 72],
        };
    }

    let crc = header::entries_checksum(&primary, entries);
    primary.crc32_parts = crc;
    backup.crc32_parts = crc;

    // backup copies first, so a crash keeps the primary table valid
    header::write_entries(io, &backup, entries)?;
    backup.write(io)?;
    header::write_entries(io, &primary, entries)?;
    primary.write(io)?;

    Ok(())
}

/// Fill the MBR partition records with `ranges` and write sector 0.
pub fn rewrite_mbr<D: DiskDevice>(
    io: &mut BlockIo<D>,
    boot: &mut Mbr,
    ranges: &[PartitionRange],
) -> Result<(), RewriteError> {
    if ranges.len() > boot.partitions.len() {
        return Err(RewriteError::TooManyPartitions(ranges.len()));
    }
    if ranges.is_empty() {
        debug!("no ranges resolved, leaving the MBR untouched");
        return Ok(());
    }

    for (record, range) in boot.partitions.iter_mut().zip(ranges) {
        let lb_start = u32::try_from(range.start)
            .map_err(|_| RewriteError::LbaOutOfRange(range.start))?;
        let lb_size = u32::try_from(range.size)
            .map_err(|_| RewriteError::LbaOutOfRange(range.size))?;

        let (start_track, start_head, start_sector) = mbr::chs_from_lba(range.start);
        let (end_track, end_head, end_sector) = mbr::chs_from_lba(range.start + range.size);
        *record = PartRecord {
            boot_indicator: 0,
            start_head,
            start_sector,
            start_track,
            os_type: range.part_type,
            end_head,
            end_sector,
            end_track,
            lb_start,
            lb_size,
        };
    }

    boot.write_to(io)?;
    Ok(())
}

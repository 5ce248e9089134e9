//! Windows LDM (dynamic disk) metadata access.
//!
//! The on-disk chain is PRIVHEAD -> config region -> TOCBLOCK -> VMDB ->
//! VBLK stream; everything in it is big-endian. The stream decodes into the
//! relations of [`vblk::Database`], which [`resolve`] joins into plain
//! partition ranges. The LDM region itself is never written.

pub mod resolve;
pub mod vblk;

use std::collections::HashMap;
use std::fmt;

use simple_bytes::{Bytes, BytesRead};
use uuid::Uuid;

use crate::disk::{BlockIo, DeviceError};
use crate::DiskDevice;
use vblk::Database;

/// PRIVHEAD sector on MBR-style dynamic disks.
pub const MBR_PRIVHEAD_LBA: u64 = 6;

const PRIVHEAD_MAGIC: &[u8; 8] = b"PRIVHEAD";
const TOCBLOCK_MAGIC: &[u8; 8] = b"TOCBLOCK";
const VMDB_MAGIC: &[u8; 4] = b"VMDB";
const VBLK_MAGIC: &[u8; 4] = b"VBLK";

const VBLK_HEAD_SIZE: usize = 16;
// name[8] flags1 start size flags2
const TOC_BITMAP_SIZE: usize = 34;
const TOC_BITMAPS_OFFSET: usize = 36;

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned while reading the LDM database.
pub enum LdmError {
    /// Positioned device access failed.
    Device(DeviceError),
    /// No PRIVHEAD magic at the expected sector.
    MissingPrivateHeader,
    /// A GUID string did not parse as a canonical UUID.
    InvalidGuid(String),
    /// The config region does not carry a TOCBLOCK where expected.
    MissingTocBlock,
    /// Neither TOCBLOCK bitmap is named "config".
    MissingConfigBitmap,
    /// No VMDB magic where the config bitmap points.
    MissingVmdb,
    /// The config region is too small for the structures it must hold.
    InvalidConfigRegion,
    /// The VMDB announces a VBLK size the head does not fit in.
    InvalidVblkSize(u32),
    /// A VBLK fragment lies outside its group.
    InvalidFragment {
        /// Group number carried by the offending head.
        group: u32,
    },
    /// A record ended before its mandatory fields.
    TruncatedRecord,
    /// A length-prefixed integer wider than its target type.
    OversizedInteger(u8),
    /// A record kind outside the known set.
    UnknownRecordType(u8),
    /// A known record kind with an unsupported revision.
    UnsupportedRevision {
        /// Which record kind was rejected.
        entity: &'static str,
        /// The revision found on disk.
        revision: u8,
    },
    /// A volume layout other than GEN or RAID5.
    UnsupportedVolumeType(u8),
    /// A RAID5 volume; recognized, but conversion is refused.
    Raid5Volume,
    /// A component layout other than SPANNED.
    UnsupportedComponentType(u8),
    /// No disk record matches the PRIVHEAD GUID of this device.
    DiskNotFound(Uuid),
    /// A partition references a component id that was never parsed.
    ComponentNotFound(u32),
    /// A component references a volume id that was never parsed.
    VolumeNotFound(u32),
}

impl From<DeviceError> for LdmError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl std::error::Error for LdmError {}

impl fmt::Display for LdmError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LdmError::*;
        match self {
            Device(e) => write!(fmt, "LDM device error: {e}"),
            MissingPrivateHeader => write!(fmt, "PRIVHEAD not found"),
            InvalidGuid(text) => write!(fmt, "invalid GUID string: {text:?}"),
            MissingTocBlock => write!(fmt, "TOCBLOCK not found"),
            MissingConfigBitmap => write!(fmt, "TOCBLOCK has no \"config\" bitmap"),
            MissingVmdb => write!(fmt, "VMDB not found"),
            InvalidConfigRegion => write!(fmt, "LDM config region out of bounds"),
            InvalidVblkSize(size) => write!(fmt, "invalid VBLK size {size}"),
            InvalidFragment { group } => {
                write!(fmt, "invalid VBLK fragment in group {group}")
            }
            TruncatedRecord => write!(fmt, "VBLK record cut short"),
            OversizedInteger(len) => write!(fmt, "found {len} bytes integer"),
            UnknownRecordType(kind) => write!(fmt, "unknown VBLK record type {kind:#x}"),
            UnsupportedRevision { entity, revision } => {
                write!(fmt, "unsupported {entity} revision {revision}")
            }
            UnsupportedVolumeType(kind) => write!(fmt, "unsupported volume type {kind:#x}"),
            Raid5Volume => write!(fmt, "RAID5 volumes are not supported"),
            UnsupportedComponentType(kind) => {
                write!(fmt, "unsupported component type {kind:#x}")
            }
            DiskNotFound(guid) => write!(fmt, "no LDM disk record with GUID {guid}"),
            ComponentNotFound(id) => write!(fmt, "component {id} not found"),
            VolumeNotFound(id) => write!(fmt, "volume {id} not found"),
        }
    }
}

/// Parsed PRIVHEAD fields this tool uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateHeader {
    /// GUID identifying this disk inside its disk group.
    pub disk_guid: Uuid,
    /// First LBA of the payload area; LDM partition starts are relative to it.
    pub logical_disk_start: u64,
    /// Size of the payload area in sectors.
    pub logical_disk_size: u64,
    /// First LBA of the LDM config region.
    pub config_start: u64,
    /// Size of the LDM config region in sectors.
    pub config_size: u64,
}

impl PrivateHeader {
    fn parse(sector: &[u8; 512]) -> Result<Self, LdmError> {
        if &sector[..8] != PRIVHEAD_MAGIC {
            return Err(LdmError::MissingPrivateHeader);
        }

        // the disk GUID is stored as NUL-padded text
        let raw_guid = &sector[48..112];
        let end = raw_guid.iter().position(|b| *b == 0).unwrap_or(raw_guid.len());
        let text = String::from_utf8_lossy(&raw_guid[..end]).into_owned();
        let disk_guid = Uuid::parse_str(text.trim()).map_err(|_| LdmError::InvalidGuid(text))?;

        let mut bytes = Bytes::from(&sector[283..315]);
        let header = PrivateHeader {
            disk_guid,
            logical_disk_start: bytes.read_u64(),
            logical_disk_size: bytes.read_u64(),
            config_start: bytes.read_u64(),
            config_size: bytes.read_u64(),
        };
        debug!(
            "privhead: disk {}, payload {}+{}, config {}+{}",
            header.disk_guid,
            header.logical_disk_start,
            header.logical_disk_size,
            header.config_start,
            header.config_size
        );
        Ok(header)
    }
}

/// Read and parse the PRIVHEAD sector at `lba`.
pub fn read_private_header<D: DiskDevice>(
    io: &mut BlockIo<D>,
    lba: u64,
) -> Result<PrivateHeader, LdmError> {
    let mut sector = [0u8; 512];
    io.read_at(lba, &mut sector)?;
    PrivateHeader::parse(&sector)
}

struct TocBitmap {
    name: [u8; 8],
    start: u64,
}

fn parse_tocblock(block: &[u8]) -> Result<[TocBitmap; 2], LdmError> {
    if block.len() < TOC_BITMAPS_OFFSET + 2 * TOC_BITMAP_SIZE {
        return Err(LdmError::InvalidConfigRegion);
    }
    if &block[..8] != TOCBLOCK_MAGIC {
        return Err(LdmError::MissingTocBlock);
    }

    let mut bytes = Bytes::from(&block[TOC_BITMAPS_OFFSET..]);
    let mut bitmap = || -> TocBitmap {
        let mut name = [0u8; 8];
        name.copy_from_slice(BytesRead::read(&mut bytes, 8));
        let _flags1 = bytes.read_u16();
        let start = bytes.read_u64();
        let _size = bytes.read_u64();
        let _flags2 = bytes.read_u64();
        TocBitmap { name, start }
    };
    Ok([bitmap(), bitmap()])
}

struct VmdbHeader {
    vblk_size: u32,
    vblk_first_offset: u32,
}

impl VmdbHeader {
    fn parse(region: &[u8]) -> Result<Self, LdmError> {
        if region.len() < 16 || &region[..4] != VMDB_MAGIC {
            return Err(LdmError::MissingVmdb);
        }
        let mut bytes = Bytes::from(&region[4..16]);
        let _vblk_last = bytes.read_u32();
        let header = VmdbHeader {
            vblk_size: bytes.read_u32(),
            vblk_first_offset: bytes.read_u32(),
        };
        debug!(
            "vmdb: vblk size {}, first offset {}",
            header.vblk_size, header.vblk_first_offset
        );
        Ok(header)
    }
}

struct VblkHead {
    group: u32,
    record_number: u16,
    num_records: u16,
}

impl VblkHead {
    fn parse(record: &[u8]) -> Self {
        let mut bytes = Bytes::from(&record[4..VBLK_HEAD_SIZE]);
        let _sequence = bytes.read_u32();
        Self {
            group: bytes.read_u32(),
            record_number: bytes.read_u16(),
            num_records: bytes.read_u16(),
        }
    }
}

struct FragmentGroup {
    num_records: u16,
    found: u16,
    data: Vec<u8>,
}

/// Iterate the VBLK stream of `region`, assembling fragmented records.
///
/// Fragments stage per group number and commit on completion; groups still
/// incomplete at end-of-stream are discarded.
fn read_vblks(region: &[u8], vmdb: &VmdbHeader, db: &mut Database) -> Result<(), LdmError> {
    let vblk_size = vmdb.vblk_size as usize;
    if vblk_size <= VBLK_HEAD_SIZE {
        return Err(LdmError::InvalidVblkSize(vmdb.vblk_size));
    }
    let payload_size = vblk_size - VBLK_HEAD_SIZE;
    let mut staging: HashMap<u32, FragmentGroup> = HashMap::new();

    let mut offset = vmdb.vblk_first_offset as usize;
    while let Some(record) = region.get(offset..offset + vblk_size) {
        if &record[..4] != VBLK_MAGIC {
            break;
        }
        let head = VblkHead::parse(record);
        if head.num_records > 0 && head.record_number >= head.num_records {
            return Err(LdmError::InvalidFragment { group: head.group });
        }
        if head.num_records == 0 {
            break;
        }

        let payload = &record[VBLK_HEAD_SIZE..];
        if head.num_records > 1 {
            debug!(
                "vblk group {}: fragment {} of {}",
                head.group, head.record_number, head.num_records
            );
            let group = staging.entry(head.group).or_insert_with(|| FragmentGroup {
                num_records: head.num_records,
                found: 0,
                data: vec![0u8; usize::from(head.num_records) * payload_size],
            });
            if group.num_records != head.num_records {
                return Err(LdmError::InvalidFragment { group: head.group });
            }
            let at = usize::from(head.record_number) * payload_size;
            group.data[at..at + payload_size].copy_from_slice(payload);
            group.found += 1;

            if group.found == group.num_records {
                if let Some(group) = staging.remove(&head.group) {
                    db.parse_record(&group.data)?;
                }
            }
        } else {
            db.parse_record(payload)?;
        }

        offset += vblk_size;
    }

    for group in staging.keys() {
        warn!("discarding incomplete VBLK group {}", group);
    }
    Ok(())
}

/// Load the LDM database rooted at the PRIVHEAD at `privhead_lba`.
pub fn read_ldm<D: DiskDevice>(
    io: &mut BlockIo<D>,
    privhead_lba: u64,
) -> Result<(PrivateHeader, Database), LdmError> {
    let head = read_private_header(io, privhead_lba)?;
    let sector_size = io.sector_size().as_u64();

    let config_len = head
        .config_size
        .checked_mul(sector_size)
        .ok_or(LdmError::InvalidConfigRegion)?;
    let mut config = vec![0u8; config_len as usize];
    io.read_at(head.config_start, &mut config)?;

    let toc_offset = (2 * sector_size) as usize;
    let toc = parse_tocblock(config.get(toc_offset..).ok_or(LdmError::MissingTocBlock)?)?;
    let bitmap = toc
        .iter()
        .find(|b| b.name.starts_with(b"config"))
        .ok_or(LdmError::MissingConfigBitmap)?;

    let db_offset = bitmap
        .start
        .checked_mul(sector_size)
        .ok_or(LdmError::InvalidConfigRegion)? as usize;
    let db_region = config.get(db_offset..).ok_or(LdmError::MissingVmdb)?;
    let vmdb = VmdbHeader::parse(db_region)?;

    let mut database = Database::default();
    read_vblks(db_region, &vmdb, &mut database)?;
    Ok((head, database))
}

//! GPT header and entry-array codec.

use crate::disk::{BlockIo, DeviceError};
use crate::partition_types;
use crate::DiskDevice;

use std::fmt;

use crc::Crc;
use simple_bytes::{Bytes, BytesArray, BytesRead, BytesWrite};
use uuid::Uuid;

/// LBA of the primary GPT header.
pub const PRIMARY_HEADER_LBA: u64 = 1;

pub(crate) const HEADER_SIZE: usize = 92;
pub(crate) const ENTRY_SIZE: usize = 128;

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned when interacting with a GPT header or entry array.
pub enum HeaderError {
    /// Positioned device access failed.
    Device(DeviceError),
    /// The sector does not start with the "EFI PART" signature.
    InvalidSignature,
    /// `header_size` lies outside `92..=sector_size`.
    InvalidHeaderSize(u32),
    /// `sizeof_partition_entry` is smaller than the 128-byte entry layout.
    InvalidEntrySize(u32),
    /// The header CRC32 does not match its stored value.
    HeaderCrcMismatch {
        /// Value carried by the on-disk header.
        stored: u32,
        /// Value computed over the on-disk bytes.
        computed: u32,
    },
    /// The entry-array CRC32 does not match the value stored in the header.
    EntryArrayCrcMismatch {
        /// Value carried by the on-disk header.
        stored: u32,
        /// Value computed over the on-disk bytes.
        computed: u32,
    },
    /// The entry array size computation overflowed.
    EntryArrayOverflow,
    /// A structure was cut short by the end of its buffer.
    Truncated,
}

impl From<DeviceError> for HeaderError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl std::error::Error for HeaderError {}

impl fmt::Display for HeaderError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HeaderError::*;
        match self {
            Device(e) => write!(fmt, "GPT device error: {e}"),
            InvalidSignature => write!(fmt, "invalid GPT signature"),
            InvalidHeaderSize(size) => write!(fmt, "invalid GPT header size: {size}"),
            InvalidEntrySize(size) => write!(fmt, "invalid GPT entry size: {size}"),
            HeaderCrcMismatch { stored, computed } => write!(
                fmt,
                "GPT header CRC mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            EntryArrayCrcMismatch { stored, computed } => write!(
                fmt,
                "GPT entry array CRC mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            EntryArrayOverflow => write!(fmt, "GPT entry array size overflow"),
            Truncated => write!(fmt, "GPT structure cut short"),
        }
    }
}

/// Header describing a GPT disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// major, minor
    pub revision: (u16, u16),
    /// Bytes covered by the header CRC, `92..=sector_size`.
    pub header_size: u32,
    /// CRC32 of the header with the crc32 field zeroed.
    pub crc32: u32,
    /// must be 0
    pub reserved: u32,
    /// LBA this copy of the header lives at.
    pub current_lba: u64,
    /// LBA of the other copy of the header.
    pub backup_lba: u64,
    /// First usable LBA for partitions (primary table last LBA + 1).
    pub first_usable: u64,
    /// Last usable LBA (secondary partition table first LBA - 1).
    pub last_usable: u64,
    /// UUID of the disk.
    pub disk_guid: Uuid,
    /// Starting LBA of the partition entry array.
    pub part_start: u64,
    /// Number of partition entry slots (used or not).
    pub num_parts: u32,
    /// Size of a partition entry slot, usually 128.
    pub part_size: u32,
    /// CRC32 of the entry array.
    pub crc32_parts: u32,
}

impl Header {
    /// Write this header at its `current_lba`.
    ///
    /// The CRC32 is recomputed over `header_size` bytes with the crc field
    /// zeroed; the rest of the sector is written as zeros.
    pub fn write<D: DiskDevice>(&self, io: &mut BlockIo<D>) -> Result<(), HeaderError> {
        let lb_size = io.sector_size();
        if (self.header_size as usize) < HEADER_SIZE || self.header_size as u64 > lb_size.as_u64()
        {
            return Err(HeaderError::InvalidHeaderSize(self.header_size));
        }

        let mut sector = vec![0u8; lb_size.as_usize()];
        sector[..HEADER_SIZE].copy_from_slice(&self.as_bytes(0));
        let crc = calculate_crc32(&sector[..self.header_size as usize]);
        trace!("computed header CRC32: {:#x}", crc);
        sector[16..20].copy_from_slice(&crc.to_le_bytes());

        io.write_at(self.current_lba, &sector)?;
        Ok(())
    }

    fn as_bytes(&self, crc32: u32) -> [u8; HEADER_SIZE] {
        let mut bytes = BytesArray::from([0u8; HEADER_SIZE]);

        BytesWrite::write(&mut bytes, GPT_SIGNATURE);
        bytes.write_le_u16(self.revision.1);
        bytes.write_le_u16(self.revision.0);
        bytes.write_le_u32(self.header_size);
        bytes.write_le_u32(crc32);
        bytes.write_le_u32(self.reserved);
        bytes.write_le_u64(self.current_lba);
        bytes.write_le_u64(self.backup_lba);
        bytes.write_le_u64(self.first_usable);
        bytes.write_le_u64(self.last_usable);
        write_uuid(&mut bytes, &self.disk_guid);
        bytes.write_le_u64(self.part_start);
        bytes.write_le_u32(self.num_parts);
        bytes.write_le_u32(self.part_size);
        bytes.write_le_u32(self.crc32_parts);

        bytes.into_array()
    }
}

/// One slot of the GPT partition entry array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    /// Partition type GUID.
    pub type_guid: Uuid,
    /// Unique GUID of this partition.
    pub unique_guid: Uuid,
    /// First LBA of the partition.
    pub first_lba: u64,
    /// Last LBA of the partition, inclusive.
    pub last_lba: u64,
    /// Attribute flags.
    pub flags: u64,
    /// Partition name, raw UTF-16LE bytes.
    pub name: [u8; 72],
}

impl Entry {
    /// The all-zero entry marking an unused slot.
    pub const ZERO: Entry = Entry {
        type_guid: Uuid::nil(),
        unique_guid: Uuid::nil(),
        first_lba: 0,
        last_lba: 0,
        flags: 0,
        name: [0u8; 72],
    };

    /// Whether every field of this slot is zero.
    pub fn is_unused(&self) -> bool {
        self.type_guid.is_nil()
            && self.unique_guid.is_nil()
            && self.first_lba == 0
            && self.last_lba == 0
            && self.flags == 0
            && self.name.iter().all(|b| *b == 0)
    }

    /// Whether this entry carries one of the LDM partition types.
    pub fn is_ldm(&self) -> bool {
        self.type_guid == partition_types::LDM_METADATA.guid
            || self.type_guid == partition_types::LDM_DATA.guid
    }

    fn from_bytes(raw: &[u8]) -> Result<Entry, HeaderError> {
        let mut bytes = Bytes::from(raw);
        let type_guid = parse_uuid(&mut bytes)?;
        let unique_guid = parse_uuid(&mut bytes)?;
        let first_lba = bytes.read_le_u64();
        let last_lba = bytes.read_le_u64();
        let flags = bytes.read_le_u64();
        let mut name = [0u8; 72];
        name.copy_from_slice(BytesRead::read(&mut bytes, 72));

        Ok(Entry {
            type_guid,
            unique_guid,
            first_lba,
            last_lba,
            flags,
            name,
        })
    }

    fn as_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = BytesArray::from([0u8; ENTRY_SIZE]);
        write_uuid(&mut bytes, &self.type_guid);
        write_uuid(&mut bytes, &self.unique_guid);
        bytes.write_le_u64(self.first_lba);
        bytes.write_le_u64(self.last_lba);
        bytes.write_le_u64(self.flags);
        BytesWrite::write(&mut bytes, &self.name);
        bytes.into_array()
    }
}

/// Parses a GUID with the first three portions in little endian.
pub(crate) fn parse_uuid(rdr: &mut impl BytesRead) -> Result<Uuid, HeaderError> {
    if rdr.remaining().len() < 16 {
        return Err(HeaderError::Truncated);
    }

    let d1 = rdr.read_le_u32();
    let d2 = rdr.read_le_u16();
    let d3 = rdr.read_le_u16();
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(BytesRead::read(rdr, 8));

    Ok(Uuid::from_fields(d1, d2, d3, &d4))
}

fn write_uuid(bytes: &mut impl BytesWrite, uuid: &Uuid) {
    let fields = uuid.as_fields();
    bytes.write_le_u32(fields.0);
    bytes.write_le_u16(fields.1);
    bytes.write_le_u16(fields.2);
    BytesWrite::write(bytes, fields.3);
}

/// Read and validate the header at an arbitrary LBA.
fn read_at<D: DiskDevice>(io: &mut BlockIo<D>, lba: u64) -> Result<Header, HeaderError> {
    let lb_size = io.sector_size();
    let mut sector = vec![0u8; lb_size.as_usize()];
    io.read_at(lba, &mut sector)?;

    let mut bytes = Bytes::from(sector.as_slice());
    if BytesRead::read(&mut bytes, 8) != &GPT_SIGNATURE[..] {
        return Err(HeaderError::InvalidSignature);
    }

    let revision = {
        let minor = bytes.read_le_u16();
        let major = bytes.read_le_u16();
        (major, minor)
    };
    let header_size = bytes.read_le_u32();
    if (header_size as usize) < HEADER_SIZE || header_size as u64 > lb_size.as_u64() {
        return Err(HeaderError::InvalidHeaderSize(header_size));
    }

    let header = Header {
        revision,
        header_size,
        crc32: bytes.read_le_u32(),
        reserved: bytes.read_le_u32(),
        current_lba: bytes.read_le_u64(),
        backup_lba: bytes.read_le_u64(),
        first_usable: bytes.read_le_u64(),
        last_usable: bytes.read_le_u64(),
        disk_guid: parse_uuid(&mut bytes)?,
        part_start: bytes.read_le_u64(),
        num_parts: bytes.read_le_u32(),
        part_size: bytes.read_le_u32(),
        crc32_parts: bytes.read_le_u32(),
    };

    // CRC covers header_size bytes with the crc field zeroed.
    let mut region = sector[..header.header_size as usize].to_vec();
    region[16..20].fill(0);
    let computed = calculate_crc32(&region);
    trace!("header CRC32: {:#x} - computed CRC32: {:#x}", header.crc32, computed);
    if computed != header.crc32 {
        return Err(HeaderError::HeaderCrcMismatch {
            stored: header.crc32,
            computed,
        });
    }

    Ok(header)
}

/// Read and validate the primary header at LBA 1.
pub fn read_primary<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<Header, HeaderError> {
    read_at(io, PRIMARY_HEADER_LBA)
}

/// Read and validate the backup header at the last LBA of the device.
pub fn read_backup<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<Header, HeaderError> {
    let last_lba = io.last_lba()?;
    read_at(io, last_lba)
}

/// Read the primary header, falling back to the backup on any failure.
pub fn read_any<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<Header, HeaderError> {
    match read_primary(io) {
        Ok(header) => Ok(header),
        Err(e) => {
            debug!("primary GPT header rejected ({}), trying backup", e);
            read_backup(io)
        }
    }
}

/// Read the entry array located by `header` and verify its CRC.
pub fn read_entries<D: DiskDevice>(
    io: &mut BlockIo<D>,
    header: &Header,
) -> Result<Vec<Entry>, HeaderError> {
    if (header.part_size as usize) < ENTRY_SIZE {
        return Err(HeaderError::InvalidEntrySize(header.part_size));
    }
    let len = u64::from(header.num_parts)
        .checked_mul(u64::from(header.part_size))
        .ok_or(HeaderError::EntryArrayOverflow)?;

    let mut raw = vec![0u8; len as usize];
    io.read_at(header.part_start, &mut raw)?;

    let computed = calculate_crc32(&raw);
    if computed != header.crc32_parts {
        return Err(HeaderError::EntryArrayCrcMismatch {
            stored: header.crc32_parts,
            computed,
        });
    }

    raw.chunks_exact(header.part_size as usize)
        .map(|slot| Entry::from_bytes(&slot[..ENTRY_SIZE]))
        .collect()
}

fn serialize_entries(header: &Header, entries: &[Entry]) -> Vec<u8> {
    let mut raw = vec![0u8; entries.len() * header.part_size as usize];
    for (slot, entry) in raw.chunks_exact_mut(header.part_size as usize).zip(entries) {
        slot[..ENTRY_SIZE].copy_from_slice(&entry.as_bytes());
    }
    raw
}

/// CRC32 of the entry array as it would be written for `header`.
pub fn entries_checksum(header: &Header, entries: &[Entry]) -> u32 {
    calculate_crc32(&serialize_entries(header, entries))
}

/// Write the entry array at `header.part_start`.
///
/// Callers are responsible for recomputing `crc32_parts` in both headers
/// before writing them.
pub fn write_entries<D: DiskDevice>(
    io: &mut BlockIo<D>,
    header: &Header,
    entries: &[Entry],
) -> Result<(), HeaderError> {
    io.write_at(header.part_start, &serialize_entries(header, entries))?;
    Ok(())
}

const CRC_32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

pub(crate) fn calculate_crc32(b: &[u8]) -> u32 {
    let mut digest = CRC_32.digest();
    digest.update(b);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::disk::LogicalBlockSize;
    use std::io::Cursor;

    const DISK_SECTORS: usize = 128;

    fn sample_headers() -> (Header, Header) {
        let disk_guid: Uuid = "1B6A2BFA-E92B-184C-A8A7-ED0610D54821".parse().unwrap();

        let primary = Header {
            revision: (1, 0),
            header_size: 92,
            crc32: 0,
            reserved: 0,
            current_lba: 1,
            backup_lba: 127,
            first_usable: 34,
            last_usable: 94,
            disk_guid,
            part_start: 2,
            num_parts: 128,
            part_size: 128,
            crc32_parts: 0,
        };

        let mut backup = primary.clone();
        backup.current_lba = 127;
        backup.backup_lba = 1;
        backup.part_start = 95;

        (primary, backup)
    }

    fn sample_entry() -> Entry {
        Entry {
            type_guid: crate::partition_types::BASIC_DATA.guid,
            unique_guid: "6fcc8240-3985-4840-901f-a05e7fd9b69d".parse().unwrap(),
            first_lba: 34,
            last_lba: 90,
            flags: 0,
            name: [0u8; 72],
        }
    }

    fn write_disk() -> BlockIo<Cursor<Vec<u8>>> {
        let mut io = BlockIo::new(
            Cursor::new(vec![0u8; DISK_SECTORS * 512]),
            LogicalBlockSize::Lb512,
        );

        let (mut primary, mut backup) = sample_headers();
        let mut entries = vec![Entry::ZERO; primary.num_parts as usize];
        entries[0] = sample_entry();

        let crc = entries_checksum(&primary, &entries);
        primary.crc32_parts = crc;
        backup.crc32_parts = crc;

        write_entries(&mut io, &primary, &entries).unwrap();
        write_entries(&mut io, &backup, &entries).unwrap();
        primary.write(&mut io).unwrap();
        backup.write(&mut io).unwrap();

        io
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut io = write_disk();

        let primary = read_primary(&mut io).unwrap();
        let backup = read_backup(&mut io).unwrap();

        assert_eq!(primary.current_lba, 1);
        assert_eq!(primary.backup_lba, 127);
        assert_eq!(backup.current_lba, 127);
        assert_eq!(backup.part_start, 95);
        assert_eq!(primary.disk_guid, backup.disk_guid);
        assert_eq!(primary.crc32_parts, backup.crc32_parts);
        // the two copies differ only in placement fields, so their CRCs differ
        assert_ne!(primary.crc32, backup.crc32);

        let entries = read_entries(&mut io, &primary).unwrap();
        assert_eq!(entries.len(), 128);
        assert_eq!(entries[0], sample_entry());
        assert!(entries[1].is_unused());
    }

    #[test]
    fn falls_back_to_backup_on_corrupt_primary() {
        let mut io = write_disk();

        // flip one byte inside the primary header sector
        io.device_mut().get_mut()[512 + 40] ^= 0xFF;

        assert!(matches!(
            read_primary(&mut io),
            Err(HeaderError::HeaderCrcMismatch { .. })
        ));
        let header = read_any(&mut io).unwrap();
        assert_eq!(header.current_lba, 127);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut io = write_disk();
        io.device_mut().get_mut()[512] = b'X';
        assert!(matches!(
            read_primary(&mut io),
            Err(HeaderError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_undersized_header() {
        let mut io = write_disk();
        // patch header_size below the fixed layout size; checked before the CRC
        io.device_mut().get_mut()[512 + 12] = 91;
        assert!(matches!(
            read_primary(&mut io),
            Err(HeaderError::InvalidHeaderSize(91))
        ));
    }

    #[test]
    fn rejects_oversized_header() {
        let mut io = write_disk();
        io.device_mut().get_mut()[512 + 12..512 + 16].copy_from_slice(&4096u32.to_le_bytes());
        assert!(matches!(
            read_primary(&mut io),
            Err(HeaderError::InvalidHeaderSize(4096))
        ));
    }

    #[test]
    fn detects_entry_array_corruption() {
        let mut io = write_disk();
        let header = read_primary(&mut io).unwrap();

        io.device_mut().get_mut()[2 * 512] ^= 0x01;
        assert!(matches!(
            read_entries(&mut io, &header),
            Err(HeaderError::EntryArrayCrcMismatch { .. })
        ));
    }

    #[test]
    fn entry_bytes_round_trip() {
        let entry = sample_entry();
        let raw = entry.as_bytes();
        assert_eq!(Entry::from_bytes(&raw).unwrap(), entry);

        assert!(Entry::ZERO.is_unused());
        assert!(!entry.is_unused());
    }

    #[test]
    fn ldm_types_are_recognized() {
        let mut entry = sample_entry();
        assert!(!entry.is_ldm());
        entry.type_guid = crate::partition_types::LDM_METADATA.guid;
        assert!(entry.is_ldm());
        entry.type_guid = crate::partition_types::LDM_DATA.guid;
        assert!(entry.is_ldm());
    }
}

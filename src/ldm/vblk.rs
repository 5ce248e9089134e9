//! VBLK payload decoding and the in-memory LDM relations.
//!
//! An assembled VBLK payload starts with a fixed 8-byte record header
//! followed by a mix of length-prefixed fields (`[len][big-endian bytes]`)
//! and fixed-width big-endian fields. Which trailing fields exist is driven
//! by the flags byte of the record header. Names are carried as the raw
//! bytes found on disk; legacy OEM-codepage names are not UTF-8.

use std::collections::BTreeMap;

use bitflags::bitflags;
use simple_bytes::{Bytes, BytesRead};
use uuid::Uuid;

use super::LdmError;

pub(crate) const RECORD_HEADER_SIZE: usize = 8;

// record kinds, low nibble of the type byte
const VBLK_PADDING: u8 = 0x0;
const VBLK_VOLUME: u8 = 0x1;
const VBLK_COMPONENT: u8 = 0x2;
const VBLK_PARTITION: u8 = 0x3;
const VBLK_DISK: u8 = 0x4;
const VBLK_DISK_GROUP: u8 = 0x5;

/// Simple or spanned volume layout.
pub const VOLUME_TYPE_GEN: u8 = 0x3;
/// RAID5 volume layout, recognized but rejected.
pub const VOLUME_TYPE_RAID5: u8 = 0x4;

/// Striped component layout, recognized but rejected.
pub const COMPONENT_TYPE_STRIPED: u8 = 0x1;
/// End-to-end concatenation, the only supported component layout.
pub const COMPONENT_TYPE_SPANNED: u8 = 0x2;
/// RAID component layout, recognized but rejected.
pub const COMPONENT_TYPE_RAID: u8 = 0x3;

bitflags! {
    /// Optional trailing fields of a volume record.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct VolumeFields: u8 {
        /// An id1 string follows the GUID.
        const ID1 = 0x08;
        /// An id2 string follows the GUID.
        const ID2 = 0x20;
        /// A second size follows the GUID.
        const SIZE1 = 0x80;
        /// A drive letter hint follows the GUID.
        const DRIVE_HINT = 0x02;
    }
}

bitflags! {
    /// Optional trailing fields of a component record.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct ComponentFields: u8 {
        /// Chunk size and column count are present.
        const CHUNK = 0x10;
    }
}

bitflags! {
    /// Optional trailing fields of a partition record.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct PartitionFields: u8 {
        /// A column index is present.
        const INDEX = 0x08;
    }
}

/// An LDM volume, the mountable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Volume id, unique within the database.
    pub id: u32,
    /// Raw name bytes, copied without charset conversion.
    pub name: Vec<u8>,
    /// Layout type byte, [`VOLUME_TYPE_GEN`] for everything this tool accepts.
    pub kind: u8,
    /// Volume flags byte.
    pub flags: u8,
    /// Number of components backing this volume.
    pub num_of_comps: u32,
    /// Size in sectors.
    pub size: u64,
    /// MBR partition type byte to use for the converted partition.
    pub part_type: u8,
    /// Volume GUID.
    pub guid: Uuid,
    /// Raw drive letter hint bytes, when recorded.
    pub drive_hint: Option<Vec<u8>>,
}

/// An LDM component, grouping partitions into a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Component id, unique within the database.
    pub id: u32,
    /// Raw name bytes, copied without charset conversion.
    pub name: Vec<u8>,
    /// Layout type byte, [`COMPONENT_TYPE_SPANNED`] for everything this tool accepts.
    pub kind: u8,
    /// Number of partitions in this component.
    pub num_of_parts: u32,
    /// Id of the owning volume.
    pub volume_id: u32,
    /// Stripe chunk size, zero for spanned components.
    pub chunk_size: u64,
    /// Stripe column count, zero for spanned components.
    pub columns: u32,
}

/// An LDM sub-partition, one contiguous stretch of a physical disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Partition id, unique within the database.
    pub id: u32,
    /// Raw name bytes, copied without charset conversion.
    pub name: Vec<u8>,
    /// First sector, relative to the logical disk start.
    pub start: u64,
    /// Sector offset of this stretch within its volume.
    pub volume_offset: u64,
    /// Size in sectors.
    pub size: u64,
    /// Id of the owning component.
    pub component_id: u32,
    /// Id of the disk this stretch lives on.
    pub disk_id: u32,
    /// Column index within the component.
    pub index: u32,
}

/// An LDM member disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Disk id, unique within the database.
    pub id: u32,
    /// Raw name bytes, copied without charset conversion.
    pub name: Vec<u8>,
    /// Disk GUID, matched against the PRIVHEAD of the device being scanned.
    pub guid: Uuid,
}

/// An LDM disk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGroup {
    /// Group id.
    pub id: u32,
    /// Raw name bytes, copied without charset conversion.
    pub name: Vec<u8>,
}

/// The five relations decoded from one VMDB.
///
/// Built append-only while the VBLK stream is iterated; partitions keep
/// their stream order because it decides the order converted partitions are
/// emitted in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Database {
    /// Volumes by id.
    pub volumes: BTreeMap<u32, Volume>,
    /// Components by id.
    pub components: BTreeMap<u32, Component>,
    /// Partitions in stream order.
    pub partitions: Vec<Partition>,
    /// Disks by id.
    pub disks: BTreeMap<u32, Disk>,
    /// Disk groups by id.
    pub disk_groups: BTreeMap<u32, DiskGroup>,
}

impl Database {
    /// Decode one assembled VBLK payload into its relation.
    pub fn parse_record(&mut self, payload: &[u8]) -> Result<(), LdmError> {
        if payload.len() < RECORD_HEADER_SIZE {
            return Err(LdmError::TruncatedRecord);
        }
        // status u16, flags u8, type u8, size u32; only flags and type matter
        let flags = payload[2];
        let kind = payload[3] & 0x0F;
        let revision = (payload[3] & 0xF0) >> 4;

        let mut cur = Bytes::from(&payload[RECORD_HEADER_SIZE..]);
        match kind {
            VBLK_PADDING => Ok(()),
            VBLK_VOLUME => self.parse_volume(&mut cur, revision, flags),
            VBLK_COMPONENT => self.parse_component(&mut cur, revision, flags),
            VBLK_PARTITION => self.parse_partition(&mut cur, revision, flags),
            VBLK_DISK => self.parse_disk(&mut cur, revision),
            VBLK_DISK_GROUP => self.parse_disk_group(&mut cur, revision),
            other => Err(LdmError::UnknownRecordType(other)),
        }
    }

    fn parse_volume(&mut self, cur: &mut Bytes, revision: u8, flags: u8) -> Result<(), LdmError> {
        if revision != 5 {
            return Err(LdmError::UnsupportedRevision {
                entity: "volume",
                revision,
            });
        }

        let id = var_u32(cur)?;
        let name = var_bytes(cur)?;
        var_skip(cur)?; // volume type 1
        var_skip(cur)?; // unknown
        fixed_skip(cur, 14)?; // volume state

        let kind = byte(cur)?;
        match kind {
            VOLUME_TYPE_GEN => {}
            VOLUME_TYPE_RAID5 => return Err(LdmError::Raid5Volume),
            other => return Err(LdmError::UnsupportedVolumeType(other)),
        }

        fixed_skip(cur, 1)?; // unknown
        fixed_skip(cur, 1)?; // volume number
        fixed_skip(cur, 3)?; // zeros
        let volume_flags = byte(cur)?;
        let num_of_comps = var_u32(cur)?;
        fixed_skip(cur, 8)?; // log commit id
        fixed_skip(cur, 8)?; // unknown
        let size = var_u64(cur)?;
        fixed_skip(cur, 4)?; // zeros
        let part_type = byte(cur)?;
        let guid = fixed_guid(cur)?;

        // only the first matching optional field is present
        let fields = VolumeFields::from_bits_retain(flags);
        let mut drive_hint = None;
        if fields.contains(VolumeFields::ID1) {
            var_skip(cur)?;
        } else if fields.contains(VolumeFields::ID2) {
            var_skip(cur)?;
        } else if fields.contains(VolumeFields::SIZE1) {
            var_u64(cur)?;
        } else if fields.contains(VolumeFields::DRIVE_HINT) {
            drive_hint = Some(var_bytes(cur)?);
        }

        debug!(
            "volume {}: id {}, type {}, size {}, part type {:#04x}",
            String::from_utf8_lossy(&name),
            id,
            kind,
            size,
            part_type
        );
        self.volumes.insert(
            id,
            Volume {
                id,
                name,
                kind,
                flags: volume_flags,
                num_of_comps,
                size,
                part_type,
                guid,
                drive_hint,
            },
        );
        Ok(())
    }

    fn parse_component(
        &mut self,
        cur: &mut Bytes,
        revision: u8,
        flags: u8,
    ) -> Result<(), LdmError> {
        if revision != 3 {
            return Err(LdmError::UnsupportedRevision {
                entity: "component",
                revision,
            });
        }

        let id = var_u32(cur)?;
        let name = var_bytes(cur)?;
        var_skip(cur)?; // component state

        let kind = byte(cur)?;
        if kind != COMPONENT_TYPE_SPANNED {
            return Err(LdmError::UnsupportedComponentType(kind));
        }

        fixed_skip(cur, 4)?; // zeros
        let num_of_parts = var_u32(cur)?;
        fixed_skip(cur, 8)?; // commit id
        fixed_skip(cur, 8)?; // zeros
        let volume_id = var_u32(cur)?;
        fixed_skip(cur, 1)?;

        let mut chunk_size = 0;
        let mut columns = 0;
        if ComponentFields::from_bits_retain(flags).contains(ComponentFields::CHUNK) {
            chunk_size = var_u64(cur)?;
            columns = var_u32(cur)?;
        }

        debug!(
            "component {}: id {}, volume {}, {} partitions",
            String::from_utf8_lossy(&name),
            id,
            volume_id,
            num_of_parts
        );
        self.components.insert(
            id,
            Component {
                id,
                name,
                kind,
                num_of_parts,
                volume_id,
                chunk_size,
                columns,
            },
        );
        Ok(())
    }

    fn parse_partition(
        &mut self,
        cur: &mut Bytes,
        revision: u8,
        flags: u8,
    ) -> Result<(), LdmError> {
        if revision != 3 {
            return Err(LdmError::UnsupportedRevision {
                entity: "partition",
                revision,
            });
        }

        let id = var_u32(cur)?;
        let name = var_bytes(cur)?;
        fixed_skip(cur, 4)?; // zeros
        fixed_skip(cur, 8)?; // commit id
        let start = fixed_u64(cur)?;
        let volume_offset = fixed_u64(cur)?;
        let size = var_u64(cur)?;
        let component_id = var_u32(cur)?;
        let disk_id = var_u32(cur)?;

        let mut index = 0;
        if PartitionFields::from_bits_retain(flags).contains(PartitionFields::INDEX) {
            index = var_u32(cur)?;
        }

        debug!(
            "partition {}: id {}, disk {}, component {}, start {}, size {}",
            String::from_utf8_lossy(&name),
            id,
            disk_id,
            component_id,
            start,
            size
        );
        self.partitions.push(Partition {
            id,
            name,
            start,
            volume_offset,
            size,
            component_id,
            disk_id,
            index,
        });
        Ok(())
    }

    fn parse_disk(&mut self, cur: &mut Bytes, revision: u8) -> Result<(), LdmError> {
        let id = var_u32(cur)?;
        let name = var_bytes(cur)?;

        let guid = match revision {
            3 => {
                let text = var_bytes(cur)?;
                std::str::from_utf8(&text)
                    .ok()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        LdmError::InvalidGuid(String::from_utf8_lossy(&text).into_owned())
                    })?
            }
            4 => fixed_guid(cur)?,
            revision => {
                return Err(LdmError::UnsupportedRevision {
                    entity: "disk",
                    revision,
                })
            }
        };

        debug!(
            "disk {}: id {}, guid {}",
            String::from_utf8_lossy(&name),
            id,
            guid
        );
        self.disks.insert(id, Disk { id, name, guid });
        Ok(())
    }

    fn parse_disk_group(&mut self, cur: &mut Bytes, revision: u8) -> Result<(), LdmError> {
        if revision != 3 && revision != 4 {
            return Err(LdmError::UnsupportedRevision {
                entity: "disk group",
                revision,
            });
        }

        let id = var_u32(cur)?;
        let name = var_bytes(cur)?;

        debug!("disk group {}: id {}", String::from_utf8_lossy(&name), id);
        self.disk_groups.insert(id, DiskGroup { id, name });
        Ok(())
    }
}

fn take<'r>(cur: &'r mut Bytes, n: usize) -> Result<&'r [u8], LdmError> {
    if cur.remaining().len() < n {
        return Err(LdmError::TruncatedRecord);
    }
    Ok(BytesRead::read(cur, n))
}

fn byte(cur: &mut Bytes) -> Result<u8, LdmError> {
    Ok(take(cur, 1)?[0])
}

fn fixed_skip(cur: &mut Bytes, n: usize) -> Result<(), LdmError> {
    take(cur, n).map(|_| ())
}

fn fixed_u64(cur: &mut Bytes) -> Result<u64, LdmError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(take(cur, 8)?);
    Ok(u64::from_be_bytes(raw))
}

fn fixed_guid(cur: &mut Bytes) -> Result<Uuid, LdmError> {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(take(cur, 16)?);
    Ok(Uuid::from_bytes(raw))
}

/// Shared loop of the `[len][big-endian bytes]` integer encoding.
fn var_uint(cur: &mut Bytes, max_len: usize) -> Result<u64, LdmError> {
    let len = byte(cur)?;
    if len as usize > max_len {
        return Err(LdmError::OversizedInteger(len));
    }

    let mut value = 0u64;
    for b in take(cur, len as usize)? {
        value = (value << 8) | u64::from(*b);
    }
    Ok(value)
}

fn var_u64(cur: &mut Bytes) -> Result<u64, LdmError> {
    var_uint(cur, 8)
}

fn var_u32(cur: &mut Bytes) -> Result<u32, LdmError> {
    var_uint(cur, 4).map(|v| v as u32)
}

/// Copy a length-prefixed field verbatim; no trimming, no charset conversion.
fn var_bytes(cur: &mut Bytes) -> Result<Vec<u8>, LdmError> {
    let len = byte(cur)?;
    Ok(take(cur, len as usize)?.to_vec())
}

fn var_skip(cur: &mut Bytes) -> Result<(), LdmError> {
    let len = byte(cur)?;
    fixed_skip(cur, len as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn push_var_bytes(out: &mut Vec<u8>, data: &[u8]) {
        out.push(data.len() as u8);
        out.extend_from_slice(data);
    }

    pub(crate) fn push_var_u32(out: &mut Vec<u8>, v: u32) {
        push_var_bytes(out, &v.to_be_bytes());
    }

    pub(crate) fn push_var_u64(out: &mut Vec<u8>, v: u64) {
        push_var_bytes(out, &v.to_be_bytes());
    }

    pub(crate) fn record_header(kind: u8, revision: u8, flags: u8) -> Vec<u8> {
        vec![0, 0, flags, (revision << 4) | kind, 0, 0, 0, 0]
    }

    pub(crate) fn volume_payload(
        id: u32,
        name: &[u8],
        kind: u8,
        part_type: u8,
        guid: Uuid,
        flags: u8,
        trailing: &[u8],
    ) -> Vec<u8> {
        let mut p = record_header(VBLK_VOLUME, 5, flags);
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        p.push(0); // volume type 1
        p.push(0); // unknown
        p.extend([0u8; 14]); // volume state
        p.push(kind);
        p.push(0); // unknown
        p.push(1); // volume number
        p.extend([0u8; 3]);
        p.push(0); // volume flags
        push_var_u32(&mut p, 1); // children
        p.extend([0u8; 8]); // log commit id
        p.extend([0u8; 8]); // unknown
        push_var_u64(&mut p, 0x10_0000); // size
        p.extend([0u8; 4]);
        p.push(part_type);
        p.extend(guid.as_bytes());
        p.extend_from_slice(trailing);
        p
    }

    pub(crate) fn component_payload(id: u32, name: &[u8], kind: u8, volume_id: u32) -> Vec<u8> {
        let mut p = record_header(VBLK_COMPONENT, 3, 0);
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        p.push(0); // state
        p.push(kind);
        p.extend([0u8; 4]);
        push_var_u32(&mut p, 1); // children
        p.extend([0u8; 8]); // commit id
        p.extend([0u8; 8]);
        push_var_u32(&mut p, volume_id);
        p.push(0);
        p
    }

    pub(crate) fn partition_payload(
        id: u32,
        name: &[u8],
        start: u64,
        volume_offset: u64,
        size: u64,
        component_id: u32,
        disk_id: u32,
    ) -> Vec<u8> {
        let mut p = record_header(VBLK_PARTITION, 3, PartitionFields::INDEX.bits());
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        p.extend([0u8; 4]);
        p.extend([0u8; 8]); // commit id
        p.extend(start.to_be_bytes());
        p.extend(volume_offset.to_be_bytes());
        push_var_u64(&mut p, size);
        push_var_u32(&mut p, component_id);
        push_var_u32(&mut p, disk_id);
        push_var_u32(&mut p, 0); // index
        p
    }

    pub(crate) fn disk_payload_v3(id: u32, name: &[u8], guid: Uuid) -> Vec<u8> {
        let mut p = record_header(VBLK_DISK, 3, 0);
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        push_var_bytes(&mut p, guid.hyphenated().to_string().as_bytes());
        p
    }

    pub(crate) fn disk_payload_v4(id: u32, name: &[u8], guid: Uuid) -> Vec<u8> {
        let mut p = record_header(VBLK_DISK, 4, 0);
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        p.extend(guid.as_bytes());
        p
    }

    pub(crate) fn disk_group_payload(id: u32, name: &[u8]) -> Vec<u8> {
        let mut p = record_header(VBLK_DISK_GROUP, 3, 0);
        push_var_u32(&mut p, id);
        push_var_bytes(&mut p, name);
        p
    }

    fn guid(text: &str) -> Uuid {
        text.parse().unwrap()
    }

    #[test]
    fn parses_all_record_kinds() {
        let g_vol = guid("11111111-2222-3333-4444-555555555555");
        let g_disk = guid("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");

        let mut db = Database::default();
        db.parse_record(&disk_group_payload(9, b"WinDg0")).unwrap();
        db.parse_record(&disk_payload_v3(1, b"Disk1", g_disk)).unwrap();
        db.parse_record(&volume_payload(10, b"Volume1", VOLUME_TYPE_GEN, 0x07, g_vol, 0, &[]))
            .unwrap();
        db.parse_record(&component_payload(20, b"Volume1-01", COMPONENT_TYPE_SPANNED, 10))
            .unwrap();
        db.parse_record(&partition_payload(
            30,
            b"Disk1-01",
            0x100,
            0,
            0x10_0000,
            20,
            1,
        ))
        .unwrap();

        assert_eq!(db.disk_groups[&9].name, b"WinDg0");
        assert_eq!(db.disks[&1].guid, g_disk);
        assert_eq!(db.volumes[&10].name, b"Volume1");
        assert_eq!(db.volumes[&10].part_type, 0x07);
        assert_eq!(db.volumes[&10].guid, g_vol);
        assert_eq!(db.components[&20].volume_id, 10);
        assert_eq!(db.partitions.len(), 1);
        let part = &db.partitions[0];
        assert_eq!(
            (part.id, part.start, part.size, part.component_id, part.disk_id),
            (30, 0x100, 0x10_0000, 20, 1)
        );
    }

    #[test]
    fn disk_revision_4_raw_guid() {
        let g = guid("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        let mut db = Database::default();
        db.parse_record(&disk_payload_v4(2, b"Disk2", g)).unwrap();
        assert_eq!(db.disks[&2].guid, g);
    }

    #[test]
    fn disk_revision_5_rejected() {
        let mut p = record_header(VBLK_DISK, 5, 0);
        push_var_u32(&mut p, 1);
        push_var_bytes(&mut p, b"Disk1");

        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&p),
            Err(LdmError::UnsupportedRevision { entity: "disk", revision: 5 })
        ));
    }

    #[test]
    fn bad_disk_guid_text_rejected() {
        let mut p = record_header(VBLK_DISK, 3, 0);
        push_var_u32(&mut p, 1);
        push_var_bytes(&mut p, b"Disk1");
        push_var_bytes(&mut p, b"not-a-guid");

        let mut db = Database::default();
        assert!(matches!(db.parse_record(&p), Err(LdmError::InvalidGuid(_))));
    }

    #[test]
    fn non_utf8_disk_guid_text_rejected() {
        let mut p = record_header(VBLK_DISK, 3, 0);
        push_var_u32(&mut p, 1);
        push_var_bytes(&mut p, b"Disk1");
        push_var_bytes(&mut p, &[0xFF, 0xFE, 0x80]);

        let mut db = Database::default();
        assert!(matches!(db.parse_record(&p), Err(LdmError::InvalidGuid(_))));
    }

    #[test]
    fn raid5_volume_rejected() {
        let g = guid("11111111-2222-3333-4444-555555555555");
        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&volume_payload(10, b"Raid", VOLUME_TYPE_RAID5, 0x07, g, 0, &[])),
            Err(LdmError::Raid5Volume)
        ));
        assert!(db.volumes.is_empty());
    }

    #[test]
    fn unknown_volume_type_rejected() {
        let g = guid("11111111-2222-3333-4444-555555555555");
        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&volume_payload(10, b"Mirror", 0x5, 0x07, g, 0, &[])),
            Err(LdmError::UnsupportedVolumeType(0x5))
        ));
    }

    #[test]
    fn striped_component_rejected() {
        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&component_payload(20, b"Stripe", COMPONENT_TYPE_STRIPED, 10)),
            Err(LdmError::UnsupportedComponentType(COMPONENT_TYPE_STRIPED))
        ));
        assert!(matches!(
            db.parse_record(&component_payload(21, b"Raid", COMPONENT_TYPE_RAID, 10)),
            Err(LdmError::UnsupportedComponentType(COMPONENT_TYPE_RAID))
        ));
    }

    #[test]
    fn volume_drive_hint_decoded() {
        let g = guid("11111111-2222-3333-4444-555555555555");
        let mut trailing = Vec::new();
        push_var_bytes(&mut trailing, b"E:");

        let mut db = Database::default();
        db.parse_record(&volume_payload(
            10,
            b"Volume1",
            VOLUME_TYPE_GEN,
            0x07,
            g,
            VolumeFields::DRIVE_HINT.bits(),
            &trailing,
        ))
        .unwrap();
        assert_eq!(db.volumes[&10].drive_hint.as_deref(), Some(&b"E:"[..]));
    }

    #[test]
    fn names_keep_high_bytes_unchanged() {
        // legacy OEM-codepage names are not UTF-8
        let vol_name = [b'V', b'o', b'l', 0x99, 0xE4];
        let hint = [0xC4, b':', 0x80];
        let mut trailing = Vec::new();
        push_var_bytes(&mut trailing, &hint);

        let g_vol = guid("11111111-2222-3333-4444-555555555555");
        let g_disk = guid("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");

        let mut db = Database::default();
        db.parse_record(&volume_payload(
            10,
            &vol_name,
            VOLUME_TYPE_GEN,
            0x07,
            g_vol,
            VolumeFields::DRIVE_HINT.bits(),
            &trailing,
        ))
        .unwrap();
        db.parse_record(&disk_payload_v4(2, &[0xFF, b'D', 0x81], g_disk))
            .unwrap();
        db.parse_record(&disk_group_payload(9, &[0x80, 0x90, 0xA0]))
            .unwrap();

        assert_eq!(db.volumes[&10].name, vol_name);
        assert_eq!(db.volumes[&10].drive_hint.as_deref(), Some(&hint[..]));
        assert_eq!(db.disks[&2].name, [0xFF, b'D', 0x81]);
        assert_eq!(db.disk_groups[&9].name, [0x80, 0x90, 0xA0]);
    }

    #[test]
    fn volume_optional_fields_are_exclusive() {
        // with both ID1 and DRIVE_HINT set only the id1 branch is decoded
        let g = guid("11111111-2222-3333-4444-555555555555");
        let mut trailing = Vec::new();
        push_var_bytes(&mut trailing, b"id1-value");

        let mut db = Database::default();
        db.parse_record(&volume_payload(
            10,
            b"Volume1",
            VOLUME_TYPE_GEN,
            0x07,
            g,
            (VolumeFields::ID1 | VolumeFields::DRIVE_HINT).bits(),
            &trailing,
        ))
        .unwrap();
        assert_eq!(db.volumes[&10].drive_hint, None);
    }

    #[test]
    fn padding_record_ignored() {
        let mut db = Database::default();
        db.parse_record(&[0u8; 32]).unwrap();
        assert_eq!(db, Database::default());
    }

    #[test]
    fn unknown_record_kind_rejected() {
        let p = record_header(0x7, 3, 0);
        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&p),
            Err(LdmError::UnknownRecordType(0x7))
        ));
    }

    #[test]
    fn short_record_rejected() {
        let mut db = Database::default();
        assert!(matches!(
            db.parse_record(&[0u8; 4]),
            Err(LdmError::TruncatedRecord)
        ));
    }

    #[test]
    fn reparsing_is_identical() {
        let g_vol = guid("11111111-2222-3333-4444-555555555555");
        let g_disk = guid("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        let payloads = vec![
            disk_group_payload(9, b"WinDg0"),
            disk_payload_v3(1, b"Disk1", g_disk),
            volume_payload(10, b"Volume1", VOLUME_TYPE_GEN, 0x07, g_vol, 0, &[]),
            component_payload(20, b"Volume1-01", COMPONENT_TYPE_SPANNED, 10),
            partition_payload(30, b"Disk1-01", 0x100, 0, 0x10_0000, 20, 1),
        ];

        let mut first = Database::default();
        let mut second = Database::default();
        for payload in &payloads {
            first.parse_record(payload).unwrap();
        }
        for payload in &payloads {
            second.parse_record(payload).unwrap();
        }
        assert_eq!(first, second);
    }

    #[test]
    fn varint_zero_length_is_zero() {
        let raw = [0u8];
        let mut cur = Bytes::from(&raw[..]);
        assert_eq!(var_u64(&mut cur).unwrap(), 0);
    }

    #[test]
    fn varint_minimal_encoding() {
        let raw = [2u8, 0x12, 0x34];
        let mut cur = Bytes::from(&raw[..]);
        assert_eq!(var_u32(&mut cur).unwrap(), 0x1234);
    }

    #[test]
    fn varint_oversized_length_rejected() {
        let raw = [9u8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cur = Bytes::from(&raw[..]);
        assert!(matches!(var_u64(&mut cur), Err(LdmError::OversizedInteger(9))));

        let raw = [5u8, 0, 0, 0, 0, 0];
        let mut cur = Bytes::from(&raw[..]);
        assert!(matches!(var_u32(&mut cur), Err(LdmError::OversizedInteger(5))));
    }

    #[test]
    fn varint_truncated_payload_rejected() {
        let raw = [4u8, 0x12];
        let mut cur = Bytes::from(&raw[..]);
        assert!(matches!(var_u32(&mut cur), Err(LdmError::TruncatedRecord)));
    }
}

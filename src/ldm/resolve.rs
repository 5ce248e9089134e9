//! Join the parsed relations into absolute partition ranges.

use uuid::Uuid;

use super::vblk::Database;
use super::LdmError;

/// One basic partition to be carved out of the converted disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    /// First LBA on the physical disk.
    pub start: u64,
    /// Sector offset of this stretch within its volume.
    pub offset: u64,
    /// Size in sectors.
    pub size: u64,
    /// MBR partition type byte carried by the owning volume.
    pub part_type: u8,
}

/// Flatten the database into the partitions living on the current disk.
///
/// `disk_guid` comes from the PRIVHEAD of the device being converted; only
/// partitions recorded against that disk are emitted, in the order they
/// appeared in the VBLK stream. Each one must join to a component and that
/// component to a volume, or the whole device is rejected.
pub fn resolve(
    db: &Database,
    disk_guid: &Uuid,
    logical_disk_start: u64,
) -> Result<Vec<PartitionRange>, LdmError> {
    let disk = db
        .disks
        .values()
        .find(|disk| disk.guid == *disk_guid)
        .ok_or(LdmError::DiskNotFound(*disk_guid))?;

    let mut ranges = Vec::new();
    for partition in db.partitions.iter().filter(|p| p.disk_id == disk.id) {
        let component = db
            .components
            .get(&partition.component_id)
            .ok_or(LdmError::ComponentNotFound(partition.component_id))?;
        let volume = db
            .volumes
            .get(&component.volume_id)
            .ok_or(LdmError::VolumeNotFound(component.volume_id))?;

        debug!(
            "resolved {}: start {} + {}, size {}, part type {:#04x}",
            String::from_utf8_lossy(&partition.name),
            logical_disk_start,
            partition.start,
            partition.size,
            volume.part_type
        );
        ranges.push(PartitionRange {
            start: logical_disk_start + partition.start,
            offset: partition.volume_offset,
            size: partition.size,
            part_type: volume.part_type,
        });
    }

    Ok(ranges)
}

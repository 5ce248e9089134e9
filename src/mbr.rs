//! Legacy MBR codec and CHS packing.
//!
//! This module provides access to low-level primitives to work with the
//! Master Boot Record (MBR), also known as LBA0.

use crate::disk::{BlockIo, DeviceError};
use crate::DiskDevice;

use std::fmt;

use simple_bytes::{Bytes, BytesArray, BytesRead, BytesWrite};

/// The well-known MBR signature word.
pub const MBR_SIGNATURE: u16 = 0xAA55;

/// Partition type byte of the protective MBR entry in front of a GPT.
pub const OS_TYPE_EFI_PROTECTIVE: u8 = 0xEE;
/// Partition type byte of an MBR-style Windows dynamic disk.
pub const OS_TYPE_WINDOWS_LDM: u8 = 0x42;

/// Largest LBA expressible in the packed CHS encoding.
const CHS_LBA_MAX: u64 = 1023 * 255 * 63;

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned when interacting with an MBR.
pub enum MbrError {
    /// Positioned device access failed.
    Device(DeviceError),
    /// Sector 0 does not end in the 0xAA55 signature word.
    InvalidSignature(u16),
    /// The first partition record does not carry an LDM-related type.
    NotLdmDisk(u8),
}

impl From<DeviceError> for MbrError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl std::error::Error for MbrError {}

impl fmt::Display for MbrError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(fmt, "MBR device error: {e}"),
            Self::InvalidSignature(sig) => {
                write!(fmt, "invalid MBR signature {sig:#06x}")
            }
            Self::NotLdmDisk(os_type) => write!(
                fmt,
                "not a valid LDM disk (partition 0 os type {os_type:#04x})"
            ),
        }
    }
}

/// Partitioning scheme announced by sector 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiskScheme {
    /// Protective MBR in front of a GPT.
    Gpt,
    /// MBR-style dynamic disk.
    LdmMbr,
}

/// A partition record, MBR-style.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PartRecord {
    /// 0x80 for bootable, unused by EFI.
    pub boot_indicator: u8,
    /// CHS head of the first sector.
    pub start_head: u8,
    /// CHS sector of the first sector, cylinder high bits packed in.
    pub start_sector: u8,
    /// CHS cylinder of the first sector, low 8 bits.
    pub start_track: u8,
    /// OS type byte.
    pub os_type: u8,
    /// CHS head of the last sector.
    pub end_head: u8,
    /// CHS sector of the last sector, cylinder high bits packed in.
    pub end_sector: u8,
    /// CHS cylinder of the last sector, low 8 bits.
    pub end_track: u8,
    /// First LBA of the partition.
    pub lb_start: u32,
    /// Size of the partition in LBAs.
    pub lb_size: u32,
}

impl PartRecord {
    fn from_bytes(bytes: &mut impl BytesRead) -> Self {
        Self {
            boot_indicator: bytes.read_u8(),
            start_head: bytes.read_u8(),
            start_sector: bytes.read_u8(),
            start_track: bytes.read_u8(),
            os_type: bytes.read_u8(),
            end_head: bytes.read_u8(),
            end_sector: bytes.read_u8(),
            end_track: bytes.read_u8(),
            lb_start: bytes.read_le_u32(),
            lb_size: bytes.read_le_u32(),
        }
    }

    fn write_bytes(&self, bytes: &mut impl BytesWrite) {
        bytes.write_u8(self.boot_indicator);
        bytes.write_u8(self.start_head);
        bytes.write_u8(self.start_sector);
        bytes.write_u8(self.start_track);
        bytes.write_u8(self.os_type);
        bytes.write_u8(self.end_head);
        bytes.write_u8(self.end_sector);
        bytes.write_u8(self.end_track);
        bytes.write_le_u32(self.lb_start);
        bytes.write_le_u32(self.lb_size);
    }
}

/// The legacy MBR at sector 0.
///
/// Boot code and disk signature are kept byte-for-byte so a rewrite only
/// touches the partition records.
#[derive(Clone)]
pub struct Mbr {
    /// 440 bytes of BIOS boot code.
    pub boot_code: [u8; 440],
    /// 4-byte disk signature.
    pub disk_signature: [u8; 4],
    /// Usually zero.
    pub unknown: u16,
    /// The four primary partition records.
    pub partitions: [PartRecord; 4],
}

impl fmt::Debug for Mbr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MBR, partitions: {:#?}", self.partitions)
    }
}

impl Mbr {
    /// Read sector 0 and validate the MBR signature.
    pub fn read_from<D: DiskDevice>(io: &mut BlockIo<D>) -> Result<Mbr, MbrError> {
        let mut sector = [0u8; 512];
        io.read_at(0, &mut sector)?;

        let mut bytes = Bytes::from(&sector[..]);
        let mut boot_code = [0u8; 440];
        boot_code.copy_from_slice(BytesRead::read(&mut bytes, 440));
        let mut disk_signature = [0u8; 4];
        disk_signature.copy_from_slice(BytesRead::read(&mut bytes, 4));
        let unknown = bytes.read_le_u16();
        let mut partitions = [PartRecord::default(); 4];
        for record in partitions.iter_mut() {
            *record = PartRecord::from_bytes(&mut bytes);
        }

        let signature = bytes.read_le_u16();
        if signature != MBR_SIGNATURE {
            return Err(MbrError::InvalidSignature(signature));
        }

        Ok(Mbr {
            boot_code,
            disk_signature,
            unknown,
            partitions,
        })
    }

    /// Write this MBR to sector 0.
    pub fn write_to<D: DiskDevice>(&self, io: &mut BlockIo<D>) -> Result<(), MbrError> {
        io.write_at(0, &self.as_bytes())?;
        Ok(())
    }

    /// Classify the disk by the type of the first partition record.
    pub fn scheme(&self) -> Result<DiskScheme, MbrError> {
        match self.partitions[0].os_type {
            OS_TYPE_EFI_PROTECTIVE => Ok(DiskScheme::Gpt),
            OS_TYPE_WINDOWS_LDM => Ok(DiskScheme::LdmMbr),
            os_type => Err(MbrError::NotLdmDisk(os_type)),
        }
    }

    fn as_bytes(&self) -> [u8; 512] {
        let mut bytes = BytesArray::from([0u8; 512]);
        BytesWrite::write(&mut bytes, &self.boot_code);
        BytesWrite::write(&mut bytes, &self.disk_signature);
        bytes.write_le_u16(self.unknown);
        for record in &self.partitions {
            record.write_bytes(&mut bytes);
        }
        bytes.write_le_u16(MBR_SIGNATURE);
        bytes.into_array()
    }
}

/// Classical INT 13h CHS packing for an LBA.
///
/// Returns `(cylinder, head, sector)` with bits 8..10 of the cylinder packed
/// into the top two bits of the sector byte, or `(0xFF, 0xFF, 0xFF)` when
/// the LBA lies beyond the addressable CHS range.
pub fn chs_from_lba(lba: u64) -> (u8, u8, u8) {
    if lba > CHS_LBA_MAX {
        return (0xFF, 0xFF, 0xFF);
    }

    let cylinder = lba / (255 * 63);
    let head = (lba / 63) % 255;
    let sector = lba % 63;

    (
        cylinder as u8,
        head as u8,
        sector as u8 | ((cylinder >> 2) as u8 & 0xC0),
    )
}

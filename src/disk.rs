//! Disk-related types and positioned block I/O.

use crate::DiskDevice;

use std::io::SeekFrom;
use std::{fmt, io};

/// Default size of a logical sector (bytes).
pub const DEFAULT_SECTOR_SIZE: LogicalBlockSize = LogicalBlockSize::Lb512;

/// Logical block/sector size of a disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicalBlockSize {
    /// 512 bytes.
    Lb512,
    /// 4096 bytes.
    Lb4096,
}

impl LogicalBlockSize {
    /// Returns the logical block size as a `usize`.
    pub const fn as_usize(&self) -> usize {
        match self {
            LogicalBlockSize::Lb512 => 512,
            LogicalBlockSize::Lb4096 => 4096,
        }
    }

    /// Returns the logical block size as a `u64`.
    pub const fn as_u64(&self) -> u64 {
        match self {
            LogicalBlockSize::Lb512 => 512,
            LogicalBlockSize::Lb4096 => 4096,
        }
    }
}

impl From<LogicalBlockSize> for u64 {
    fn from(lb: LogicalBlockSize) -> u64 {
        lb.as_u64()
    }
}

impl From<LogicalBlockSize> for usize {
    fn from(lb: LogicalBlockSize) -> usize {
        lb.as_usize()
    }
}

impl TryFrom<u64> for LogicalBlockSize {
    type Error = io::Error;
    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            512 => Ok(LogicalBlockSize::Lb512),
            4096 => Ok(LogicalBlockSize::Lb4096),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "unsupported logical block size (must be 512 or 4096)",
            )),
        }
    }
}

impl fmt::Display for LogicalBlockSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogicalBlockSize::Lb512 => write!(f, "512"),
            LogicalBlockSize::Lb4096 => write!(f, "4096"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
/// Errors returned by positioned device access.
pub enum DeviceError {
    /// Generic IO error.
    Io(io::Error),
    /// The starting LBA of a request lies beyond the end of the device.
    OutOfRange {
        /// Requested LBA.
        lba: u64,
        /// Last addressable LBA of the device.
        last_lba: u64,
    },
    /// A byte offset computation overflowed.
    Overflow,
}

impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::error::Error for DeviceError {}

impl fmt::Display for DeviceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(fmt, "device IO error: {e}"),
            Self::OutOfRange { lba, last_lba } => {
                write!(fmt, "LBA {lba} is beyond the end of the device (last LBA {last_lba})")
            }
            Self::Overflow => write!(fmt, "device offset overflow"),
        }
    }
}

/// LBA-indexed positioned I/O over a disk device.
///
/// Short transfers are retried until the full request completes or a hard
/// error is seen; requests whose starting LBA lies beyond the end of the
/// device are rejected before any I/O happens.
#[derive(Debug)]
pub struct BlockIo<D> {
    device: D,
    lb_size: LogicalBlockSize,
}

impl<D> BlockIo<D> {
    /// Wrap a device, addressing it in sectors of the given size.
    pub fn new(device: D, lb_size: LogicalBlockSize) -> Self {
        Self { device, lb_size }
    }

    /// The sector size this device is addressed with.
    pub fn sector_size(&self) -> LogicalBlockSize {
        self.lb_size
    }

    /// Get a reference to the underlying device.
    pub fn device_ref(&self) -> &D {
        &self.device
    }

    /// Get a mutable reference to the underlying device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Take the underlying device object and force self to drop out of scope.
    pub fn take_device(self) -> D {
        self.device
    }
}

impl<D: DiskDevice> BlockIo<D> {
    /// Total size of the device in bytes.
    pub fn size_bytes(&mut self) -> Result<u64, DeviceError> {
        let old_pos = self.device.seek(SeekFrom::Current(0))?;
        let len = self.device.seek(SeekFrom::End(0))?;
        self.device.seek(SeekFrom::Start(old_pos))?;
        Ok(len)
    }

    /// Last addressable LBA of the device.
    pub fn last_lba(&mut self) -> Result<u64, DeviceError> {
        let len = self.size_bytes()?;
        let lb_size = self.lb_size.as_u64();
        if len < lb_size {
            return Err(DeviceError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device smaller than one sector",
            )));
        }
        Ok(len / lb_size - 1)
    }

    fn seek_to(&mut self, lba: u64) -> Result<(), DeviceError> {
        let last_lba = self.last_lba()?;
        if lba > last_lba {
            return Err(DeviceError::OutOfRange { lba, last_lba });
        }
        let offset = lba
            .checked_mul(self.lb_size.as_u64())
            .ok_or(DeviceError::Overflow)?;
        self.device.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Fill `buf` starting at the first byte of the given LBA.
    pub fn read_at(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        trace!("reading {} bytes at LBA {}", buf.len(), lba);
        self.seek_to(lba)?;
        self.device.read_exact(buf)?;
        Ok(())
    }

    /// Write `buf` starting at the first byte of the given LBA.
    pub fn write_at(&mut self, lba: u64, buf: &[u8]) -> Result<(), DeviceError> {
        trace!("writing {} bytes at LBA {}", buf.len(), lba);
        self.seek_to(lba)?;
        self.device.write_all(buf)?;
        self.device.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn device(sectors: usize) -> BlockIo<Cursor<Vec<u8>>> {
        BlockIo::new(Cursor::new(vec![0u8; sectors * 512]), LogicalBlockSize::Lb512)
    }

    #[test]
    fn size_and_last_lba() {
        let mut io = device(16);
        assert_eq!(io.size_bytes().unwrap(), 16 * 512);
        assert_eq!(io.last_lba().unwrap(), 15);
    }

    #[test]
    fn positioned_round_trip() {
        let mut io = device(16);
        let data = [0xA5u8; 512];
        io.write_at(3, &data).unwrap();

        let mut back = [0u8; 512];
        io.read_at(3, &mut back).unwrap();
        assert_eq!(back, data);

        // neighbours untouched
        io.read_at(2, &mut back).unwrap();
        assert_eq!(back, [0u8; 512]);
        io.read_at(4, &mut back).unwrap();
        assert_eq!(back, [0u8; 512]);
    }

    #[test]
    fn rejects_out_of_range_lba() {
        let mut io = device(16);
        let mut buf = [0u8; 512];
        assert!(matches!(
            io.read_at(16, &mut buf),
            Err(DeviceError::OutOfRange { lba: 16, last_lba: 15 })
        ));
        assert!(matches!(
            io.write_at(99, &buf),
            Err(DeviceError::OutOfRange { lba: 99, .. })
        ));
    }

    #[test]
    fn rejects_empty_device() {
        let mut io = BlockIo::new(Cursor::new(Vec::new()), LogicalBlockSize::Lb512);
        assert!(io.last_lba().is_err());
    }
}

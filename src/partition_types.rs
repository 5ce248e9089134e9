//! Well-known GPT partition type GUIDs.

use std::fmt;

use uuid::Uuid;

/// A GPT partition type.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Type {
    /// Type GUID in its canonical text byte order.
    pub guid: Uuid,
    /// Human readable description.
    pub desc: &'static str,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.desc, self.guid)
    }
}

partition_types! {
    /// An unused entry slot
    (UNUSED, "00000000-0000-0000-0000-000000000000", "Unused"),
    /// EFI System Partition
    (EFI_SYSTEM, "C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "EFI System Partition"),
    /// Microsoft Reserved Partition
    (MICROSOFT_RESERVED, "E3C9E316-0B5C-4DB8-817D-F92DF00215AE", "Microsoft Reserved Partition"),
    /// The universal "ordinary filesystem" partition type
    (BASIC_DATA, "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7", "Basic Data Partition"),
    /// The partition carrying the LDM database of a dynamic disk
    (LDM_METADATA, "5808C8AA-7E8F-42E0-85D2-E1E90434CFB3", "Logical Disk Manager Metadata Partition"),
    /// The payload partition of a dynamic disk
    (LDM_DATA, "AF9B60A0-1431-4F62-BC68-3311714A69AD", "Logical Disk Manager Data Partition"),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_guids() {
        let basic: Uuid = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7".parse().unwrap();
        assert_eq!(lookup(&basic), Some(&BASIC_DATA));

        let unknown: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        assert_eq!(lookup(&unknown), None);
    }

    #[test]
    fn unused_is_nil() {
        assert!(UNUSED.guid.is_nil());
    }
}

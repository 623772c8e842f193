//! PCI bus id and GUID parsing
//!
//! Bus ids look like `0000:02:00.0` (domain:bus:device.function). The numeric
//! key is the hex digits concatenated, so `0000:02:00.0` becomes `0x2000`.

use crate::error::{Result, TopoError};

/// Parse a bus id into its numeric form.
///
/// `:` and `.` separators are skipped; parsing stops at the first character
/// that is neither a separator nor a hex digit.
pub fn bus_id_to_u64(bus_id: &str) -> Result<u64> {
    let hex: String = bus_id
        .trim()
        .chars()
        .filter(|&c| c != ':' && c != '.')
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    if hex.is_empty() {
        return Err(TopoError::invalid("pci", "busid", bus_id));
    }
    u64::from_str_radix(&hex, 16).map_err(|_| TopoError::invalid("pci", "busid", bus_id))
}

/// Parse a bus id and clear the PCI function, so all functions of one device
/// map to the same node.
pub fn bus_id_key(bus_id: &str) -> Result<u64> {
    Ok(bus_id_to_u64(bus_id)? & !0xf)
}

/// Extract the key of the last bus id in a sysfs-style path.
///
/// `/sys/devices/pci0000:00/0000:00:02.0/0000:02:00.0/` gives `0x2000`.
pub fn pci_path_to_key(path: &str) -> Result<u64> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    bus_id_key(last)
}

/// Format a numeric bus id back to `DDDD:BB:DD.F`
pub fn u64_to_bus_id(id: u64) -> String {
    format!(
        "{:04x}:{:02x}:{:02x}.{:01x}",
        id >> 20,
        (id & 0xff000) >> 12,
        (id & 0xff0) >> 4,
        id & 0xf
    )
}

/// Whether a string has the shape of a full bus id
pub fn is_bus_id(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 12
        && b[4] == b':'
        && b[7] == b':'
        && b[10] == b'.'
        && b.iter()
            .enumerate()
            .all(|(i, c)| matches!(i, 4 | 7 | 10) || c.is_ascii_hexdigit())
}

/// Pack an InfiniBand GUID string `xxxx:xxxx:xxxx:xxxx` big-endian into a u64
pub fn ib_guid_to_u64(guid: &str) -> Result<u64> {
    let groups: Vec<&str> = guid.trim().split(':').collect();
    if groups.len() != 4 {
        return Err(TopoError::invalid("net", "sys_guid", guid));
    }
    groups.iter().try_fold(0u64, |acc, group| {
        let value = u16::from_str_radix(group, 16)
            .map_err(|_| TopoError::invalid("net", "sys_guid", guid))?;
        Ok((acc << 16) | value as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_id_parsing() {
        assert_eq!(bus_id_to_u64("0000:02:00.0").unwrap(), 0x2000);
        assert_eq!(bus_id_to_u64("0000:00:02.0").unwrap(), 0x20);
        assert_eq!(bus_id_to_u64("0001:AF:00.1").unwrap(), 0x1af001);
        // Stops at the first non-hex character
        assert_eq!(bus_id_to_u64("0000:02:00.0/extra").unwrap(), 0x2000);
        assert!(bus_id_to_u64("zz").is_err());
        assert!(bus_id_to_u64("").is_err());
    }

    #[test]
    fn test_function_masked() {
        assert_eq!(bus_id_key("0000:5e:00.1").unwrap(), bus_id_key("0000:5e:00.0").unwrap());
        assert_ne!(bus_id_key("0000:5e:00.0").unwrap(), bus_id_key("0000:5f:00.0").unwrap());
    }

    #[test]
    fn test_pci_path_to_key() {
        let path = "/sys/devices/pci0000:00/0000:00:02.0/0000:02:00.1/";
        assert_eq!(pci_path_to_key(path).unwrap(), 0x2000);
        let path = "/sys/devices/pci0000:00/0000:00:02.0";
        assert_eq!(pci_path_to_key(path).unwrap(), 0x20);
    }

    #[test]
    fn test_round_trip_format() {
        assert_eq!(u64_to_bus_id(0x2000), "0000:02:00.0");
        assert_eq!(u64_to_bus_id(0x1af001), "0001:af:00.1");
        assert_eq!(bus_id_to_u64(&u64_to_bus_id(0x3b010)).unwrap(), 0x3b010);
    }

    #[test]
    fn test_is_bus_id() {
        assert!(is_bus_id("0000:02:00.0"));
        assert!(!is_bus_id("pci0000:00"));
        assert!(!is_bus_id("0000:02:00"));
    }

    #[test]
    fn test_ib_guid() {
        assert_eq!(
            ib_guid_to_u64("0002:c903:00a1:b2c4").unwrap(),
            0x0002_c903_00a1_b2c4
        );
        assert!(ib_guid_to_u64("0002:c903").is_err());
        assert!(ib_guid_to_u64("wxyz:0:0:0").is_err());
    }
}

//! PIC32MX device geometry.
//!
//! Every supported part shares the same memory map layout and differs only in
//! program flash size, RAM size, row size and device id:
//!
//! ```text
//! 0x1D000000  +---------------------------+
//!             | bootloader (boot_length)  |
//!             +---------------------------+
//!             | application flash         |
//!             +---------------------------+ flash_start + flash_size
//!             ...
//! 0x1FC00000  +---------------------------+
//!             | boot flash                |
//! 0x1FC00BF0  +---------------------------+
//!             | configuration words       |
//! 0x1FC00C00  +---------------------------+
//! ```

use std::fmt;

use crate::error::{Error, Result};

const FLASH_START: u32 = 0x1D00_0000;
const BOOT_START: u32 = 0x1FC0_0000;
const CONFIGURATION_START: u32 = 0x1FC0_0BF0;
const CONFIGURATION_SIZE: u32 = 0x1FC0_0C00 - CONFIGURATION_START;
const PAGE_SIZE: u32 = 1024;

/// Geometry of one PIC32MX part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceGeometry {
    /// Part name, e.g. `PIC32MX150F128B`.
    pub name: &'static str,
    /// Value of the DEVID register reported by the bootloader.
    pub device_id: u32,
    /// Flash page (erase unit) size in bytes.
    pub page_size: u32,
    /// Flash row (program unit) size in bytes.
    pub row_size: u32,
    /// RAM size in bytes.
    pub ram_size: u32,
    /// Start of program flash (physical address).
    pub flash_start: u32,
    /// Program flash size in bytes.
    pub flash_size: u32,
    /// Start of boot flash (physical address).
    pub boot_start: u32,
    /// Boot flash size in bytes, including the configuration words.
    pub boot_size: u32,
    /// Start of the configuration words.
    pub configuration_start: u32,
    /// Size of the configuration words.
    pub configuration_size: u32,
}

impl DeviceGeometry {
    const fn new(name: &'static str, flash_kb: u32, ram_kb: u32, row_size: u32, device_id: u32) -> Self {
        Self {
            name,
            device_id,
            page_size: PAGE_SIZE,
            row_size,
            ram_size: ram_kb * 1024,
            flash_start: FLASH_START,
            flash_size: flash_kb * 1024,
            boot_start: BOOT_START,
            boot_size: 3 * 1024,
            configuration_start: CONFIGURATION_START,
            configuration_size: CONFIGURATION_SIZE,
        }
    }

    /// All supported parts.
    pub fn all() -> &'static [DeviceGeometry] {
        DEVICES
    }

    /// Look up a part by name.
    ///
    /// Matching is case-insensitive and the `PIC32` prefix is optional, so
    /// `pic32mx150f128b` and `MX150F128B` select the same part.
    pub fn by_name(name: &str) -> Result<&'static DeviceGeometry> {
        let upper = name.trim().to_ascii_uppercase();
        let wanted = upper.strip_prefix("PIC32").unwrap_or(&upper);
        DEVICES
            .iter()
            .find(|d| d.name.strip_prefix("PIC32") == Some(wanted))
            .ok_or_else(|| Error::UnknownDeviceName(name.to_string()))
    }

    /// Look up a part by device id. Parts sharing an id resolve to the first entry.
    pub fn by_device_id(device_id: u32) -> Result<&'static DeviceGeometry> {
        DEVICES
            .iter()
            .find(|d| d.device_id == device_id)
            .ok_or(Error::UnknownDevice(device_id))
    }

    /// One past the last program flash address.
    pub fn flash_end(&self) -> u32 {
        self.flash_start + self.flash_size
    }

    /// One past the last boot flash address.
    pub fn boot_end(&self) -> u32 {
        self.boot_start + self.boot_size
    }

    /// Whether `address` lies inside boot flash.
    pub fn in_boot_flash(&self, address: u32) -> bool {
        (self.boot_start..self.boot_end()).contains(&address)
    }
}

impl fmt::Display for DeviceGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[rustfmt::skip]
static DEVICES: &[DeviceGeometry] = &[
    DeviceGeometry::new("PIC32MX110F016B",  16,  4, 128, 0x04A0_7053),
    DeviceGeometry::new("PIC32MX110F016C",  16,  4, 128, 0x04A0_9053),
    DeviceGeometry::new("PIC32MX110F016D",  16,  4, 128, 0x04A0_B053),

    DeviceGeometry::new("PIC32MX120F032B",  32,  8, 128, 0x04A0_6053),
    DeviceGeometry::new("PIC32MX120F032C",  32,  8, 128, 0x04A0_8053),
    DeviceGeometry::new("PIC32MX120F032D",  32,  8, 128, 0x04A0_A053),

    DeviceGeometry::new("PIC32MX130F064B",  64, 16, 128, 0x04D0_7053),
    DeviceGeometry::new("PIC32MX130F064C",  64, 16, 128, 0x04D0_9053),
    DeviceGeometry::new("PIC32MX130F064D",  64, 16, 128, 0x04D0_B053),

    DeviceGeometry::new("PIC32MX150F128B", 128, 32, 128, 0x04D0_8053),
    DeviceGeometry::new("PIC32MX150F128C", 128, 32, 128, 0x04D0_8053),
    DeviceGeometry::new("PIC32MX150F128D", 128, 32, 128, 0x04D0_A053),

    DeviceGeometry::new("PIC32MX170F256B", 128, 64, 256, 0x0661_0053),
    DeviceGeometry::new("PIC32MX170F256D", 128, 64, 256, 0x0661_A053),

    DeviceGeometry::new("PIC32MX210F016B",  16,  4, 128, 0x04A0_1053),
    DeviceGeometry::new("PIC32MX210F016C",  16,  4, 128, 0x04A0_3053),
    DeviceGeometry::new("PIC32MX210F016D",  16,  4, 128, 0x04A0_5053),

    DeviceGeometry::new("PIC32MX220F032B",  32,  8, 128, 0x04A0_0053),
    DeviceGeometry::new("PIC32MX220F032C",  32,  8, 128, 0x04A0_2053),
    DeviceGeometry::new("PIC32MX220F032D",  32,  8, 128, 0x04A0_4053),

    DeviceGeometry::new("PIC32MX230F064B",  64, 16, 128, 0x04D0_1053),
    DeviceGeometry::new("PIC32MX230F064C",  64, 16, 128, 0x04D0_3053),
    DeviceGeometry::new("PIC32MX230F064D",  64, 16, 128, 0x04D0_5053),

    DeviceGeometry::new("PIC32MX250F128B", 128, 32, 128, 0x04D0_0053),
    DeviceGeometry::new("PIC32MX250F128C", 128, 32, 128, 0x04D0_2053),
    DeviceGeometry::new("PIC32MX250F128D", 128, 32, 128, 0x04D0_4053),

    DeviceGeometry::new("PIC32MX270F256B", 256, 64, 128, 0x0660_0053),
    DeviceGeometry::new("PIC32MX270F256D", 256, 64, 128, 0x0660_A053),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let dev = DeviceGeometry::by_name("pic32mx150f128b").unwrap();
        assert_eq!(dev.name, "PIC32MX150F128B");
        assert_eq!(dev.device_id, 0x04D08053);

        let dev = DeviceGeometry::by_name("MX270F256D").unwrap();
        assert_eq!(dev.name, "PIC32MX270F256D");
    }

    #[test]
    fn test_lookup_unknown_name() {
        assert!(matches!(
            DeviceGeometry::by_name("PIC32MZ2048"),
            Err(Error::UnknownDeviceName(_))
        ));
    }

    #[test]
    fn test_lookup_by_device_id() {
        let dev = DeviceGeometry::by_device_id(0x06610053).unwrap();
        assert_eq!(dev.name, "PIC32MX170F256B");
        assert_eq!(dev.row_size, 256);

        // B and C variants of the MX150 share an id
        let dev = DeviceGeometry::by_device_id(0x04D08053).unwrap();
        assert_eq!(dev.name, "PIC32MX150F128B");

        assert!(matches!(
            DeviceGeometry::by_device_id(0xDEADBEEF),
            Err(Error::UnknownDevice(0xDEADBEEF))
        ));
    }

    #[test]
    fn test_configuration_sits_at_end_of_boot_flash() {
        for dev in DeviceGeometry::all() {
            assert_eq!(
                dev.boot_end(),
                dev.configuration_start + dev.configuration_size,
                "{dev}"
            );
            assert!(dev.page_size.is_power_of_two());
            assert!(dev.row_size.is_power_of_two());
            assert_eq!(dev.page_size % dev.row_size, 0);
        }
    }

    #[test]
    fn test_boot_flash_window() {
        let dev = DeviceGeometry::by_name("PIC32MX250F128B").unwrap();
        assert_eq!(dev.flash_end(), 0x1D020000);
        assert!(dev.in_boot_flash(0x1FC00000));
        assert!(dev.in_boot_flash(0x1FC00BFF));
        assert!(!dev.in_boot_flash(0x1FC00C00));
        assert!(!dev.in_boot_flash(0x1D000000));
    }
}

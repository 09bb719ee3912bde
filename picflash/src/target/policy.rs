//! Write policy: which address windows an image may touch.

use crate::error::{Error, Result};
use crate::image::memory::AllowedRegion;
use crate::target::DeviceGeometry;

/// Controls which parts of the device an image is allowed to overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashPolicy {
    /// Size of the bootloader at the start of program flash, as reported by
    /// the bootloader's info command. These bytes are never written.
    pub boot_length: u32,
    /// Allow writes into boot flash.
    pub allow_boot_flash: bool,
    /// Allow writes into the last boot flash page, which holds the
    /// configuration words.
    pub allow_configuration: bool,
}

impl FlashPolicy {
    /// Policy with the default permissions for a bootloader of `boot_length` bytes.
    pub fn new(boot_length: u32) -> Self {
        Self {
            boot_length,
            allow_boot_flash: true,
            allow_configuration: false,
        }
    }

    /// Set whether boot flash may be written.
    #[must_use]
    pub fn with_boot_flash(mut self, allow: bool) -> Self {
        self.allow_boot_flash = allow;
        self
    }

    /// Set whether the configuration page may be written.
    #[must_use]
    pub fn with_configuration(mut self, allow: bool) -> Self {
        self.allow_configuration = allow;
        self
    }

    /// Compute the allowed regions for `device`.
    pub fn allowed_regions(&self, device: &DeviceGeometry) -> Result<Vec<AllowedRegion>> {
        if self.boot_length > device.flash_size {
            return Err(Error::Config(format!(
                "bootloader size {:#X} exceeds flash size {:#X} of {device}",
                self.boot_length, device.flash_size
            )));
        }

        let mut regions = vec![AllowedRegion::new(
            device.flash_start + self.boot_length,
            device.flash_size - self.boot_length,
        )];

        if self.allow_boot_flash {
            if device.configuration_start <= device.boot_start
                || device.boot_end() != device.configuration_start + device.configuration_size
            {
                return Err(Error::Config(format!(
                    "configuration words of {device} are not at the end of boot flash"
                )));
            }

            let mut length = device.boot_size;
            if !self.allow_configuration {
                // the whole last page goes: it cannot be written without erasing it
                length = (length - 1) & !(device.page_size - 1);
            }
            regions.push(AllowedRegion::new(device.boot_start, length));
        }

        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mx150() -> &'static DeviceGeometry {
        DeviceGeometry::by_name("PIC32MX150F128B").unwrap()
    }

    #[test]
    fn test_default_policy_regions() {
        let regions = FlashPolicy::new(0x1000).allowed_regions(mx150()).unwrap();
        assert_eq!(
            regions,
            vec![
                AllowedRegion::new(0x1D001000, 0x20000 - 0x1000),
                AllowedRegion::new(0x1FC00000, 0x800),
            ]
        );
    }

    #[test]
    fn test_configuration_page_allowed() {
        let regions = FlashPolicy::new(0x1000)
            .with_configuration(true)
            .allowed_regions(mx150())
            .unwrap();
        assert_eq!(regions[1], AllowedRegion::new(0x1FC00000, 0xC00));
    }

    #[test]
    fn test_boot_flash_disallowed() {
        let regions = FlashPolicy::new(0x1000)
            .with_boot_flash(false)
            .allowed_regions(mx150())
            .unwrap();
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_boot_length_larger_than_flash() {
        let err = FlashPolicy::new(0x40000).allowed_regions(mx150());
        assert!(matches!(err, Err(Error::Config(_))));
    }
}

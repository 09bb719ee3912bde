//! Target devices supported by the bootloader.
//!
//! - [`pic32`]: the PIC32MX geometry table (page/row size, address windows, device ids)
//! - [`policy`]: which parts of a device an image may overwrite

pub mod pic32;
pub mod policy;

pub use pic32::DeviceGeometry;
pub use policy::FlashPolicy;

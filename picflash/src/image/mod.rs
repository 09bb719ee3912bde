//! Firmware image construction and storage.
//!
//! The pipeline runs one way:
//!
//! ```text
//! hex text -> records -> memory runs -> clamped runs -> blocks -> packets -> Image
//! ```
//!
//! - [`hex`]: Intel HEX record parsing
//! - [`memory`]: contiguous runs and region clamping
//! - [`block`]: page/row aligned blocks and their random ordering
//! - [`builder`]: the full pipeline, including encryption
//! - [`file`]: the persisted image format

pub mod block;
pub mod builder;
pub mod file;
pub mod hex;
pub mod memory;

pub use builder::ImageBuilder;
pub use file::Image;

//! Bootloader wire protocol.

pub mod codes;
pub mod crc;
pub mod link;
pub mod packet;

// Re-export common types
pub use codes::{AckCode, NackCode, Response};
pub use link::{AutoAction, LinkEvent, LinkProtocol, LinkState};
pub use packet::Packet;

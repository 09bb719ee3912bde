//! Write packet framing.
//!
//! ## Packet Format
//!
//! ```text
//! +-----+----------+---------------------------------------------+
//! | 'W' | len (BE) |                   payload                   |
//! +-----+----------+---------------------------------------------+
//! |  1  |    2     |                   len bytes                 |
//! +-----+----------+---------------------------------------------+
//! ```
//!
//! Data payload (before encryption):
//!
//! ```text
//! +-----------------+--------------+-------------+--------------+
//! |   page bytes    | address (BE) | used (BE)   |  CRC32-K (BE)|
//! +-----------------+--------------+-------------+--------------+
//! |   page size     |      4       |      2      |      4       |
//! +-----------------+--------------+-------------+--------------+
//! ```
//!
//! The CRC covers every payload byte before it. An encrypted image starts
//! with an IV packet (8-byte IV + CRC, never encrypted). A packet with an
//! empty payload ends the transmission.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{Error, Result};
use crate::protocol::crc::crc32k;

/// Write command byte.
pub const WRITE_COMMAND: u8 = b'W';

/// Command byte plus payload length.
pub const HEADER_LEN: usize = 3;

/// Address, used length and CRC following the page bytes.
pub const DATA_TRAILER_LEN: usize = 4 + 2 + 4;

/// Length of the initialization vector.
pub const IV_LEN: usize = 8;

/// Payload length of the IV packet.
pub const IV_PAYLOAD_LEN: usize = IV_LEN + 4;

/// A write packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Page data to write.
    Data {
        /// Target address of the first byte.
        address: u32,
        /// Number of leading `data` bytes the bootloader writes.
        used_length: u16,
        /// Page-sized data, padded past `used_length`.
        data: Vec<u8>,
    },
    /// Cipher initialization vector.
    Iv([u8; IV_LEN]),
    /// End of transmission.
    End,
}

impl Packet {
    /// Frame the packet into wire bytes.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Self::Data {
                address,
                used_length,
                data,
            } => {
                payload.extend_from_slice(data);
                payload.write_u32::<BigEndian>(*address).unwrap();
                payload.write_u16::<BigEndian>(*used_length).unwrap();
            },
            Self::Iv(iv) => payload.extend_from_slice(iv),
            Self::End => {},
        }
        if !payload.is_empty() {
            let crc = crc32k(&payload);
            payload.write_u32::<BigEndian>(crc).unwrap();
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(WRITE_COMMAND);
        buf.write_u16::<BigEndian>(payload.len() as u16).unwrap();
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decode plaintext wire bytes as an end or data packet, checking the
    /// CRC. The IV packet has no marker of its own; use
    /// [`Packet::decode_iv`] for the first packet of an encrypted image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload = payload(bytes)?;
        if payload.is_empty() {
            return Ok(Self::End);
        }
        if payload.len() < DATA_TRAILER_LEN {
            return Err(Error::Protocol(format!(
                "payload of {} bytes is too short for a data packet",
                payload.len()
            )));
        }

        let body = checked_body(payload)?;
        let split = body.len() - 6;
        Ok(Self::Data {
            address: BigEndian::read_u32(&body[split..split + 4]),
            used_length: BigEndian::read_u16(&body[split + 4..]),
            data: body[..split].to_vec(),
        })
    }

    /// Decode the IV packet that leads an encrypted image.
    pub fn decode_iv(bytes: &[u8]) -> Result<[u8; IV_LEN]> {
        let payload = payload(bytes)?;
        if payload.len() != IV_PAYLOAD_LEN {
            return Err(Error::Protocol(format!(
                "payload of {} bytes is not an IV",
                payload.len()
            )));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(checked_body(payload)?);
        Ok(iv)
    }
}

/// Payload without its trailing CRC, once the CRC matches.
fn checked_body(payload: &[u8]) -> Result<&[u8]> {
    let (body, crc) = payload.split_at(payload.len() - 4);
    let expected = BigEndian::read_u32(crc);
    let actual = crc32k(body);
    if actual != expected {
        return Err(Error::Protocol(format!(
            "CRC mismatch: expected {expected:#010X}, got {actual:#010X}"
        )));
    }
    Ok(body)
}

/// Payload of framed packet bytes.
pub fn payload(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_LEN || bytes[0] != WRITE_COMMAND {
        return Err(Error::Protocol("not a write packet".into()));
    }
    let len = usize::from(BigEndian::read_u16(&bytes[1..3]));
    if bytes.len() != HEADER_LEN + len {
        return Err(Error::Protocol(format!(
            "payload length {len} does not match packet size {}",
            bytes.len()
        )));
    }
    Ok(&bytes[HEADER_LEN..])
}

/// Whether framed bytes have the shape of an IV packet. Only the first
/// packet of an image can be one; data packets always carry a full page.
/// Works on encrypted images too, since the header and the IV packet are
/// never encrypted.
pub fn is_iv_packet(bytes: &[u8]) -> bool {
    payload(bytes).is_ok_and(|p| p.len() == IV_PAYLOAD_LEN)
}

/// Whether framed bytes are the end-of-transmission packet.
pub fn is_end_packet(bytes: &[u8]) -> bool {
    bytes == [WRITE_COMMAND, 0, 0]
}

//! Image file format.
//!
//! ## Layout
//!
//! ```text
//! +--------+-----------+-----------+-----------+---------------------------+
//! | "HCFF" | version   | device id | count     | count x (len, bytes)      |
//! +--------+-----------+-----------+-----------+---------------------------+
//! |   4    | 4 (LE)    | 4 (LE)    | 4 (LE)    | 4 (LE) + len              |
//! +--------+-----------+-----------+-----------+---------------------------+
//! ```
//!
//! Every stored block is one framed write packet, in transmission order.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::error::{Error, Result};
use crate::protocol::packet;
use crate::target::DeviceGeometry;

/// File magic.
pub const IMAGE_MAGIC: &[u8; 4] = b"HCFF";

/// File format version.
pub const IMAGE_VERSION: u32 = 0x0001_0001;

/// An ordered list of framed packets for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    device: &'static DeviceGeometry,
    packets: Vec<Vec<u8>>,
}

impl Image {
    /// Create an image from framed packets.
    pub fn new(device: &'static DeviceGeometry, packets: Vec<Vec<u8>>) -> Self {
        Self { device, packets }
    }

    /// Target device.
    pub fn device(&self) -> &'static DeviceGeometry {
        self.device
    }

    /// Framed packets in transmission order.
    pub fn packets(&self) -> &[Vec<u8>] {
        &self.packets
    }

    /// Number of packets, including the IV and end packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the image holds no packets.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Whether the image starts with an IV packet.
    pub fn is_encrypted(&self) -> bool {
        self.packets
            .first()
            .is_some_and(|p| packet::is_iv_packet(p))
    }

    /// Serialize to the file format.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_bytes(&self) -> Vec<u8> {
        let total: usize = self.packets.iter().map(|p| 4 + p.len()).sum();
        let mut buf = Vec::with_capacity(16 + total);
        buf.extend_from_slice(IMAGE_MAGIC);
        buf.write_u32::<LittleEndian>(IMAGE_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(self.device.device_id).unwrap();
        buf.write_u32::<LittleEndian>(self.packets.len() as u32).unwrap();
        for packet in &self.packets {
            buf.write_u32::<LittleEndian>(packet.len() as u32).unwrap();
            buf.extend_from_slice(packet);
        }
        buf
    }

    /// Parse the file format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| Error::InvalidImage("file too short".into()))?;
        if &magic != IMAGE_MAGIC {
            return Err(Error::InvalidImage("wrong file header".into()));
        }

        let version = read_u32(&mut cursor, "version")?;
        if version != IMAGE_VERSION {
            return Err(Error::InvalidImage(format!(
                "unsupported version {version:#010X}"
            )));
        }

        let device = DeviceGeometry::by_device_id(read_u32(&mut cursor, "device id")?)?;
        let count = read_u32(&mut cursor, "block count")? as usize;

        let mut packets = Vec::with_capacity(count.min(4096));
        for index in 0..count {
            let len = read_u32(&mut cursor, "block length")? as usize;
            let remaining = data.len() - cursor.position() as usize;
            if len > remaining {
                return Err(Error::InvalidImage(format!(
                    "block {index} needs {len} bytes, {remaining} left"
                )));
            }
            let mut packet = vec![0u8; len];
            cursor.read_exact(&mut packet)?;
            packets.push(packet);
        }

        if (cursor.position() as usize) != data.len() {
            return Err(Error::InvalidImage("trailing bytes after last block".into()));
        }

        Ok(Self { device, packets })
    }

    /// Write the image to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())?;
        debug!("Wrote {} packets to {}", self.packets.len(), path.display());
        Ok(())
    }

    /// Read an image from `path`.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image file: {}", path.display());
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }
}

fn read_u32(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::InvalidImage(format!("truncated {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Packet;
    use tempfile::tempdir;

    fn mx250() -> &'static DeviceGeometry {
        DeviceGeometry::by_name("PIC32MX250F128B").unwrap()
    }

    fn sample_image() -> Image {
        let data = Packet::Data {
            address: 0x1D00_1000,
            used_length: 4,
            data: vec![1, 2, 3, 4, 0xA5, 0x5A, 0x00, 0xFF],
        }
        .encode();
        Image::new(mx250(), vec![data, Packet::End.encode()])
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_image().to_bytes();
        assert_eq!(&bytes[..4], b"HCFF");
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x01, 0x00]);
        assert_eq!(&bytes[8..12], &0x04D0_0053u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[2, 0, 0, 0]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("firmware.img");
        let image = sample_image();
        image.write(&path).unwrap();

        let loaded = Image::read(&path).unwrap();
        assert_eq!(loaded.device().device_id, image.device().device_id);
        assert_eq!(loaded.packets(), image.packets());
        assert_eq!(fs::read(&path).unwrap(), loaded.to_bytes());
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut bytes = sample_image().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Image::from_bytes(&bytes),
            Err(Error::InvalidImage(_))
        ));

        let mut bytes = sample_image().to_bytes();
        bytes[4] = 0x02;
        assert!(matches!(
            Image::from_bytes(&bytes),
            Err(Error::InvalidImage(_))
        ));

        let mut bytes = sample_image().to_bytes();
        bytes[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        assert!(matches!(
            Image::from_bytes(&bytes),
            Err(Error::UnknownDevice(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = sample_image().to_bytes();
        for len in [0, 3, 10, 17, bytes.len() - 1] {
            assert!(Image::from_bytes(&bytes[..len]).is_err(), "length {len}");
        }
    }

    #[test]
    fn test_encryption_detection() {
        assert!(!sample_image().is_encrypted());
        let iv = Packet::Iv([0; 8]).encode();
        let image = Image::new(mx250(), vec![iv, Packet::End.encode()]);
        assert!(image.is_encrypted());
    }
}

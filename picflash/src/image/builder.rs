//! Hex file to image pipeline.

use std::path::Path;

use log::{debug, info};
use rand::CryptoRng;

use crate::crypto::{Key, PacketCipher};
use crate::error::Result;
use crate::image::block::{self, Block};
use crate::image::file::Image;
use crate::image::hex::HexFile;
use crate::image::memory::{self, MemoryRun};
use crate::protocol::packet::{IV_LEN, Packet};
use crate::target::{DeviceGeometry, FlashPolicy};

/// Builds an [`Image`] from Intel HEX input.
///
/// ```rust,no_run
/// use picflash::{DeviceGeometry, FlashPolicy, ImageBuilder};
///
/// # fn main() -> picflash::Result<()> {
/// let device = DeviceGeometry::by_name("PIC32MX250F128B")?;
/// let image = ImageBuilder::new(device, FlashPolicy::new(0x1000)).build_from_file("app.hex")?;
/// image.write("app.img")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    device: &'static DeviceGeometry,
    policy: FlashPolicy,
    key: Option<Key>,
    strict: bool,
}

impl ImageBuilder {
    /// Builder for `device` with strict hex parsing and no encryption.
    pub fn new(device: &'static DeviceGeometry, policy: FlashPolicy) -> Self {
        Self {
            device,
            policy,
            key: None,
            strict: true,
        }
    }

    /// Encrypt the image with `key`. This also shuffles the blocks.
    #[must_use]
    pub fn with_key(mut self, key: Option<Key>) -> Self {
        self.key = key;
        self
    }

    /// Set strict hex parsing.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Build from a hex file.
    pub fn build_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Image> {
        let hex = HexFile::from_file(path, self.strict)?;
        self.build(&hex)
    }

    /// Build from hex text.
    pub fn build_from_str(&self, text: &str) -> Result<Image> {
        let hex = HexFile::parse(text, self.strict)?;
        self.build(&hex)
    }

    /// Build from parsed hex records using the thread-local CSPRNG.
    pub fn build(&self, hex: &HexFile) -> Result<Image> {
        self.build_with_rng(hex, &mut rand::rng())
    }

    /// Build from parsed hex records using `rng` for padding, block order
    /// and the IV.
    pub fn build_with_rng<R>(&self, hex: &HexFile, rng: &mut R) -> Result<Image>
    where
        R: CryptoRng + ?Sized,
    {
        info!(
            "{} records, {} failed lines",
            hex.records.len(),
            hex.failed_lines
        );

        let assembly = memory::assemble(&hex.records);
        let runs = self.clamp_runs(assembly.runs)?;

        let mut blocks: Vec<Block> = runs
            .iter()
            .flat_map(|run| block::pack_run(run, self.device.page_size, self.device.row_size, rng))
            .collect();
        debug!("Packed {} blocks", blocks.len());

        if self.key.is_some() {
            debug!("Randomly permuting blocks");
            block::shuffle_blocks(&mut blocks, self.device.boot_start, rng);
        }

        let mut packets: Vec<Vec<u8>> = blocks
            .into_iter()
            .map(|b| {
                Packet::Data {
                    address: b.address,
                    used_length: b.used_length,
                    data: b.payload,
                }
                .encode()
            })
            .collect();

        if let Some(key) = &self.key {
            let mut iv = [0u8; IV_LEN];
            rng.fill_bytes(&mut iv);
            let mut cipher = PacketCipher::new(key, &iv);
            for packet in &mut packets {
                cipher.encrypt_packet(packet);
            }
            packets.insert(0, Packet::Iv(iv).encode());
        }

        packets.push(Packet::End.encode());
        info!("Image for {} holds {} packets", self.device, packets.len());
        Ok(Image::new(self.device, packets))
    }

    fn clamp_runs(&self, runs: Vec<MemoryRun>) -> Result<Vec<MemoryRun>> {
        let regions = self.policy.allowed_regions(self.device)?;
        let mut kept = Vec::with_capacity(runs.len());
        for run in runs {
            let clamped = memory::clamp(&run, &regions)?;
            if clamped.is_empty() {
                info!("Run at {:#010X} removed", run.address);
                continue;
            }
            if clamped.data.len() != run.data.len() {
                info!(
                    "Run at {:#010X} shortened from {:#X} to {:#X} bytes",
                    run.address,
                    run.data.len(),
                    clamped.data.len()
                );
            }
            debug!("{:#010X} -> {:#X}", clamped.address, clamped.data.len());
            kept.push(clamped);
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::image::hex::{HexRecord, RecordType};
    use crate::protocol::packet::{self, HEADER_LEN};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const BOOT_LENGTH: u32 = 0x1000;

    fn device() -> &'static DeviceGeometry {
        DeviceGeometry::by_name("PIC32MX250F128B").unwrap()
    }

    fn builder() -> ImageBuilder {
        ImageBuilder::new(device(), FlashPolicy::new(BOOT_LENGTH))
    }

    fn key() -> Key {
        Key::new([
            0x0123_4567,
            0x89AB_CDEF,
            0xFEDC_BA98,
            0x7654_3210,
            1,
            2,
            3,
            4,
        ])
    }

    /// Two 4-byte records 16 bytes apart in application flash.
    const TWO_RECORDS: &str = "\
:020000041D00DD
:0410000001020304E2
:0410100005060708C2
:00000001FF
";

    fn decode_all(image: &Image) -> Vec<Packet> {
        image
            .packets()
            .iter()
            .map(|p| Packet::decode(p).unwrap())
            .collect()
    }

    #[test]
    fn test_two_records_two_blocks() {
        let mut rng = StdRng::seed_from_u64(1);
        let hex = HexFile::parse(TWO_RECORDS, true).unwrap();
        let image = builder().build_with_rng(&hex, &mut rng).unwrap();

        let packets = decode_all(&image);
        assert_eq!(packets.len(), 3);
        let expected = [(0x1D00_1000, [1, 2, 3, 4]), (0x1D00_1010, [5, 6, 7, 8])];
        for (packet, (addr, bytes)) in packets.iter().zip(expected) {
            match packet {
                Packet::Data {
                    address,
                    used_length,
                    data,
                } => {
                    assert_eq!(*address, addr);
                    assert_eq!(*used_length, 4);
                    assert_eq!(data.len(), 1024);
                    assert_eq!(&data[..4], &bytes);
                    assert!(data[4..].iter().any(|&b| b != 0));
                },
                other => panic!("unexpected packet {other:?}"),
            }
        }
        assert_eq!(packets[2], Packet::End);
    }

    #[test]
    fn test_last_packet_is_end_marker() {
        let mut rng = StdRng::seed_from_u64(2);
        let hex = HexFile::parse(TWO_RECORDS, true).unwrap();
        for builder in [builder(), builder().with_key(Some(key()))] {
            let image = builder.build_with_rng(&hex, &mut rng).unwrap();
            let last = image.packets().last().unwrap();
            assert_eq!(last.len(), 3);
            assert!(packet::is_end_packet(last));
        }
    }

    #[test]
    fn test_bootloader_area_is_dropped() {
        // data at the very start of program flash belongs to the bootloader
        let text = ":020000041D00DD\n:0400000001020304F2\n:00000001FF\n";
        let image = builder().build_from_str(text).unwrap();
        assert_eq!(decode_all(&image), vec![Packet::End]);
    }

    #[test]
    fn test_run_overlapping_bootloader_is_shortened() {
        let dev = device();
        let hex = HexFile {
            records: vec![HexRecord {
                address: dev.flash_start + BOOT_LENGTH - 4,
                record_type: RecordType::Data,
                data: vec![0xAA, 0xAA, 0xAA, 0xAA, 1, 2, 3, 4],
                valid: true,
            }],
            failed_lines: 0,
        };
        let image = builder().build(&hex).unwrap();
        let packets = decode_all(&image);
        assert_eq!(packets.len(), 2);
        let Packet::Data {
            address,
            used_length,
            data,
        } = &packets[0]
        else {
            panic!("unexpected packet {:?}", packets[0]);
        };
        assert_eq!(*address, dev.flash_start + BOOT_LENGTH);
        assert_eq!(*used_length, 4);
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bootloader_larger_than_flash_fails() {
        let hex = HexFile::parse(TWO_RECORDS, true).unwrap();
        let builder = ImageBuilder::new(device(), FlashPolicy::new(0x100_0000));
        assert!(matches!(builder.build(&hex), Err(Error::Config(_))));
    }

    #[test]
    fn test_encrypted_image() {
        let mut rng = StdRng::seed_from_u64(3);
        let hex = HexFile::parse(TWO_RECORDS, true).unwrap();
        let image = builder()
            .with_key(Some(key()))
            .build_with_rng(&hex, &mut rng)
            .unwrap();

        assert!(image.is_encrypted());
        assert_eq!(image.len(), 4);
        let iv = Packet::decode_iv(&image.packets()[0]).unwrap();

        // decrypting in order restores valid data packets
        let mut cipher = PacketCipher::new(&key(), &iv);
        let mut addresses = Vec::new();
        for bytes in &image.packets()[1..3] {
            let mut plain = bytes.clone();
            cipher.encrypt_packet(&mut plain);
            assert_eq!(&plain[..HEADER_LEN], &bytes[..HEADER_LEN]);
            match Packet::decode(&plain).unwrap() {
                Packet::Data { address, .. } => addresses.push(address),
                other => panic!("unexpected packet {other:?}"),
            }
        }
        addresses.sort_unstable();
        assert_eq!(addresses, vec![0x1D00_1000, 0x1D00_1010]);
    }

    #[test]
    fn test_boot_flash_block_comes_first_when_encrypted() {
        // one page of application flash plus two pages of boot flash
        let mut text = String::from(":020000041D00DD\n");
        text.push_str(&hex_lines(0x2000, 1024));
        text.push_str(":020000041FC01B\n");
        text.push_str(&hex_lines(0x0000, 2048));
        text.push_str(":00000001FF\n");

        let policy = FlashPolicy::new(BOOT_LENGTH).with_configuration(true);
        let builder = ImageBuilder::new(device(), policy).with_key(Some(key()));
        let hex = HexFile::parse(&text, true).unwrap();

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let image = builder.build_with_rng(&hex, &mut rng).unwrap();
            let iv = Packet::decode_iv(&image.packets()[0]).unwrap();
            let mut first = image.packets()[1].clone();
            PacketCipher::new(&key(), &iv).encrypt_packet(&mut first);
            match Packet::decode(&first).unwrap() {
                Packet::Data { address, .. } => assert_eq!(address, 0x1FC0_0000),
                other => panic!("unexpected packet {other:?}"),
            }
        }
    }

    /// Data records of 16 bytes covering `len` bytes from `address`.
    fn hex_lines(address: u16, len: usize) -> String {
        let mut out = String::new();
        for offset in (0..len).step_by(16) {
            let addr = address + offset as u16;
            let mut bytes = vec![16u8, (addr >> 8) as u8, addr as u8, 0];
            bytes.extend((0..16).map(|i| (offset + i) as u8));
            let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            bytes.push(sum.wrapping_neg());
            out.push(':');
            out.push_str(&hex::encode_upper(bytes));
            out.push('\n');
        }
        out
    }
}

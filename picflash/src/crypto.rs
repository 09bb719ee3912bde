//! Packet encryption.
//!
//! Encrypted images use ChaCha20 with the original 64-bit nonce layout
//! (8-byte IV, 64-bit block counter) and 20 rounds. The key is given as eight
//! 32-bit words, each stored big-endian.
//!
//! Each packet payload is encrypted as a separate call: the keystream for a
//! packet always starts on a fresh 64-byte block, and whatever was left of
//! the previous block is discarded. The bootloader decrypts the same way.

use std::fs;
use std::path::Path;

use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use log::debug;

use crate::error::{Error, Result};
use crate::protocol::packet::{HEADER_LEN, IV_LEN};

/// Number of key words in a key file.
pub const KEY_WORDS: usize = 8;

const BLOCK_LEN: u64 = 64;

/// A 256-bit key as eight 32-bit words.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u32; KEY_WORDS]);

impl Key {
    /// Create a key from its words.
    pub fn new(words: [u32; KEY_WORDS]) -> Self {
        Self(words)
    }

    /// Key words.
    pub fn words(&self) -> &[u32; KEY_WORDS] {
        &self.0
    }

    /// Expand to 32 key bytes, each word big-endian.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    /// Parse key file text: exactly eight whitespace separated hex words,
    /// each with an optional `0x` prefix.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != KEY_WORDS {
            return Err(Error::KeyFile(format!(
                "expected {KEY_WORDS} words, found {}",
                tokens.len()
            )));
        }

        let mut words = [0u32; KEY_WORDS];
        for (word, token) in words.iter_mut().zip(&tokens) {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            *word = u32::from_str_radix(digits, 16)
                .map_err(|e| Error::KeyFile(format!("bad word '{token}': {e}")))?;
        }
        Ok(Self(words))
    }

    /// Load a key file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading key file: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

// Keys never end up in logs.
impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Encrypts packet payloads in image order.
pub struct PacketCipher {
    cipher: ChaCha20Legacy,
}

impl PacketCipher {
    /// Create a cipher for `key` and `iv`.
    pub fn new(key: &Key, iv: &[u8; IV_LEN]) -> Self {
        let key = key.to_bytes();
        Self {
            cipher: ChaCha20Legacy::new(&key.into(), &(*iv).into()),
        }
    }

    /// Encrypt (or decrypt) `data` starting on a fresh keystream block.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
        let pos: u64 = self.cipher.current_pos();
        let next = pos.div_ceil(BLOCK_LEN) * BLOCK_LEN;
        self.cipher.seek(next);
    }

    /// Encrypt the payload of a framed packet, leaving its 3-byte header.
    pub fn encrypt_packet(&mut self, packet: &mut [u8]) {
        if packet.len() > HEADER_LEN {
            self.apply(&mut packet[HEADER_LEN..]);
        }
    }
}

/// Known answer for an all-zero key and IV: the first keystream block.
const ZERO_BLOCK_0: [u8; 64] = [
    0x76, 0xb8, 0xe0, 0xad, 0xa0, 0xf1, 0x3d, 0x90, 0x40, 0x5d, 0x6a, 0xe5, 0x53, 0x86, 0xbd, 0x28,
    0xbd, 0xd2, 0x19, 0xb8, 0xa0, 0x8d, 0xed, 0x1a, 0xa8, 0x36, 0xef, 0xcc, 0x8b, 0x77, 0x0d, 0xc7,
    0xda, 0x41, 0x59, 0x7c, 0x51, 0x57, 0x48, 0x8d, 0x77, 0x24, 0xe0, 0x3f, 0xb8, 0xd8, 0x4a, 0x37,
    0x6a, 0x43, 0xb8, 0xf4, 0x15, 0x18, 0xa1, 0x1c, 0xc3, 0x87, 0xb6, 0x69, 0xb2, 0xee, 0x65, 0x86,
];

/// Start of the second keystream block for the same key and IV.
const ZERO_BLOCK_1_PREFIX: [u8; 16] = [
    0x9f, 0x07, 0xe7, 0xbe, 0x55, 0x51, 0x38, 0x7a, 0x98, 0xba, 0x97, 0x7c, 0x73, 0x2d, 0x08, 0x0d,
];

/// Check the cipher against published test vectors, including the
/// per-packet block alignment. Nothing may be flashed if this fails.
pub fn self_test() -> Result<()> {
    let zero_key = Key::new([0; KEY_WORDS]);
    let zero_iv = [0u8; IV_LEN];

    let mut cipher = PacketCipher::new(&zero_key, &zero_iv);
    let mut block = [0u8; 64];
    cipher.apply(&mut block);
    if block != ZERO_BLOCK_0 {
        return Err(Error::SelfTest("cipher keystream block 0 mismatch".into()));
    }

    // a short packet still consumes a whole block
    let mut cipher = PacketCipher::new(&zero_key, &zero_iv);
    let mut first = [0u8; 10];
    cipher.apply(&mut first);
    let mut second = [0u8; 16];
    cipher.apply(&mut second);
    if first[..] != ZERO_BLOCK_0[..10] || second != ZERO_BLOCK_1_PREFIX {
        return Err(Error::SelfTest("cipher keystream block alignment mismatch".into()));
    }

    // decrypting restores the plaintext
    let plaintext: Vec<u8> = (0..=255u8).collect();
    let mut data = plaintext.clone();
    PacketCipher::new(&zero_key, &zero_iv).apply(&mut data);
    PacketCipher::new(&zero_key, &zero_iv).apply(&mut data);
    if data != plaintext {
        return Err(Error::SelfTest("cipher round trip mismatch".into()));
    }

    debug!("Cipher self-test passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_test_passes() {
        self_test().unwrap();
    }

    #[test]
    fn test_key_bytes_are_big_endian_words() {
        let key = Key::new([0x0011_2233, 0x4455_6677, 0, 0, 0, 0, 0, 0xDEAD_BEEF]);
        let bytes = key.to_bytes();
        assert_eq!(&bytes[..8], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        assert_eq!(&bytes[28..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_parse_key_file() {
        let key = Key::parse("0x00112233 44556677\n 0X8899aabb ccddeeff\n0 1 2\t3\n").unwrap();
        assert_eq!(
            key.words(),
            &[0x00112233, 0x44556677, 0x8899AABB, 0xCCDDEEFF, 0, 1, 2, 3]
        );
    }

    #[test]
    fn test_parse_key_file_rejects_bad_input() {
        assert!(matches!(Key::parse("1 2 3 4 5 6 7"), Err(Error::KeyFile(_))));
        assert!(matches!(
            Key::parse("1 2 3 4 5 6 7 8 9"),
            Err(Error::KeyFile(_))
        ));
        assert!(matches!(
            Key::parse("1 2 3 4 5 6 7 zz"),
            Err(Error::KeyFile(_))
        ));
        assert!(matches!(
            Key::parse("1 2 3 4 5 6 7 123456789"),
            Err(Error::KeyFile(_))
        ));
    }

    #[test]
    fn test_encrypt_packet_skips_header() {
        let key = Key::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let iv = [9u8; IV_LEN];
        let mut packet = vec![b'W', 0x00, 0x04, 1, 2, 3, 4];
        PacketCipher::new(&key, &iv).encrypt_packet(&mut packet);
        assert_eq!(&packet[..3], &[b'W', 0x00, 0x04]);
        assert_ne!(&packet[3..], &[1, 2, 3, 4]);

        PacketCipher::new(&key, &iv).encrypt_packet(&mut packet);
        assert_eq!(packet, vec![b'W', 0x00, 0x04, 1, 2, 3, 4]);
    }

    #[test]
    fn test_debug_hides_key() {
        let key = Key::new([0xDEAD_BEEF; KEY_WORDS]);
        assert_eq!(format!("{key:?}"), "Key(..)");
    }
}

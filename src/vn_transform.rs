//! Payload transforms and key material.
//!
//! A transform turns an inner packet into wrapper bytes and back, given the
//! SA's key and the wrapper's SPI and sequence number. The gateway never looks
//! inside the bytes, so any cipher can be plugged in behind `PayloadTransform`.
//!
//! Two implementations ship:
//!
//! - `KeyedStreamTransform` (default): BLAKE3 keyed XOF keystream with a
//!   16-byte keyed BLAKE3 tag over SPI, sequence and ciphertext.
//! - `AdditiveTransform`: byte-wise addition of the key, no integrity. Kept as
//!   a toy stand-in; it is not confidential against a motivated observer.
//!
//! Neither is intended as real cryptography.

use std::fmt;

use argon2::{Argon2, Params, Version};
use rand::Rng;

use crate::vn_error::ConfigurationError;
use crate::vn_interface::{SeqNo, Spi};

pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

const SPI_KEY_CONTEXT: &str = "vpn-netsim 2024 per-spi sa key";
const PASSPHRASE_SALT_CONTEXT: &str = "vpn-netsim passphrase salt";

// Argon2id cost for passphrase stretching (memory in KiB)
const ARGON2_MEMORY_KIB: u32 = 1024;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_LANES: u32 = 1;

/// 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parse 64 hex digits
    pub fn from_hex(s: &str) -> Result<Self, ConfigurationError> {
        let s = s.trim();
        if !s.is_ascii() {
            return Err(ConfigurationError::InvalidKey(
                "hex key contains non-ASCII characters".to_string(),
            ));
        }
        if s.len() != KEY_LEN * 2 {
            return Err(ConfigurationError::InvalidKey(format!(
                "expected {} hex digits, got {}",
                KEY_LEN * 2,
                s.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                ConfigurationError::InvalidKey(format!("invalid hex '{}' at offset {}", pair, i * 2))
            })?;
        }
        Ok(Self(key))
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_LEN];
        rng.fill(&mut key);
        Self(key)
    }

    /// Stretch a passphrase with Argon2id. The salt is fixed per `context`, so
    /// both gateways derive the same master key from the same passphrase.
    pub fn from_passphrase(passphrase: &str, context: &str) -> Result<Self, ConfigurationError> {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_LANES,
            Some(KEY_LEN),
        )
        .map_err(|e| ConfigurationError::InvalidKey(format!("invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let salt = blake3::derive_key(PASSPHRASE_SALT_CONTEXT, context.as_bytes());
        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), &salt[..16], &mut key)
            .map_err(|e| ConfigurationError::InvalidKey(format!("Argon2 hashing error: {}", e)))?;
        Ok(Self(key))
    }

    /// Per-SA key: each SPI gets independent key material from one master key
    pub fn derive_for_spi(&self, spi: Spi) -> Self {
        let mut input = [0u8; KEY_LEN + 4];
        input[..KEY_LEN].copy_from_slice(&self.0);
        input[KEY_LEN..].copy_from_slice(&spi.to_be_bytes());
        Self(blake3::derive_key(SPI_KEY_CONTEXT, &input))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // fingerprint only, never the key
        let fp = blake3::hash(&self.0);
        let b = fp.as_bytes();
        write!(f, "KeyMaterial({:02x}{:02x}{:02x}{:02x}..)", b[0], b[1], b[2], b[3])
    }
}

/// Reversible keyed transform applied to the inner packet bytes
pub trait PayloadTransform {
    fn name(&self) -> &'static str;

    /// Bytes added to every sealed payload
    fn overhead(&self) -> usize;

    fn seal(&self, key: &KeyMaterial, spi: Spi, seq: SeqNo, plaintext: &[u8]) -> Vec<u8>;

    /// None if the bytes fail the transform's integrity check
    fn open(&self, key: &KeyMaterial, spi: Spi, seq: SeqNo, sealed: &[u8]) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedStreamTransform;

impl KeyedStreamTransform {
    fn keystream(key: &KeyMaterial, spi: Spi, seq: SeqNo, len: usize) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new_keyed(key.as_bytes());
        hasher.update(b"stream");
        hasher.update(&spi.to_be_bytes());
        hasher.update(&seq.to_be_bytes());
        let mut out = vec![0u8; len];
        hasher.finalize_xof().fill(&mut out);
        out
    }

    fn tag(key: &KeyMaterial, spi: Spi, seq: SeqNo, ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = blake3::Hasher::new_keyed(key.as_bytes());
        hasher.update(b"tag");
        hasher.update(&spi.to_be_bytes());
        hasher.update(&seq.to_be_bytes());
        hasher.update(ciphertext);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&hasher.finalize().as_bytes()[..TAG_LEN]);
        tag
    }
}

impl PayloadTransform for KeyedStreamTransform {
    fn name(&self) -> &'static str {
        "keyed-stream"
    }

    fn overhead(&self) -> usize {
        TAG_LEN
    }

    fn seal(&self, key: &KeyMaterial, spi: Spi, seq: SeqNo, plaintext: &[u8]) -> Vec<u8> {
        let stream = Self::keystream(key, spi, seq, plaintext.len());
        let mut out: Vec<u8> = plaintext
            .iter()
            .zip(stream.iter())
            .map(|(p, k)| p ^ k)
            .collect();
        let tag = Self::tag(key, spi, seq, &out);
        out.extend_from_slice(&tag);
        out
    }

    fn open(&self, key: &KeyMaterial, spi: Spi, seq: SeqNo, sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < TAG_LEN {
            return None;
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        if Self::tag(key, spi, seq, ciphertext)[..] != *tag {
            return None;
        }
        let stream = Self::keystream(key, spi, seq, ciphertext.len());
        Some(
            ciphertext
                .iter()
                .zip(stream.iter())
                .map(|(c, k)| c ^ k)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveTransform;

impl PayloadTransform for AdditiveTransform {
    fn name(&self) -> &'static str {
        "additive"
    }

    fn overhead(&self) -> usize {
        0
    }

    fn seal(&self, key: &KeyMaterial, _spi: Spi, seq: SeqNo, plaintext: &[u8]) -> Vec<u8> {
        let k = key.as_bytes();
        plaintext
            .iter()
            .enumerate()
            .map(|(i, b)| b.wrapping_add(k[i % KEY_LEN]).wrapping_add(seq as u8))
            .collect()
    }

    fn open(&self, key: &KeyMaterial, _spi: Spi, seq: SeqNo, sealed: &[u8]) -> Option<Vec<u8>> {
        let k = key.as_bytes();
        Some(
            sealed
                .iter()
                .enumerate()
                .map(|(i, b)| b.wrapping_sub(seq as u8).wrapping_sub(k[i % KEY_LEN]))
                .collect(),
        )
    }
}

/// Look a transform up by its configuration name
pub fn transform_by_name(name: &str) -> Option<Box<dyn PayloadTransform>> {
    match name {
        "keyed-stream" => Some(Box::new(KeyedStreamTransform)),
        "additive" => Some(Box::new(AdditiveTransform)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key(b: u8) -> KeyMaterial {
        KeyMaterial::from_bytes([b; KEY_LEN])
    }

    #[test]
    fn test_keyed_stream_round_trip() {
        let t = KeyedStreamTransform;
        let pt: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        let sealed = t.seal(&key(1), 0x100, 1, &pt);

        assert_eq!(sealed.len(), pt.len() + t.overhead());
        assert_ne!(&sealed[..pt.len()], &pt[..]);
        assert_eq!(t.open(&key(1), 0x100, 1, &sealed), Some(pt));
    }

    #[test]
    fn test_keyed_stream_rejects_tampering_and_wrong_context() {
        let t = KeyedStreamTransform;
        let sealed = t.seal(&key(1), 0x100, 1, b"hello");

        let mut flipped = sealed.clone();
        flipped[0] ^= 1;
        assert_eq!(t.open(&key(1), 0x100, 1, &flipped), None);
        assert_eq!(t.open(&key(2), 0x100, 1, &sealed), None);
        assert_eq!(t.open(&key(1), 0x101, 1, &sealed), None);
        assert_eq!(t.open(&key(1), 0x100, 2, &sealed), None);
        assert_eq!(t.open(&key(1), 0x100, 1, &sealed[..4]), None);
    }

    #[test]
    fn test_keystream_differs_per_sequence() {
        let t = KeyedStreamTransform;
        let pt = vec![0u8; 64];
        assert_ne!(t.seal(&key(1), 1, 1, &pt), t.seal(&key(1), 1, 2, &pt));
    }

    #[test]
    fn test_additive_round_trip() {
        let t = AdditiveTransform;
        let pt = b"some payload bytes".to_vec();
        let sealed = t.seal(&key(9), 1, 3, &pt);
        assert_ne!(sealed, pt);
        assert_eq!(t.open(&key(9), 1, 3, &sealed), Some(pt));
    }

    #[test]
    fn test_hex_keys() {
        let hex = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let k = KeyMaterial::from_hex(hex).unwrap();
        assert_eq!(k.as_bytes()[1], 0x11);
        assert_eq!(k.as_bytes()[15], 0xff);

        assert!(KeyMaterial::from_hex("abcd").is_err());
        let bad = hex.replace('a', "g");
        assert!(matches!(
            KeyMaterial::from_hex(&bad),
            Err(ConfigurationError::InvalidKey(_))
        ));

        // 64 bytes, but 'é' splits a digit pair
        let odd = format!("{}\u{e9}0", "0".repeat(61));
        assert_eq!(odd.len(), 64);
        assert!(matches!(
            KeyMaterial::from_hex(&odd),
            Err(ConfigurationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_spi_derivation_separates_directions() {
        let master = key(5);
        assert_ne!(master.derive_for_spi(0x100), master.derive_for_spi(0x101));
        assert_eq!(master.derive_for_spi(0x100), master.derive_for_spi(0x100));
        assert_ne!(master.derive_for_spi(0x100), master);
    }

    #[test]
    fn test_passphrase_is_deterministic() {
        let a = KeyMaterial::from_passphrase("correct horse", "r0-r2").unwrap();
        let b = KeyMaterial::from_passphrase("correct horse", "r0-r2").unwrap();
        let c = KeyMaterial::from_passphrase("correct horse", "r0-r3").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_random_keys_follow_seed() {
        let mut r1 = StdRng::from_seed([3u8; 32]);
        let mut r2 = StdRng::from_seed([3u8; 32]);
        assert_eq!(KeyMaterial::random(&mut r1), KeyMaterial::random(&mut r2));
    }

    #[test]
    fn test_debug_hides_key() {
        let s = format!("{:?}", key(0xAB));
        assert!(s.starts_with("KeyMaterial("));
        // 4-byte fingerprint only
        assert_eq!(s.len(), "KeyMaterial(..)".len() + 8);
    }

    #[test]
    fn test_transform_by_name() {
        assert_eq!(transform_by_name("additive").unwrap().name(), "additive");
        assert_eq!(transform_by_name("keyed-stream").unwrap().overhead(), TAG_LEN);
        assert!(transform_by_name("rot13").is_none());
    }
}

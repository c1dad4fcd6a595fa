//! Authenticated encryption and compression for both key layers of the store.
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce) so a fresh random nonce can be
//! drawn on every seal without tracking state.
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Sealed wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]

use std::fmt;
use std::io::{Read, Write};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 16;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 64 * 1024; // 64 MiB
pub const KDF_PARALLELISM: u32 = 1;

// ── Keys ─────────────────────────────────────────────────────────────────────

/// 32-byte symmetric key. Zeroized on drop, redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Copy `bytes` into a key, rejecting anything but exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Derive the access key for a store from the user passphrase + public salt.
///
/// Argon2id, tuned for interactive use. The salt is stored in the envelope
/// (`keySalt`) and must be at least 8 bytes.
pub fn access_key(passphrase: &[u8], salt: &[u8]) -> Result<Key> {
    let params = Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(KEY_SIZE),
    )
    .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; KEY_SIZE];
    let derived = argon
        .hash_password_into(passphrase, salt, &mut out)
        .map_err(|e| Error::KeyDerivation(e.to_string()));
    let key = Key(out);
    out.zeroize();
    derived.map(|_| key)
}

/// Generate a fresh random salt for a new access key.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// ── AEAD ─────────────────────────────────────────────────────────────────────

/// Encrypt `plaintext`, prepending a random 24-byte nonce.
/// `aad` is authenticated but not encrypted.
pub fn encrypt(key: &Key, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| Error::Encrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| Error::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &Key, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decrypt);
    }
    let (nonce_bytes, ct) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| Error::Decrypt)?;
    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| Error::Decrypt)?;

    Ok(Zeroizing::new(plaintext))
}

// ── Compression ──────────────────────────────────────────────────────────────

/// zlib-compress `data`. The output is as sensitive as the input.
pub fn compress(data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    enc.write_all(data).map_err(Error::Compression)?;
    let packed = enc.finish().map_err(Error::Compression)?;
    Ok(Zeroizing::new(packed))
}

pub fn decompress(data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::with_capacity(data.len() * 4));
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(Error::Compression)?;
    Ok(out)
}

//! Random and HKDF-seeded credential generation.
//!
//! Both generators share one bit-packing scheme. A 64-bit buffer is
//! refilled from the source (8 little-endian bytes) whenever fewer bits
//! remain than one selection is charged; each selection takes
//! `buf % n` and divides the buffer by `n`.
//!
//! This is modular reduction, not rejection sampling, so there is a small
//! bias toward low indexes. That is accepted for password generation here;
//! do not reuse the packer where a perfectly uniform draw is required.
//!
//! Characters are always charged 7 bits (enough for the full 90-symbol
//! alphabet) so switching charsets never changes the bit budget.

use std::ops::BitOr;
use std::sync::OnceLock;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

pub const MIN_CHARS: usize = 8;
pub const MIN_WORDS: usize = 3;

const BITS_PER_CHAR: u32 = 7;
const HKDF_MAX_BYTES: usize = 255 * 32;

const LETTER_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGIT_CHARS: &[u8] = b"0123456789";
const SYMBOL_CHARS: &[u8] = b"!#$%&()*+,-./:;<=>?@[]^_{|}~";

const WORDLIST: &str = include_str!("wordlist.txt");

// ── Charset ──────────────────────────────────────────────────────────────────

/// Character classes to draw from. Letters are always included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Charset(u8);

impl Charset {
    pub const LETTERS: Charset = Charset(0);
    pub const DIGITS: Charset = Charset(1);
    pub const SYMBOLS: Charset = Charset(2);
    pub const ALL: Charset = Charset(3);

    pub fn contains(self, other: Charset) -> bool {
        self.0 & other.0 == other.0
    }

    /// Letters, then digits, then symbols, as enabled.
    pub fn alphabet(self) -> Vec<u8> {
        let mut out = LETTER_CHARS.to_vec();
        if self.contains(Charset::DIGITS) {
            out.extend_from_slice(DIGIT_CHARS);
        }
        if self.contains(Charset::SYMBOLS) {
            out.extend_from_slice(SYMBOL_CHARS);
        }
        out
    }
}

impl BitOr for Charset {
    type Output = Charset;

    fn bitor(self, rhs: Charset) -> Charset {
        Charset(self.0 | rhs.0)
    }
}

// ── Bit sources ──────────────────────────────────────────────────────────────

trait Entropy {
    fn next_u64(&mut self) -> Result<u64>;
}

/// The OS CSPRNG.
struct OsEntropy;

impl Entropy for OsEntropy {
    fn next_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        rand::rngs::OsRng
            .try_fill_bytes(&mut b)
            .map_err(|e| Error::Entropy(e.to_string()))?;
        let v = u64::from_le_bytes(b);
        b.zeroize();
        Ok(v)
    }
}

/// HKDF-SHA256 output, expanded up front for a known number of refills.
struct HkdfEntropy {
    okm: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl HkdfEntropy {
    fn new(ikm: &[u8], salt: &[u8], info: &[u8], refills: usize) -> Result<Self> {
        let len = refills * 8;
        if len > HKDF_MAX_BYTES {
            return Err(Error::InvalidLength(len));
        }
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = Zeroizing::new(vec![0u8; len]);
        hk.expand(info, &mut okm)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(Self { okm, pos: 0 })
    }
}

impl Entropy for HkdfEntropy {
    fn next_u64(&mut self) -> Result<u64> {
        let chunk = self
            .okm
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| Error::Entropy("HKDF stream exhausted".into()))?;
        let mut b = [0u8; 8];
        b.copy_from_slice(chunk);
        self.pos += 8;
        let v = u64::from_le_bytes(b);
        b.zeroize();
        Ok(v)
    }
}

struct BitPacker<E: Entropy> {
    src: E,
    buf: u64,
    avail: u32,
}

impl<E: Entropy> BitPacker<E> {
    fn new(src: E) -> Self {
        Self {
            src,
            buf: 0,
            avail: 0,
        }
    }

    /// Select an index below `n`, charging `bits` from the buffer.
    fn draw(&mut self, n: usize, bits: u32) -> Result<usize> {
        if self.avail < bits {
            self.buf = self.src.next_u64()?;
            self.avail = 64;
        }
        let n = n as u64;
        let v = self.buf % n;
        self.buf /= n;
        self.avail -= bits;
        Ok(v as usize)
    }
}

impl<E: Entropy> Drop for BitPacker<E> {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// Number of 64-bit refills needed for `count` selections of `bits` each.
fn refills_for(count: usize, bits: u32) -> usize {
    count.div_ceil((64 / bits) as usize)
}

// ── Generators ───────────────────────────────────────────────────────────────

fn pack_chars<E: Entropy>(src: E, length: usize, charset: Charset) -> Result<Zeroizing<String>> {
    let alphabet = charset.alphabet();
    let mut packer = BitPacker::new(src);
    let mut out = Zeroizing::new(String::with_capacity(length));
    for _ in 0..length {
        let i = packer.draw(alphabet.len(), BITS_PER_CHAR)?;
        out.push(alphabet[i] as char);
    }
    Ok(out)
}

/// `length` random characters (at least [`MIN_CHARS`]) from the OS CSPRNG.
pub fn random_chars(length: usize, charset: Charset) -> Result<Zeroizing<String>> {
    pack_chars(OsEntropy, length.max(MIN_CHARS), charset)
}

/// Deterministic characters from HKDF-SHA256(ikm = `passphrase`,
/// salt = `seed`, info = `salt`). Same inputs, same output.
pub fn hashed_chars(
    length: usize,
    charset: Charset,
    passphrase: &[u8],
    seed: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<String>> {
    let length = length.max(MIN_CHARS);
    let src = HkdfEntropy::new(passphrase, seed, salt, refills_for(length, BITS_PER_CHAR))
        .map_err(|e| match e {
            Error::InvalidLength(_) => Error::InvalidLength(length),
            other => other,
        })?;
    pack_chars(src, length, charset)
}

/// `count` random words (at least [`MIN_WORDS`]) joined by `joiner`.
pub fn random_words(count: usize, joiner: &str) -> Result<String> {
    let list = words();
    let bits = word_bits();
    let mut packer = BitPacker::new(OsEntropy);
    let mut picked = Vec::with_capacity(count.max(MIN_WORDS));
    for _ in 0..count.max(MIN_WORDS) {
        picked.push(list[packer.draw(list.len(), bits)?]);
    }
    Ok(picked.join(joiner))
}

/// The embedded word list.
pub fn words() -> &'static [&'static str] {
    static WORDS: OnceLock<Vec<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| WORDLIST.lines().filter(|w| !w.is_empty()).collect())
}

/// Bits charged per word: `ceil(log2(len))`.
fn word_bits() -> u32 {
    words().len().next_power_of_two().trailing_zeros()
}

//! Deterministic password derivation from a secret and a site name.
//!
//! The keystream is an HMAC-SHA256 chain keyed by the secret:
//!
//! ```text
//! msg    = site                  (no salt)
//!        | site "/" salt         (with salt)
//! block0 = HMAC(secret, msg)
//! blockN = HMAC(secret, msg "#" <bytes produced so far, decimal>)
//! ```
//!
//! Each keystream byte selects one character via [`pick`]. The message
//! scheme, the rounding in [`pick`] and the order of every built-in alphabet
//! are a compatibility contract: changing any of them changes every
//! password ever issued.

use std::borrow::Cow;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SALT_SEPARATOR: char = '/';
const EXTEND_SEPARATOR: char = '#';

// ── Alphabets ────────────────────────────────────────────────────────────────

/// Ordered character set. Position matters: it fixes the byte→char mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet(Cow<'static, [u8]>);

pub static UPPERCASE: Alphabet = Alphabet(Cow::Borrowed(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
pub static LOWERCASE: Alphabet = Alphabet(Cow::Borrowed(b"abcdefghijklmnopqrstuvwxyz"));
pub static LETTERS: Alphabet = Alphabet(Cow::Borrowed(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
));
pub static DIGITS: Alphabet = Alphabet(Cow::Borrowed(b"0123456789"));
pub static PUNCTUATION: Alphabet = Alphabet(Cow::Borrowed(b"!@#$%^&*-_=+,.:/?"));
pub static NO_PUNCT: Alphabet = Alphabet(Cow::Borrowed(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789",
));
pub static ALL: Alphabet = Alphabet(Cow::Borrowed(
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*-_=+,.:/?",
));

impl Alphabet {
    /// Parse `+`-joined tokens (`upper`, `lower`, `letters`, `digits`,
    /// `punct`, `nopunct`, `all`) into their union, in token order.
    pub fn parse(tokens: &str) -> Result<Self> {
        let mut out: Vec<u8> = Vec::new();
        for token in tokens.split('+').map(str::trim) {
            let part: &Alphabet = match token.to_ascii_lowercase().as_str() {
                "upper" | "uppercase" => &UPPERCASE,
                "lower" | "lowercase" => &LOWERCASE,
                "letters" => &LETTERS,
                "digits" => &DIGITS,
                "punct" | "punctuation" => &PUNCTUATION,
                "nopunct" => &NO_PUNCT,
                "all" => &ALL,
                _ => return Err(Error::UnknownAlphabet(token.to_string())),
            };
            for &c in part.as_bytes() {
                if !out.contains(&c) {
                    out.push(c);
                }
            }
        }
        Ok(Self(Cow::Owned(out)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pick(&self, b: u8) -> char {
        pick(&self.0, b) as char
    }

    /// Informational strength estimate: `floor(log2(len)) * length` bits.
    pub fn entropy(&self, length: usize) -> usize {
        match self.len() {
            0 => 0,
            n => n.ilog2() as usize * length,
        }
    }
}

/// Map `b` onto `alphabet` by uniform scaling:
/// `ceil((b + 1) / 256 * len) - 1`, computed exactly in integers.
///
/// Panics if `alphabet` is empty.
pub fn pick(alphabet: &[u8], b: u8) -> u8 {
    let n = alphabet.len();
    let pos = ((b as usize + 1) * n).div_ceil(256) - 1;
    alphabet[pos]
}

// ── Derivation ───────────────────────────────────────────────────────────────

/// Inputs to one derivation. Not `Debug`: it borrows the secret.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub alphabet: &'a Alphabet,
    pub site: &'a str,
    pub salt: &'a str,
    pub secret: &'a str,
}

impl Context<'_> {
    /// An `n`-character password drawn from the context's alphabet.
    pub fn password(&self, n: usize) -> Result<String> {
        if n == 0 {
            return Err(Error::InvalidLength(n));
        }
        if self.alphabet.is_empty() {
            return Err(Error::UnknownAlphabet(String::new()));
        }
        let stream = self.keystream(n);
        Ok(stream.iter().map(|&b| self.alphabet.pick(b)).collect())
    }

    /// Fill a positional template, one keystream byte per template char:
    ///
    /// | char | replaced by |
    /// |------|-------------|
    /// | `^`  | uppercase letter |
    /// | `_`  | lowercase letter |
    /// | `#`  | digit |
    /// | `*`  | letter of either case |
    /// | `?`  | punctuation |
    /// | `~`  | letter or digit |
    ///
    /// Any other character is copied through; its byte is still consumed.
    pub fn format(&self, template: &str) -> String {
        let stream = self.keystream(template.chars().count());
        template
            .chars()
            .zip(stream.iter())
            .map(|(c, &b)| match c {
                '^' => UPPERCASE.pick(b),
                '_' => LOWERCASE.pick(b),
                '#' => DIGITS.pick(b),
                '*' => LETTERS.pick(b),
                '?' => PUNCTUATION.pick(b),
                '~' => NO_PUNCT.pick(b),
                other => other,
            })
            .collect()
    }

    pub fn entropy(&self, length: usize) -> usize {
        self.alphabet.entropy(length)
    }

    fn message(&self) -> String {
        let mut msg = self.site.to_string();
        if !self.salt.is_empty() {
            msg.push(SALT_SEPARATOR);
            msg.push_str(self.salt);
        }
        msg
    }

    fn keystream(&self, n: usize) -> Zeroizing<Vec<u8>> {
        let msg = self.message();
        let mut out = Zeroizing::new(Vec::with_capacity(n + 32));
        while out.len() < n {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(msg.as_bytes());
            if !out.is_empty() {
                mac.update(format!("{EXTEND_SEPARATOR}{}", out.len()).as_bytes());
            }
            out.extend_from_slice(&mac.finalize().into_bytes());
        }
        out.truncate(n);
        out
    }
}

//! Record schema persisted inside the encrypted store.

mod strings;

pub use strings::Strings;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::collab::OtpGenerator;
use crate::error::{Error, Result};
use crate::hashpass::{self, Context};
use crate::randpass::{self, Charset};

/// Password length used when neither the record nor the defaults set one.
pub const DEFAULT_HASHPASS_LENGTH: usize = 18;

/// Decrypted store payload.
///
/// Dropping it wipes the credential fields (see [`Database::wipe_secrets`]).
/// Labels, hosts and notes are left as they are, as are records moved or
/// cloned out beforehand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Defaults>,
    #[serde(default)]
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashpass: Option<HashpassInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebConfig>,
}

/// Lock policy for the web front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebConfig {
    #[serde(default, rename = "lockPIN", skip_serializing_if = "String::is_empty")]
    pub lock_pin: String,
    /// Human duration such as `"5m"`; empty disables the idle lock.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lock_timeout: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashpass: Option<HashpassInfo>,
    #[serde(default, skip_serializing_if = "Strings::is_empty")]
    pub hosts: Strings,
    #[serde(default, skip_serializing_if = "Strings::is_empty")]
    pub addrs: Strings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detail>,
    /// otpauth:// URL, consumed by an [`OtpGenerator`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    pub label: String,
    #[serde(default)]
    pub value: String,
    /// Display policy only; the value is stored like everything else.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

/// Hashpass settings as stored, at record or database level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashpassInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Positional template, see [`hashpass::Context::format`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub punct: Option<bool>,
}

/// Fully merged generation settings for one record. Never persisted.
#[derive(Clone)]
pub struct HashpassConfig {
    pub secret: Zeroizing<String>,
    pub tag: String,
    pub seed: String,
    pub length: usize,
    pub format: String,
    pub charset: Charset,
}

impl std::fmt::Debug for HashpassConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashpassConfig")
            .field("tag", &self.tag)
            .field("seed", &self.seed)
            .field("length", &self.length)
            .field("format", &self.format)
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

impl HashpassConfig {
    /// Derive the password these settings describe.
    ///
    /// A template (`format`) goes through the HMAC keystream with the seed as
    /// site and the tag as salt; otherwise characters come from the HKDF
    /// stream keyed by the secret.
    pub fn generate(&self) -> Result<Zeroizing<String>> {
        if !self.format.is_empty() {
            let ctx = Context {
                alphabet: &hashpass::ALL,
                site: &self.seed,
                salt: &self.tag,
                secret: &self.secret,
            };
            return Ok(Zeroizing::new(ctx.format(&self.format)));
        }
        randpass::hashed_chars(
            self.length,
            self.charset,
            self.secret.as_bytes(),
            self.seed.as_bytes(),
            self.tag.as_bytes(),
        )
    }
}

impl Record {
    /// Short name for listings: the label, else the title.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.title
        } else {
            &self.label
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Current one-time code for this record, `time_offset` steps from now.
    pub fn otp_code<G: OtpGenerator + ?Sized>(&self, generator: &G, time_offset: i64) -> Result<String> {
        let url = self
            .otp
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::NoOtp(self.display_name().to_string()))?;
        generator.generate(url, time_offset)
    }

    /// Zero the stored password, hashpass secret, OTP URL and hidden details.
    pub fn wipe_secrets(&mut self) {
        self.password.zeroize();
        if let Some(hp) = self.hashpass.as_mut() {
            hp.secret_key.zeroize();
        }
        self.otp.zeroize();
        for d in self.details.iter_mut().filter(|d| d.hidden) {
            d.value.zeroize();
        }
    }
}

impl Database {
    /// Decode a plain (unencrypted) JSON export.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Plain JSON export. Bypasses encryption entirely; diagnostics only.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Records that are not archived, with their original indexes.
    pub fn active(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.records.iter().enumerate().filter(|(_, r)| !r.archived)
    }

    /// Merge the record's hashpass settings over the database defaults.
    ///
    /// Returns `None` when the record does not use hashpass. A non-empty
    /// `tag` must be one of the record's tags.
    pub fn hashpass_config(&self, record: &Record, tag: &str) -> Result<Option<HashpassConfig>> {
        let Some(own) = record.hashpass.as_ref() else {
            return Ok(None);
        };
        if !tag.is_empty() && !record.has_tag(tag) {
            return Err(Error::UnknownTag {
                label: record.display_name().to_string(),
                tag: tag.to_string(),
            });
        }
        let fallback = self
            .defaults
            .as_ref()
            .and_then(|d| d.hashpass.as_ref())
            .cloned()
            .unwrap_or_default();

        let secret = first_non_empty(&own.secret_key, &fallback.secret_key);
        if secret.is_empty() {
            return Err(Error::MissingSecret(record.display_name().to_string()));
        }
        let seed = first_non_empty(first_non_empty(&own.seed, &fallback.seed), &record.label);
        if seed.is_empty() {
            return Err(Error::MissingSeed(record.display_name().to_string()));
        }
        let length = own
            .length
            .or(fallback.length)
            .unwrap_or(DEFAULT_HASHPASS_LENGTH);
        if length == 0 {
            return Err(Error::InvalidLength(0));
        }
        let punct = own.punct.or(fallback.punct).unwrap_or(true);
        let charset = if punct {
            Charset::DIGITS | Charset::SYMBOLS
        } else {
            Charset::DIGITS
        };

        Ok(Some(HashpassConfig {
            secret: Zeroizing::new(secret.to_string()),
            tag: tag.to_string(),
            seed: seed.to_string(),
            length,
            format: first_non_empty(&own.format, &fallback.format).to_string(),
            charset,
        }))
    }

    /// The password for `record`: the stored one, else the generated one.
    ///
    /// A tag always selects generation, since stored passwords are untagged.
    pub fn password(&self, record: &Record, tag: &str) -> Result<Zeroizing<String>> {
        if tag.is_empty() && !record.password.is_empty() {
            return Ok(Zeroizing::new(record.password.clone()));
        }
        match self.hashpass_config(record, tag)? {
            Some(cfg) => cfg.generate(),
            None if !tag.is_empty() => Err(Error::UnknownTag {
                label: record.display_name().to_string(),
                tag: tag.to_string(),
            }),
            None => Err(Error::NoPassword(record.display_name().to_string())),
        }
    }

    /// Zero every record's credentials and the database-wide secrets.
    pub fn wipe_secrets(&mut self) {
        for record in &mut self.records {
            record.wipe_secrets();
        }
        if let Some(defaults) = self.defaults.as_mut() {
            if let Some(hp) = defaults.hashpass.as_mut() {
                hp.secret_key.zeroize();
            }
            if let Some(web) = defaults.web.as_mut() {
                web.lock_pin.zeroize();
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.wipe_secrets();
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.is_empty() {
        b
    } else {
        a
    }
}

//! Encrypted store: a two-layer key envelope around a JSON payload.
//!
//! # Key layers
//! - The **access key** is derived from (or equal to) the user passphrase.
//!   It only ever wraps the data key.
//! - The **data key** is random, generated once per store (and again on
//!   rekey). It seals the compressed payload.
//!
//! # On-disk envelope
//! ```json
//! { "format": "ks1", "dataKey": "<b64>", "data": "<b64>", "keySalt": "<b64>" }
//! ```
//! Both sealed fields use the `cipher` wire format. The `format` tag is the
//! associated data of the payload seal, so relabelling an envelope fails
//! authentication instead of reinterpreting bytes.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{self, Key};
use crate::error::{Error, Result};

/// Format tag written by this version. Bound into every payload seal.
pub const FORMAT: &str = "ks1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    format: String,
    #[serde(with = "b64_serde")]
    data_key: Vec<u8>,
    #[serde(with = "b64_serde")]
    data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64_serde")]
    key_salt: Vec<u8>,
}

/// An open store holding the decrypted payload `T`.
///
/// The plaintext data key lives only here and is zeroized when the store
/// drops. Only its wrapped form is ever written out.
pub struct EncryptedStore<T> {
    data_key: Key,
    data_key_encrypted: Vec<u8>,
    key_salt: Vec<u8>,
    payload: T,
}

impl<T> fmt::Debug for EncryptedStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("key_salt_len", &self.key_salt.len())
            .finish_non_exhaustive()
    }
}

impl<T> EncryptedStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Create a store with a fresh random data key wrapped by `access_key`.
    ///
    /// `key_salt` is kept verbatim (it may be empty) so the access key can be
    /// regenerated on open. Without a payload, `T::default()` is used.
    pub fn new(access_key: &[u8], key_salt: &[u8], payload: Option<T>) -> Result<Self> {
        let access_key = Key::from_slice(access_key)?;
        let data_key = Key::generate();
        let data_key_encrypted = cipher::encrypt(&access_key, data_key.as_bytes(), &[])?;
        Ok(Self {
            data_key,
            data_key_encrypted,
            key_salt: key_salt.to_vec(),
            payload: payload.unwrap_or_default(),
        })
    }

    /// Read an envelope from `reader` and decrypt it.
    ///
    /// `key_fn` receives the stored key salt and returns the access key.
    /// The whole stream is consumed, so trailing bytes are an error.
    pub fn open<R, F>(mut reader: R, key_fn: F) -> Result<Self>
    where
        R: Read,
        F: FnOnce(&[u8]) -> Result<Key>,
    {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let env: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        let access_key = key_fn(&env.key_salt)?;
        let data_key = {
            let plain = cipher::decrypt(&access_key, &env.data_key, &[])?;
            Key::from_slice(&plain).map_err(|_| Error::Decrypt)?
        };
        let packed = cipher::decrypt(&data_key, &env.data, env.format.as_bytes())?;
        let plain = cipher::decompress(&packed)?;
        let payload = serde_json::from_slice(&plain).map_err(Error::Payload)?;
        debug!(format = %env.format, bytes = raw.len(), "opened store");

        Ok(Self {
            data_key,
            data_key_encrypted: env.data_key,
            key_salt: env.key_salt,
            payload,
        })
    }

    /// Open the store saved at `path`.
    ///
    /// A failure to open or read the file surfaces as [`Error::Io`]; every
    /// other variant means the content itself was rejected.
    pub fn open_file<F>(path: impl AsRef<Path>, key_fn: F) -> Result<Self>
    where
        F: FnOnce(&[u8]) -> Result<Key>,
    {
        let file = File::open(path.as_ref())?;
        Self::open(BufReader::new(file), key_fn)
    }

    /// Seal the current payload and write the envelope to `writer`.
    ///
    /// Only the payload ciphertext changes between calls (fresh nonce each
    /// time); the wrapped data key is written unchanged.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        let plain = Zeroizing::new(serde_json::to_vec(&self.payload)?);
        let packed = cipher::compress(&plain)?;
        let data = cipher::encrypt(&self.data_key, &packed, FORMAT.as_bytes())?;
        let env = Envelope {
            format: FORMAT.to_string(),
            data_key: self.data_key_encrypted.clone(),
            data,
            key_salt: self.key_salt.clone(),
        };
        let bytes = serde_json::to_vec(&env)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }

    /// Write the store to `path` atomically (temp file + rename).
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut buf = Vec::new();
        let n = self.write_to(&mut buf)?;
        write_atomically(path.as_ref(), &buf)?;
        debug!(path = %path.as_ref().display(), bytes = n, "saved store");
        Ok(n)
    }

    /// Re-protect the payload under a new access key.
    ///
    /// A brand-new data key is generated and the old wrapped key and
    /// ciphertext are discarded with `self`.
    pub fn rekey(self, access_key: &[u8], key_salt: &[u8]) -> Result<Self> {
        let Self { payload, .. } = self;
        Self::new(access_key, key_salt, Some(payload))
    }
}

impl<T> EncryptedStore<T> {
    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn key_salt(&self) -> &[u8] {
        &self.key_salt
    }
}

// ── Atomic persistence ───────────────────────────────────────────────────────

/// Replace `dest` with `bytes` so no reader ever observes a partial file.
///
/// The data is staged in a sibling temp file, synced, then renamed over
/// `dest`, and the directory entry is synced.
pub fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(dest).map_err(|e| Error::Io(e.error))?;
    fsync_dir(parent)?;
    Ok(())
}

fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// ── Serde helpers for base64 byte fields ─────────────────────────────────────

mod b64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(Vec::new()),
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Payload = BTreeMap<String, String>;

    fn sample() -> Payload {
        let mut p = Payload::new();
        p.insert("bank".into(), "hunter2".into());
        p.insert("mail".into(), "swordfish".into());
        p
    }

    #[test]
    fn new_requires_full_length_key() {
        let err = EncryptedStore::<Payload>::new(&[1u8; 31], b"", None).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyLength { actual: 31, .. }));
    }

    #[test]
    fn new_without_payload_uses_default() {
        let store = EncryptedStore::<Payload>::new(&[1u8; 32], b"", None).unwrap();
        assert!(store.payload().is_empty());
    }

    #[test]
    fn envelope_fields_are_present() {
        let key = Key::generate();
        let store = EncryptedStore::new(key.as_bytes(), b"salty-salt", Some(sample())).unwrap();
        let mut buf = Vec::new();
        let n = store.write_to(&mut buf).unwrap();
        assert_eq!(n, buf.len());

        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["format"], FORMAT);
        assert!(v["dataKey"].is_string());
        assert!(v["data"].is_string());
        assert_eq!(v["keySalt"], "c2FsdHktc2FsdA==");
    }

    #[test]
    fn empty_salt_is_omitted() {
        let key = Key::generate();
        let store = EncryptedStore::<Payload>::new(key.as_bytes(), b"", None).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert!(v.get("keySalt").is_none());

        let reopened =
            EncryptedStore::<Payload>::open(buf.as_slice(), |salt| {
                assert!(salt.is_empty());
                Ok(key.clone())
            })
            .unwrap();
        assert!(reopened.payload().is_empty());
    }

    #[test]
    fn write_keeps_wrapped_key_but_changes_data() {
        let key = Key::generate();
        let store = EncryptedStore::new(key.as_bytes(), b"", Some(sample())).unwrap();
        let (mut a, mut b) = (Vec::new(), Vec::new());
        store.write_to(&mut a).unwrap();
        store.write_to(&mut b).unwrap();
        let va: serde_json::Value = serde_json::from_slice(&a).unwrap();
        let vb: serde_json::Value = serde_json::from_slice(&b).unwrap();
        assert_eq!(va["dataKey"], vb["dataKey"]);
        assert_ne!(va["data"], vb["data"]);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let key = Key::generate();
        let store = EncryptedStore::new(key.as_bytes(), b"", Some(sample())).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        buf.extend_from_slice(b"}garbage");
        let err = EncryptedStore::<Payload>::open(buf.as_slice(), |_| Ok(key.clone())).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn key_fn_error_propagates() {
        let key = Key::generate();
        let store = EncryptedStore::new(key.as_bytes(), b"", Some(sample())).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        let err = EncryptedStore::<Payload>::open(buf.as_slice(), |_| {
            Err(Error::Prompt("cancelled".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
    }

    #[test]
    fn payload_type_skew_is_not_a_decrypt_error() {
        let key = Key::generate();
        let store = EncryptedStore::new(key.as_bytes(), b"", Some(sample())).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        let err = EncryptedStore::<Vec<u32>>::open(buf.as_slice(), |_| Ok(key.clone())).unwrap_err();
        assert!(matches!(err, Error::Payload(_)));
    }

    #[test]
    fn save_file_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let key = Key::generate();
        let mut store = EncryptedStore::new(key.as_bytes(), b"", Some(sample())).unwrap();
        store.save_file(&path).unwrap();

        store.payload_mut().insert("extra".into(), "value".into());
        store.save_file(&path).unwrap();

        let reopened = EncryptedStore::<Payload>::open_file(&path, |_| Ok(key.clone())).unwrap();
        assert_eq!(reopened.payload().len(), 3);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp files must not linger");
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EncryptedStore::<Payload>::open_file(dir.path().join("nope"), |_| {
            Ok(Key::generate())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

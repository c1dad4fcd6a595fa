use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("AEAD encryption failed")]
    Encrypt,

    /// Covers every authentication failure on either key layer. Wrong keys
    /// and corrupted ciphertext are deliberately indistinguishable.
    #[error("decrypt failed")]
    Decrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Entropy source failed: {0}")]
    Entropy(String),

    #[error("Compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("Malformed store envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decode payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Invalid query: {0:?}")]
    InvalidQuery(String),

    #[error("Invalid length: {0}")]
    InvalidLength(usize),

    #[error("Unknown alphabet token: {0:?}")]
    UnknownAlphabet(String),

    #[error("Record {label:?} has no tag {tag:?}")]
    UnknownTag { label: String, tag: String },

    #[error("Record {0:?} has no password")]
    NoPassword(String),

    #[error("Record {0:?} has no hashpass secret")]
    MissingSecret(String),

    #[error("Record {0:?} has no hashpass seed")]
    MissingSeed(String),

    #[error("Record {0:?} has no OTP configuration")]
    NoOtp(String),

    #[error("No matches for {0:?}")]
    NoMatch(String),

    #[error("Query {query:?} is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },

    #[error("Record index {0} out of range")]
    NoSuchRecord(usize),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Editor failed: {0}")]
    Editor(String),

    #[error("OTP generation failed: {0}")]
    Otp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Store watcher has stopped")]
    WatcherClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

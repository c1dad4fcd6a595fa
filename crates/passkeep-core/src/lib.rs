//! passkeep-core: encrypted record store and credential derivation
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Plaintext key material and decrypted buffers are zeroized on drop.
//! - The store is always fully loaded; open is all-or-nothing.
//!
//! # Module layout
//! - `cipher`   : XChaCha20-Poly1305 sealing, zlib compression, Argon2id access keys
//! - `store`    : two-layer key envelope (access key → data key → payload) on disk
//! - `db`       : record schema persisted inside the store
//! - `hashpass` : HMAC-SHA256 keystream password derivation over fixed alphabets
//! - `randpass` : CSPRNG / HKDF character and word generation with bit packing
//! - `query`    : ranked record lookup with tie detection
//! - `watcher`  : reloads a store when its backing file changes
//! - `collab`   : contracts for prompt, OTP and editor collaborators
//! - `paths`    : default store location
//! - `error`    : unified error type

pub mod cipher;
pub mod collab;
pub mod db;
pub mod error;
pub mod hashpass;
pub mod paths;
pub mod query;
pub mod randpass;
pub mod store;
pub mod watcher;

pub use db::{Database, Record};
pub use error::{Error, Result};
pub use store::EncryptedStore;
pub use watcher::StoreWatcher;

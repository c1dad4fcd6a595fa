use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "passkeep";
pub const APP_NAME: &str = "passkeep";

/// Overrides [`default_store_path`] when set.
pub const DB_ENV: &str = "PASSKEEP_DB";
pub const STORE_FILE: &str = "passkeep.db";

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| Error::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn default_store_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(DB_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(data_dir()?.join(STORE_FILE))
}

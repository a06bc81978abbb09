//! Config file handling shared by both binaries
//!
//! Configs are JSON files. A missing file is replaced with the defaults and
//! reported as an error so the operator edits it before the first real run.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Load `path`, or write `T::default()` there and fail
pub fn load_or_create<T>(path: &Path) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if !path.exists() {
        let defaults = serde_json::to_string_pretty(&T::default())?;
        fs::write(path, defaults)?;
        return Err(Error::Config(format!(
            "no config found, wrote defaults to {}; edit it and restart",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Serde helper storing a `Duration` as whole milliseconds
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Pretty-prints with two-space indentation. Serializing our own types can't fail.
pub fn to_json<T: Serialize>(obj: &T) -> String {
    serde_json::to_string_pretty(obj).unwrap_or_else(|err| panic!("to_json failed: {}", err))
}

/// Reads and parses a whole JSON file. A missing file becomes `StoreError::NotFound` carrying
/// `missing_msg`, so callers can decide how to word it.
pub fn read_json<T: DeserializeOwned>(path: &Path, missing_msg: &str) -> StoreResult<T> {
    let contents = match fs_err::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(missing_msg.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    serde_json::from_str(&contents).map_err(|err| StoreError::Json {
        path: path.display().to_string(),
        err,
    })
}

/// Writes the whole document to a sibling temporary file, then renames it over `path`. Readers
/// see either the old file or the new one, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, obj: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs_err::write(tmp, to_json(obj))?;
    fs_err::rename(tmp, path)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

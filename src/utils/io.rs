use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BigVisionError, Result};

/// Reads a file to string, reporting a missing file by path.
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BigVisionError::FileNotFound(path.to_path_buf())
        } else {
            BigVisionError::Io(e)
        }
    })
}

/// Writes string to file, creating parent directories if needed
pub fn write_string(path: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<()> {
    let path = path.as_ref();
    create_parent_dirs(path)?;
    fs::write(path, contents.as_ref())?;
    Ok(())
}

pub fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Serializes data to a binary file using bincode
pub fn serialize_to_file<T: Serialize>(path: impl AsRef<Path>, data: &T) -> Result<()> {
    let path = path.as_ref();
    create_parent_dirs(path)?;
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, data)?;
    Ok(())
}

/// Deserializes data from a binary file using bincode
pub fn deserialize_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BigVisionError::FileNotFound(path.to_path_buf())
        } else {
            BigVisionError::Io(e)
        }
    })?;
    let data = bincode::deserialize_from(BufReader::new(file))?;
    Ok(data)
}

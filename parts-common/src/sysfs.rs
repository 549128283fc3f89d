//! Small helpers for kernel attribute files under `/sys` and `/proc`.

use crate::error::CommonError;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Whether `path` exists and can be opened for writing by this process.
pub fn is_writable(path: &Path) -> bool {
    path.is_file() && OpenOptions::new().write(true).open(path).is_ok()
}

/// Read an attribute, trimmed of surrounding whitespace.
pub fn read_value(path: &Path) -> Result<String, CommonError> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

/// Read a boolean attribute (`1`/`0`, `Y`/`N`, `true`/`false`).
pub fn read_bool(path: &Path) -> Result<bool, CommonError> {
    let value = read_value(path)?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "true" | "on" => Ok(true),
        "0" | "n" | "no" | "false" | "off" => Ok(false),
        _ => Err(CommonError::InvalidValue {
            path: path.display().to_string(),
            value,
        }),
    }
}

/// Write a value to an attribute. The file must already exist.
pub fn write_value(path: &Path, value: impl Display) -> Result<(), CommonError> {
    if !path.is_file() {
        return Err(CommonError::NotWritable(path.display().to_string()));
    }
    fs::write(path, value.to_string())?;
    Ok(())
}

//! Sanitization of untrusted module packages
//!
//! Imported packages are attacker-controlled input. Every file must pass
//! the path and content checks here before the importer performs its first
//! filesystem write; a single bad file rejects the whole package.

use std::path::PathBuf;

use portico_core::error::{Error, Result};
use portico_core::package::ModulePackage;

/// Per-file size ceiling.
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Extensions a package file may carry. Module code is statically linked,
/// so bundles hold configuration, schema DDL, and documentation only.
pub const ALLOWED_EXTENSIONS: &[&str] = &["json", "sql", "md", "txt", "yaml", "yml", "toml", "csv"];

/// Validate a relative package path and normalize it to a `PathBuf`.
///
/// Rejects absolute paths, traversal segments, empty components, hidden
/// files, backslashes, and any character outside `[A-Za-z0-9._-]`.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf> {
    if raw.is_empty() {
        return Err(Error::Security("Empty file path in package".to_string()));
    }
    if raw.contains('\\') {
        return Err(Error::Security(format!(
            "Backslash in package path '{}'",
            raw
        )));
    }
    if raw.starts_with('/') {
        return Err(Error::Security(format!(
            "Absolute path '{}' in package",
            raw
        )));
    }
    if raw.contains('\0') {
        return Err(Error::Security(format!(
            "Null byte in package path '{}'",
            raw.escape_default()
        )));
    }

    let mut path = PathBuf::new();
    for component in raw.split('/') {
        if component.is_empty() {
            return Err(Error::Security(format!(
                "Empty path component in '{}'",
                raw
            )));
        }
        if component == "." || component == ".." {
            return Err(Error::Security(format!(
                "Path traversal segment in '{}'",
                raw
            )));
        }
        if component.starts_with('.') {
            return Err(Error::Security(format!(
                "Hidden file component in '{}'",
                raw
            )));
        }
        if !component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(Error::Security(format!(
                "Disallowed character in path '{}'",
                raw
            )));
        }
        path.push(component);
    }
    Ok(path)
}

/// Validate one file's content against the size ceiling, the null-byte
/// rule, the extension allow-list, and JSON well-formedness where the
/// extension claims JSON.
pub fn validate_file_content(path: &str, content: &str) -> Result<()> {
    if content.len() > MAX_FILE_BYTES {
        return Err(Error::Security(format!(
            "File '{}' exceeds the {} byte limit",
            path, MAX_FILE_BYTES
        )));
    }
    if content.contains('\0') {
        return Err(Error::Security(format!(
            "File '{}' contains embedded null bytes",
            path
        )));
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let extension = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => {
            return Err(Error::Security(format!(
                "File '{}' has no extension",
                path
            )));
        }
    };
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::Security(format!(
            "File '{}' has disallowed extension '{}'",
            path, extension
        )));
    }

    if extension == "json" {
        serde_json::from_str::<serde_json::Value>(content).map_err(|e| {
            Error::Validation(format!("File '{}' is not valid JSON: {}", path, e))
        })?;
    }

    Ok(())
}

/// Check every file of a package. Called before the first write; a failure
/// here means nothing has touched the filesystem.
pub fn validate_package_files(package: &ModulePackage) -> Result<()> {
    for (path, content) in &package.files {
        sanitize_relative_path(path)?;
        validate_file_content(path, content)?;
    }
    Ok(())
}

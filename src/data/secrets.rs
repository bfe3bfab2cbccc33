//! Secret URIs
//!
//! Account key material is referenced by URI rather than stored inline:
//! - `file://<path>` reads (and writes) a file
//! - `env://<VAR>` reads an environment variable
//! - `constant://?val=<percent-encoded>` embeds the value

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::registry::{uri_params, uri_path, uri_scheme};

/// Resolve a secret URI to its value
///
/// # Errors
/// - `NotFound` when the file or variable does not exist
/// - `Config` for unknown schemes or a constant without `val`
pub async fn resolve_secret(uri: &str) -> Result<String> {
    match uri_scheme(uri)? {
        "file" => {
            let path = uri_path(uri);
            tokio::fs::read_to_string(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AppError::NotFound(format!("secret file {}", path))
                } else {
                    AppError::Persistence(format!("Failed to read secret {}: {}", path, e))
                }
            })
        }
        "env" => {
            let name = uri_path(uri);
            std::env::var(name)
                .map_err(|_| AppError::NotFound(format!("secret environment variable {}", name)))
        }
        "constant" => uri_params(uri)
            .remove("val")
            .ok_or_else(|| AppError::Config(format!("constant secret without val: {}", uri))),
        scheme => Err(AppError::Config(format!(
            "Unsupported secret scheme '{}'",
            scheme
        ))),
    }
}

/// Write a secret to a `file://` URI
///
/// The file is written to a temporary sibling first and then renamed into
/// place, so readers never observe a partial key.
pub async fn store_secret(uri: &str, value: &str) -> Result<()> {
    let scheme = uri_scheme(uri)?;
    if scheme != "file" {
        return Err(AppError::Config(format!(
            "Secrets can only be stored under file://, got {}",
            scheme
        )));
    }

    let path = PathBuf::from(uri_path(uri));
    let value = value.to_string();
    tokio::task::spawn_blocking(move || write_atomically(&path, value.as_bytes()))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| AppError::Persistence(format!("Failed to create {}: {}", parent.display(), e)))?;

    let mut file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| AppError::Persistence(format!("Failed to create temp file: {}", e)))?;
    file.write_all(contents)
        .map_err(|e| AppError::Persistence(format!("Failed to write secret: {}", e)))?;
    file.persist(path).map_err(|e| {
        AppError::Persistence(format!("Failed to persist {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

/// URI embedding `value` directly
pub fn constant_uri(value: &str) -> String {
    format!("constant://?val={}", urlencoding::encode(value))
}

/// URI pointing at a file path
pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

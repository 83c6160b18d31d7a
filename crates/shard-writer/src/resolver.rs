//! Configuration bundle resolution.
//!
//! The distributed cache stages one or more directories on local disk before
//! the task starts. Exactly one of them is the configuration bundle, found by
//! exact name.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn, Level};
use walkdir::WalkDir;

use crate::error::ShardWriterError;

/// Top-level directories a bundle may contain.
pub const ALLOWED_BUNDLE_DIRS: &[&str] = &["conf", "lib"];

/// Top-level directories a bundle must contain.
pub const REQUIRED_BUNDLE_DIRS: &[&str] = &["conf"];

/// Find the staged directory named `bundle_name`.
///
/// Fails with `MissingConfiguration` when nothing is staged, nothing matches,
/// or the match lacks a required subdirectory.
pub fn find_config_bundle(
    staged_dirs: &[PathBuf],
    bundle_name: &str,
) -> Result<PathBuf, ShardWriterError> {
    if staged_dirs.is_empty() {
        return Err(ShardWriterError::MissingConfiguration(format!(
            "no local cache archives, where is {}",
            bundle_name
        )));
    }

    let diagnostics = tracing::enabled!(Level::DEBUG);
    let mut found = None;
    for dir in staged_dirs {
        if diagnostics {
            debug!(dir = ?dir, bundle = bundle_name, "Examining staged directory");
            log_tree(dir);
        }
        if dir.file_name().and_then(|n| n.to_str()) == Some(bundle_name) {
            found = Some(dir);
            break;
        }
    }

    let bundle = found.ok_or_else(|| {
        ShardWriterError::MissingConfiguration(format!(
            "none of {} staged directories is named {}",
            staged_dirs.len(),
            bundle_name
        ))
    })?;

    check_bundle_shape(bundle)?;
    info!(bundle = ?bundle, "Resolved configuration bundle");
    Ok(bundle.clone())
}

fn check_bundle_shape(bundle: &Path) -> Result<(), ShardWriterError> {
    for required in REQUIRED_BUNDLE_DIRS {
        if !bundle.join(required).is_dir() {
            return Err(ShardWriterError::MissingConfiguration(format!(
                "bundle {} has no {} directory",
                bundle.display(),
                required
            )));
        }
    }

    // Extra entries are tolerated
    if let Ok(entries) = std::fs::read_dir(bundle) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if entry.path().is_dir() && !ALLOWED_BUNDLE_DIRS.contains(&name.as_ref()) {
                warn!(bundle = ?bundle, entry = %name, "Unrecognized directory in bundle");
            }
        }
    }
    Ok(())
}

fn log_tree(dir: &Path) {
    for entry in WalkDir::new(dir).into_iter() {
        match entry {
            Ok(entry) => {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                debug!(path = ?entry.path(), size, "Staged entry");
            }
            Err(e) => debug!(dir = ?dir, error = %e, "Unable to list staged entry"),
        }
    }
}

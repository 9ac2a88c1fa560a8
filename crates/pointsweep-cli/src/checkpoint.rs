//! Checkpoint persistence between invocations.
//!
//! The pipeline only receives and returns a `Checkpoint`; reading and
//! writing it to disk happens here.

use std::path::Path;

use anyhow::Context;
use pointsweep_core::Checkpoint;

/// Load the checkpoint at `path`, or an empty one if the file does not exist.
pub(crate) fn load_checkpoint(path: &Path) -> anyhow::Result<Checkpoint> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse checkpoint {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read checkpoint {}", path.display())),
    }
}

pub(crate) fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write checkpoint {}", path.display()))
}

/// Remove the checkpoint once a crawl cycle is complete. A missing file is
/// not an error.
pub(crate) fn clear_checkpoint(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove checkpoint {}", path.display())),
    }
}

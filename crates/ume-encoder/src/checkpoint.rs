//! Pretrained checkpoint registry and retry-on-corruption loading.
//!
//! The registry maps released model names to checkpoint artifacts. The
//! download transport is external; artifacts are staged in a source
//! directory (`UME_CHECKPOINT_DIR` by convention) and copied into the
//! local cache on demand. A load that fails with corruption — typically
//! an interrupted copy — deletes the cached artifact and re-stages it,
//! up to a bounded number of attempts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::config::ModelSize;
use crate::error::{UmeError, UmeResult};

/// Environment variable naming the staged-checkpoint source directory.
pub const CHECKPOINT_SOURCE_ENV: &str = "UME_CHECKPOINT_DIR";

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = "models/ume";

/// Attempts before a corrupt checkpoint becomes a fatal error.
pub const MAX_LOAD_ATTEMPTS: usize = 3;

/// Released model names and their checkpoint artifacts.
static PRETRAINED_CHECKPOINTS: Lazy<BTreeMap<&'static str, (&'static str, ModelSize)>> =
    Lazy::new(|| {
        BTreeMap::from([
            ("ume-mini-base-12M", ("ume-mini-base-12M.safetensors", ModelSize::Mini)),
            ("ume-small-base-90M", ("ume-small-base-90M.safetensors", ModelSize::Small)),
            ("ume-medium-base-480M", ("ume-medium-base-480M.safetensors", ModelSize::Medium)),
            ("ume-large-base-740M", ("ume-large-base-740M.safetensors", ModelSize::Large)),
        ])
    });

/// Names available in the registry.
pub fn available_models() -> Vec<String> {
    PRETRAINED_CHECKPOINTS.keys().map(|name| name.to_string()).collect()
}

/// Resolve a model name to its checkpoint file name and size variant.
pub fn resolve_checkpoint(model_name: &str) -> UmeResult<(&'static str, ModelSize)> {
    PRETRAINED_CHECKPOINTS.get(model_name).copied().ok_or_else(|| UmeError::UnknownModel {
        name: model_name.to_string(),
        available: available_models(),
    })
}

/// Stage-and-load with transparent retry on corruption.
///
/// The artifact is copied from `source` into `local_path` when absent,
/// then handed to `load`. A [`UmeError::Checkpoint`] result deletes the
/// cached copy and retries from the source; any other error propagates
/// immediately. Exhausting the attempts is fatal.
pub fn load_checkpoint_with_retry<T>(
    source: &Path,
    local_path: &Path,
    max_attempts: usize,
    load: impl Fn(&Path) -> UmeResult<T>,
) -> UmeResult<T> {
    if max_attempts == 0 {
        return Err(UmeError::Checkpoint("max_attempts must be positive".into()));
    }

    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        if !local_path.exists() {
            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(source, local_path)?;
        }

        match load(local_path) {
            Ok(value) => return Ok(value),
            Err(UmeError::Checkpoint(message)) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %message,
                    "checkpoint load failed, removing cached copy and retrying"
                );
                let _ = std::fs::remove_file(local_path);
                last_error = message;
            }
            Err(other) => return Err(other),
        }
    }

    Err(UmeError::Checkpoint(format!(
        "giving up after {max_attempts} attempts: {last_error}"
    )))
}

/// Source path for a checkpoint artifact, from the staging directory.
pub fn source_path(file_name: &str) -> UmeResult<PathBuf> {
    let dir = std::env::var(CHECKPOINT_SOURCE_ENV).map_err(|_| {
        UmeError::Checkpoint(format!(
            "checkpoint source directory not set; export {CHECKPOINT_SOURCE_ENV}"
        ))
    })?;
    Ok(PathBuf::from(dir).join(file_name))
}

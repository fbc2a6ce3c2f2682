//! Splitting the municipality list into per-worker shards.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::job::MAX_WORKERS;

/// Splits `items` into `min(workers, len)` contiguous, non-empty shards.
///
/// Every shard holds `ceil(len / n)` items except the last, which takes the
/// remainder. When that would leave fewer than `n` shards (5 items over 4
/// workers), sizes are balanced instead and differ by at most one.
/// Concatenating the shards yields `items` in order.
pub fn split<T: Clone>(items: &[T], workers: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return vec![];
    }
    let n = workers.clamp(1, MAX_WORKERS.min(items.len()));
    let chunk = items.len().div_ceil(n);
    if items.len().div_ceil(chunk) == n {
        return items.chunks(chunk).map(<[T]>::to_vec).collect();
    }

    let base = items.len() / n;
    let extra = items.len() % n;
    let mut shards = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < extra);
        shards.push(items[start..start + len].to_vec());
        start += len;
    }
    shards
}

/// Per-worker shard files written under a run's scratch directory and
/// removed when dropped.
#[derive(Debug)]
pub struct ShardManifests {
    files: Vec<PathBuf>,
}

impl ShardManifests {
    pub fn write(dir: &Path, shards: &[Vec<String>]) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut manifests = Self { files: vec![] };
        for (worker, shard) in shards.iter().enumerate() {
            let path = dir.join(format!("shard_{}.txt", worker + 1));
            let mut body = shard.join("\n");
            body.push('\n');
            std::fs::write(&path, body).map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
            manifests.files.push(path);
        }
        debug!(count = manifests.files.len(), "Shard manifests written");
        Ok(manifests)
    }

}

impl Drop for ShardManifests {
    fn drop(&mut self) {
        for file in &self.files {
            if let Err(e) = std::fs::remove_file(file) {
                warn!(file = %file.display(), error = %e, "Could not remove shard manifest");
            }
        }
    }
}

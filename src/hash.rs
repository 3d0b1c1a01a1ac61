//! Content digests for files whose metadata disagrees.
//!
//! MD5 is enough here: the digest only decides whether two copies are the same bytes.

use crate::docker;
use crate::model::{Endpoint, FileCompareResult, FileStatus, MountType};
use crate::transport::Transport;
use crate::util::{join_root, shell_quote};
use crate::{Result, ShiftError};
use md5::{Digest, Md5};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Only mtime-based deltas are ambiguous; everything else is settled by metadata.
pub fn needs_hash(file: &FileCompareResult) -> bool {
    !file.is_directory() && matches!(file.status, FileStatus::NewerSource | FileStatus::NewerTarget)
}

fn hash_local_file(path: &str) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|source| ShiftError::ReadFile { path: path.into(), source })?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// MD5 of `path` below `root` on `endpoint`, or `None` if it cannot be computed.
pub fn compute_file_hash(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    mount_type: MountType,
    root: &str,
    path: &str,
) -> Option<String> {
    let result = match (mount_type, endpoint) {
        (MountType::Bind, Endpoint::Local) => hash_local_file(&join_root(root, path)),
        (MountType::Bind, Endpoint::Remote(_)) => {
            let command = format!("md5sum {} | cut -d' ' -f1", shell_quote(&join_root(root, path)));
            transport.exec(endpoint, &command).map(|out| out.stdout.trim().to_string())
        }
        (MountType::Volume, _) => {
            let script = format!(
                "md5sum {} | cut -d' ' -f1",
                shell_quote(&join_root(docker::VOLUME_ROOT, path))
            );
            transport
                .exec(endpoint, &docker::read_volume_if_exists(root, &script))
                .map(|out| out.stdout.trim().to_string())
        }
    };

    match result {
        Ok(hash) if !hash.is_empty() => Some(hash),
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to hash {} in {} on {}: {}", path, root, endpoint, e);
            None
        }
    }
}

/// Hashes the ambiguous entries of one mount on both endpoints.
pub struct HashVerifier<'a> {
    transport: &'a dyn Transport,
    source: &'a Endpoint,
    target: &'a Endpoint,
    parallelism: usize,
}

impl<'a> HashVerifier<'a> {
    pub fn new(transport: &'a dyn Transport, source: &'a Endpoint, target: &'a Endpoint, parallelism: usize) -> Self {
        Self { transport, source, target, parallelism: parallelism.max(1) }
    }

    /// Downgrade byte-identical `newer_*` entries to `match`. Returns how many were hashed.
    pub fn verify(
        &self,
        mount_type: MountType,
        source_root: &str,
        target_root: &str,
        files: &mut [FileCompareResult],
        on_hashed: Option<&(dyn Fn(&str) + Sync)>,
    ) -> Result<usize> {
        let candidates: Vec<usize> = files
            .iter()
            .enumerate()
            .filter(|(_, f)| needs_hash(f))
            .map(|(idx, _)| idx)
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build()
            .map_err(|e| ShiftError::Config(format!("Failed to build hash thread pool: {}", e)))?;

        let shared: &[FileCompareResult] = files;
        let digests: Vec<(usize, Option<String>, Option<String>)> = pool.install(|| {
            candidates
                .par_iter()
                .map(|&idx| {
                    let path = shared[idx].path();
                    let source_hash = compute_file_hash(self.transport, self.source, mount_type, source_root, path);
                    let target_hash = compute_file_hash(self.transport, self.target, mount_type, target_root, path);
                    if let Some(callback) = on_hashed {
                        callback(path);
                    }
                    (idx, source_hash, target_hash)
                })
                .collect()
        });

        for (idx, source_hash, target_hash) in digests {
            let file = &mut files[idx];
            if let (Some(s), Some(t)) = (&source_hash, &target_hash) {
                if s == t {
                    debug!("{} differs only in metadata", file.path());
                    file.status = FileStatus::Match;
                }
            }
            file.hash = source_hash;
            file.target_hash = target_hash;
        }

        Ok(candidates.len())
    }
}

use crate::model::FileInfo;
use crate::scanner::{EntryCallback, Scanner};
use crate::Result;
use std::path::Path;
use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
#[cfg(not(unix))]
use std::time::UNIX_EPOCH;

/// Walks a directory on this host.
#[derive(Debug, Default)]
pub struct LocalScanner;

impl LocalScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Scanner for LocalScanner {
    fn scan(&self, root: &str, on_entry: Option<EntryCallback<'_>>) -> Result<Vec<FileInfo>> {
        let root_path = Path::new(root);
        if !root_path.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        // Symlinks are neither followed nor reported, same as `find -type f -o -type d`
        for result in WalkDir::new(root_path).follow_links(false).min_depth(1) {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Scan error under {}: {}", root, err);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }

            let relative_path = match entry.path().strip_prefix(root_path) {
                Ok(rp) => rp,
                Err(_) => continue,
            };
            let path = format!("/{}", relative_path.to_string_lossy().replace('\\', "/"));

            // Skip if we can't get metadata (vanished or permission)
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Failed to get metadata for {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let (mtime, mode) = get_metadata_platform(&metadata);
            let info = FileInfo {
                path,
                size: metadata.len(),
                mtime,
                mode: format!("{:o}", mode),
                is_directory: metadata.is_dir(),
            };
            if let Some(callback) = on_entry {
                callback(&info);
            }
            entries.push(info);
        }

        Ok(entries)
    }
}

#[cfg(unix)]
fn get_metadata_platform(metadata: &std::fs::Metadata) -> (i64, u32) {
    (metadata.mtime(), metadata.mode() & 0o7777)
}

#[cfg(not(unix))]
fn get_metadata_platform(metadata: &std::fs::Metadata) -> (i64, u32) {
    let mtime = metadata.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    // Synthesize mode for non-unix
    let mode = if metadata.is_dir() { 0o755 } else { 0o644 };
    (mtime, mode)
}

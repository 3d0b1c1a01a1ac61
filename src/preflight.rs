//! Target-side preparation before any data is written.

use crate::docker;
use crate::model::Endpoint;
use crate::transport::Transport;
use crate::util::shell_quote;
use crate::Result;
use tracing::{debug, info};

pub fn create_directory(transport: &dyn Transport, endpoint: &Endpoint, path: &str) -> Result<()> {
    debug!("Ensuring directory {} on {}", path, endpoint);
    transport.exec(endpoint, &format!("mkdir -p {}", shell_quote(path)))?;
    Ok(())
}

/// Create `name` unless it already exists. Existing volumes keep their labels.
pub fn create_volume(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    name: &str,
    labels: &[(String, String)],
) -> Result<()> {
    let exists = transport.exec(endpoint, &docker::volume_exists(name))?;
    if exists.stdout.trim() == "yes" {
        debug!("Volume {} already exists on {}", name, endpoint);
        return Ok(());
    }
    info!("Creating volume {} on {}", name, endpoint);
    transport.exec(endpoint, &docker::create_volume(name, labels))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCheck {
    pub exists: bool,
    pub writable: bool,
    /// Bytes available on the filesystem holding the path (or its closest existing parent)
    pub free_bytes: Option<u64>,
}

/// Closest existing ancestor is what `df` can answer for.
fn df_script(path: &str) -> String {
    format!(
        "p={}; while [ ! -e \"$p\" ] && [ \"$p\" != / ]; do p=$(dirname \"$p\"); done; df -Pk \"$p\" | tail -n 1",
        shell_quote(path)
    )
}

/// Parse the data line of `df -Pk`: the fourth column is available KiB.
pub fn parse_df_available(line: &str) -> Option<u64> {
    line.split_whitespace().nth(3)?.parse::<u64>().ok().map(|kib| kib * 1024)
}

pub fn check_target_path(transport: &dyn Transport, endpoint: &Endpoint, path: &str) -> Result<PathCheck> {
    let quoted = shell_quote(path);
    let flags = transport.exec(
        endpoint,
        &format!(
            "if test -e {q}; then echo exists; else echo missing; fi; if test -w {q}; then echo writable; else echo readonly; fi",
            q = quoted
        ),
    )?;
    let mut lines = flags.stdout.lines().map(str::trim);
    let exists = lines.next() == Some("exists");
    let writable = lines.next() == Some("writable");

    let free_bytes = match transport.exec(endpoint, &df_script(path)) {
        Ok(out) => parse_df_available(out.stdout.trim()),
        Err(e) => {
            debug!("df failed for {} on {}: {}", path, endpoint, e);
            None
        }
    };

    Ok(PathCheck { exists, writable, free_bytes })
}

use crate::docker;
use crate::model::{Endpoint, FileInfo, MountType};
use crate::transport::Transport;
use crate::{Result, ShiftError};
use tracing::warn;

pub mod command;
pub mod local;

pub use command::CommandScanner;
pub use local::LocalScanner;

/// Called once per discovered entry.
pub type EntryCallback<'a> = &'a (dyn Fn(&FileInfo) + Sync);

/// Scanner trait
pub trait Scanner {
    /// Every file and directory below `root`, excluding `root` itself.
    fn scan(&self, root: &str, on_entry: Option<EntryCallback<'_>>) -> Result<Vec<FileInfo>>;
}

/// Inventory of a bind mount or volume on `endpoint`.
///
/// Failures are logged and produce an empty inventory: an unreadable or absent
/// target is exactly what "everything is missing_target" means.
pub fn scan_mount(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    mount_type: MountType,
    root: &str,
    on_entry: Option<EntryCallback<'_>>,
) -> Vec<FileInfo> {
    let result = match (mount_type, endpoint) {
        (MountType::Bind, Endpoint::Local) => LocalScanner::new().scan(root, on_entry),
        (MountType::Bind, Endpoint::Remote(_)) => CommandScanner::bind(transport, endpoint).scan(root, on_entry),
        (MountType::Volume, _) => CommandScanner::volume(transport, endpoint).scan(root, on_entry),
    };

    match result {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to scan {} {} on {}: {}", mount_type, root, endpoint, e);
            Vec::new()
        }
    }
}

/// Apparent size of a volume's contents in bytes.
///
/// `Ok(0)` means the volume does not exist on `endpoint`; a failed or garbled
/// measurement is an error so callers never mistake it for an empty volume.
pub fn volume_size(transport: &dyn Transport, endpoint: &Endpoint, volume: &str) -> Result<u64> {
    let command = docker::read_volume_if_exists(
        volume,
        &format!("du -sb {} 2>/dev/null | cut -f1", docker::VOLUME_ROOT),
    );
    let output = transport.exec(endpoint, &command)?;
    let measured = output.stdout.trim();
    if measured.is_empty() {
        return Ok(0);
    }
    measured.parse().map_err(|_| ShiftError::CommandFailed {
        command,
        code: None,
        stdout: output.stdout.clone(),
        stderr: output.stderr,
        server_id: endpoint.server_id().map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CommandOutput;

    /// Answers every exec with the same canned result.
    struct Canned(std::result::Result<&'static str, i32>);

    impl Transport for Canned {
        fn connect(&self, _: &Endpoint) -> Result<()> {
            Ok(())
        }

        fn exec(&self, _: &Endpoint, command: &str) -> Result<CommandOutput> {
            match self.0 {
                Ok(stdout) => Ok(CommandOutput { stdout: stdout.into(), stderr: String::new() }),
                Err(code) => Err(ShiftError::CommandFailed {
                    command: command.into(),
                    code: Some(code),
                    stdout: String::new(),
                    stderr: "docker: daemon unreachable".into(),
                    server_id: Some("src".into()),
                }),
            }
        }

        fn pipe(&self, _: &Endpoint, _: &Endpoint, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        fn push_file(&self, _: &Endpoint, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn volume_size_separates_absent_from_unmeasurable() {
        let endpoint = Endpoint::Remote("src".into());
        assert_eq!(volume_size(&Canned(Ok("4096\n")), &endpoint, "pg_data").unwrap(), 4096);
        // Nothing printed: the volume does not exist
        assert_eq!(volume_size(&Canned(Ok("")), &endpoint, "pg_data").unwrap(), 0);

        let err = volume_size(&Canned(Err(125)), &endpoint, "pg_data").unwrap_err();
        assert!(matches!(err, ShiftError::CommandFailed { code: Some(125), .. }));

        let err = volume_size(&Canned(Ok("du: not found\n")), &endpoint, "pg_data").unwrap_err();
        assert!(matches!(err, ShiftError::CommandFailed { code: None, ref server_id, .. } if server_id.as_deref() == Some("src")));
    }
}

//! Command execution on either endpoint and source-to-target byte pipes.

use crate::model::Endpoint;
use crate::services::ServerDirectory;
use crate::util::shell_quote;
use crate::{Result, ShiftError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub mod local;
pub mod ssh;

pub use local::LocalShell;
use ssh::{KeyFile, SshConfig, SshConnection};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait Transport: Send + Sync {
    /// Check that the endpoint resolves to something we can talk to.
    fn connect(&self, endpoint: &Endpoint) -> Result<()>;

    fn exec(&self, endpoint: &Endpoint, command: &str) -> Result<CommandOutput>;

    /// Run `source_command` on `source` and feed its stdout into `target_command` on `target`.
    fn pipe(&self, source: &Endpoint, target: &Endpoint, source_command: &str, target_command: &str) -> Result<()>;

    /// Copy a file from this host to `target_path` on `target`, keeping its mtime.
    fn push_file(&self, target: &Endpoint, local_path: &str, target_path: &str) -> Result<()>;
}

/// A command line ready to run locally, plus the key file it refers to.
struct Wrapped {
    command: String,
    _key: Option<KeyFile>,
}

/// Production transport: local shell for local work, ssh2 sessions for remote
/// `exec`, and the `ssh` client with ephemeral key files for pipes.
pub struct ShellTransport {
    servers: Arc<dyn ServerDirectory>,
    shell: LocalShell,
    sessions: Mutex<HashMap<String, Arc<Mutex<SshConnection>>>>,
}

impl ShellTransport {
    pub fn new(servers: Arc<dyn ServerDirectory>) -> Self {
        Self::with_shell(servers, LocalShell::default())
    }

    pub fn with_shell(servers: Arc<dyn ServerDirectory>, shell: LocalShell) -> Self {
        Self { servers, shell, sessions: Mutex::new(HashMap::new()) }
    }

    fn ssh_config(&self, server_id: &str, role: &'static str) -> Result<SshConfig> {
        let info = self.servers.get_server(server_id)?;
        SshConfig::from_server(server_id, role, info)
    }

    fn session(&self, server_id: &str) -> Result<Arc<Mutex<SshConnection>>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = sessions.get(server_id) {
            return Ok(conn.clone());
        }
        let config = self.ssh_config(server_id, "Remote")?;
        info!("Connecting to {}@{} ({})...", config.user, config.host, server_id);
        let conn = Arc::new(Mutex::new(SshConnection::connect(&config)?));
        sessions.insert(server_id.to_string(), conn.clone());
        Ok(conn)
    }

    fn wrap(&self, endpoint: &Endpoint, role: &'static str, command: &str) -> Result<Wrapped> {
        match endpoint {
            Endpoint::Local => Ok(Wrapped { command: command.to_string(), _key: None }),
            Endpoint::Remote(server_id) => {
                let config = self.ssh_config(server_id, role)?;
                let key = KeyFile::write(&config.private_key)?;
                let command = ssh::ssh_exec_command(&config, key.path(), command);
                Ok(Wrapped { command, _key: Some(key) })
            }
        }
    }
}

impl Transport for ShellTransport {
    fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        match endpoint {
            Endpoint::Local => Ok(()),
            Endpoint::Remote(server_id) => self.session(server_id).map(|_| ()),
        }
    }

    fn exec(&self, endpoint: &Endpoint, command: &str) -> Result<CommandOutput> {
        match endpoint {
            Endpoint::Local => self.shell.run(command),
            Endpoint::Remote(server_id) => {
                debug!("exec ({}): {}", server_id, command);
                let conn = self.session(server_id)?;
                let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                conn.exec(command)
            }
        }
    }

    fn pipe(&self, source: &Endpoint, target: &Endpoint, source_command: &str, target_command: &str) -> Result<()> {
        // Both key files are dropped, and so deleted, however the pipeline ends
        let source_side = self.wrap(source, "Source", source_command)?;
        let target_side = self.wrap(target, "Target", target_command)?;
        // Grouped so a compound target (`mkdir -p d && tar xf -`) reads the pipe as a whole
        let command = format!("{{ {}; }} | {{ {}; }}", source_side.command, target_side.command);

        self.shell.run(&command).map(|_| ()).map_err(|e| match e {
            ShiftError::CommandFailed { command, code, stdout, stderr, .. } => ShiftError::CommandFailed {
                command,
                code,
                stdout,
                stderr,
                server_id: target.server_id().or(source.server_id()).map(String::from),
            },
            other => other,
        })
    }

    fn push_file(&self, target: &Endpoint, local_path: &str, target_path: &str) -> Result<()> {
        match target {
            Endpoint::Local => {
                let command = format!("rsync -a --times {} {}", shell_quote(local_path), shell_quote(target_path));
                self.shell.run(&command).map(|_| ())
            }
            Endpoint::Remote(server_id) => {
                let config = self.ssh_config(server_id, "Target")?;
                let key = KeyFile::write(&config.private_key)?;
                let command = format!(
                    "rsync -az --times -e {} {} {}",
                    shell_quote(&ssh::rsync_ssh_transport(config.port, key.path())),
                    shell_quote(local_path),
                    shell_quote(&format!("{}@{}:{}", config.user, config.host, target_path)),
                );
                let result = self.shell.run(&command).map(|_| ());
                drop(key);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServerInfo;

    struct Servers;

    impl ServerDirectory for Servers {
        fn get_server(&self, server_id: &str) -> Result<ServerInfo> {
            match server_id {
                "keyless" => Ok(ServerInfo { host: "h".into(), port: 22, username: "root".into(), private_key: None }),
                _ => Err(ShiftError::ServerNotFound(server_id.to_string())),
            }
        }
    }

    #[test]
    fn local_pipe_streams_between_commands() {
        let transport = ShellTransport::with_shell(Arc::new(Servers), LocalShell::new("sh", vec!["-c".into()]));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        transport
            .pipe(&Endpoint::Local, &Endpoint::Local, "printf abc", &format!("cat > {}", shell_quote(&out.to_string_lossy())))
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "abc");
    }

    #[test]
    fn compound_target_reads_the_whole_stream() {
        let transport = ShellTransport::with_shell(Arc::new(Servers), LocalShell::new("sh", vec!["-c".into()]));
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let out = nested.join("out.txt");
        transport
            .pipe(
                &Endpoint::Local,
                &Endpoint::Local,
                "printf abc",
                &format!(
                    "mkdir -p {} && cat > {}",
                    shell_quote(&nested.to_string_lossy()),
                    shell_quote(&out.to_string_lossy())
                ),
            )
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "abc");
    }

    struct KeyedServers;

    impl ServerDirectory for KeyedServers {
        fn get_server(&self, _: &str) -> Result<ServerInfo> {
            Ok(ServerInfo {
                host: "10.0.0.9".into(),
                port: 22,
                username: "root".into(),
                private_key: Some("-----BEGIN KEY-----".into()),
            })
        }
    }

    /// Stands in for the shell: appends to `live` the key files the command line
    /// names that exist right now, then exits with `exit_code`.
    fn key_recording_transport(live: &std::path::Path, exit_code: i32) -> ShellTransport {
        let script = format!(
            "for k in $(printf '%s' \"$0\" | grep -o \"/[^' ]*shiftstate-key-[^' ]*\"); do test -f \"$k\" && echo \"$k\" >> {}; done; exit {}",
            shell_quote(&live.to_string_lossy()),
            exit_code
        );
        ShellTransport::with_shell(Arc::new(KeyedServers), LocalShell::new("sh", vec!["-c".into(), script]))
    }

    fn recorded_keys(live: &std::path::Path) -> Vec<String> {
        let seen = std::fs::read_to_string(live).unwrap();
        let keys: Vec<String> = seen.lines().map(String::from).collect();
        assert_eq!(keys.len(), 2);
        keys
    }

    #[test]
    fn pipe_key_files_live_only_for_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live");

        key_recording_transport(&live, 0)
            .pipe(&Endpoint::Remote("a".into()), &Endpoint::Remote("b".into()), "tar cf - .", "tar xf -")
            .unwrap();

        for key in recorded_keys(&live) {
            assert!(!std::path::Path::new(&key).exists(), "{} outlived the pipe", key);
        }
    }

    #[test]
    fn pipe_key_files_are_removed_when_the_pipeline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live");

        let err = key_recording_transport(&live, 3)
            .pipe(&Endpoint::Remote("a".into()), &Endpoint::Remote("b".into()), "tar cf - .", "tar xf -")
            .unwrap_err();
        assert!(matches!(err, ShiftError::CommandFailed { .. }), "{:?}", err);
        assert!(!err.is_fatal());

        for key in recorded_keys(&live) {
            assert!(!std::path::Path::new(&key).exists(), "{} outlived the failed pipe", key);
        }
    }

    #[test]
    fn remote_pipe_without_key_fails_before_running() {
        let transport = ShellTransport::new(Arc::new(Servers));
        let err = transport
            .pipe(&Endpoint::Local, &Endpoint::Remote("keyless".into()), "true", "true")
            .unwrap_err();
        assert!(matches!(err, ShiftError::MissingPrivateKey { role: "Target", .. }));
        assert!(err.is_fatal());

        let err = transport.connect(&Endpoint::Remote("ghost".into())).unwrap_err();
        assert!(matches!(err, ShiftError::ServerNotFound(_)));
    }
}

use crate::services::ServerInfo;
use crate::transport::CommandOutput;
use crate::util::shell_quote;
use crate::{Result, ShiftError};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use tempfile::NamedTempFile;

const SSH_OPTIONS: &str =
    "-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o BatchMode=yes -o LogLevel=ERROR";

#[derive(Clone)]
pub struct SshConfig {
    pub server_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: String,
}

impl SshConfig {
    pub fn from_server(server_id: &str, role: &'static str, info: ServerInfo) -> Result<Self> {
        let private_key = info
            .private_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ShiftError::MissingPrivateKey { role, server_id: server_id.to_string() })?;
        Ok(Self {
            server_id: server_id.to_string(),
            host: info.host,
            port: info.port,
            user: if info.username.is_empty() { "root".to_string() } else { info.username },
            private_key,
        })
    }
}

/// A private key written to a `0600` temp file, removed on drop.
pub struct KeyFile {
    file: NamedTempFile,
}

impl KeyFile {
    pub fn write(private_key: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("shiftstate-key-")
            .tempfile()
            .map_err(ShiftError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(private_key.as_bytes())?;
        // OpenSSH rejects keys without a trailing newline
        if !private_key.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// `ssh ... user@host 'command'`, for use inside a local pipeline.
pub fn ssh_exec_command(config: &SshConfig, key_path: &Path, command: &str) -> String {
    format!(
        "ssh -i {} -p {} {} {}@{} {}",
        shell_quote(&key_path.to_string_lossy()),
        config.port,
        SSH_OPTIONS,
        config.user,
        config.host,
        shell_quote(command)
    )
}

/// Value for rsync's `-e` flag.
pub fn rsync_ssh_transport(port: u16, key_path: &Path) -> String {
    format!("ssh -i {} -p {} {}", shell_quote(&key_path.to_string_lossy()), port, SSH_OPTIONS)
}

pub struct SshConnection {
    server_id: String,
    session: Session,
    _tcp: TcpStream,
}

impl SshConnection {
    pub fn connect(config: &SshConfig) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| ShiftError::SshConnection(format!("Failed to connect to {}:{}: {}", config.host, config.port, e)))?;

        let mut session = Session::new()
            .map_err(|e| ShiftError::SshConnection(e.to_string()))?;

        session.set_tcp_stream(tcp.try_clone().map_err(ShiftError::Io)?);
        session.handshake()
            .map_err(|e| ShiftError::SshConnection(format!("Handshake with {} failed: {}", config.host, e)))?;

        // The key file only has to outlive the auth call
        let key = KeyFile::write(&config.private_key)?;
        session.userauth_pubkey_file(&config.user, None, key.path(), None)
            .map_err(|e| ShiftError::Authentication(format!("Key auth for {}@{} failed: {}", config.user, config.host, e)))?;
        drop(key);

        if !session.authenticated() {
            return Err(ShiftError::Authentication(format!("{}@{} rejected the key", config.user, config.host)));
        }

        Ok(Self { server_id: config.server_id.clone(), session, _tcp: tcp })
    }

    pub fn exec(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session()
            .map_err(|e| ShiftError::SshConnection(format!("Channel open failed: {}", e)))?;
        channel.exec(command)
            .map_err(|e| ShiftError::SshConnection(format!("Exec failed: {}", e)))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(ShiftError::Io)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).map_err(ShiftError::Io)?;

        channel.wait_close().ok();
        let exit_status = channel.exit_status()
            .map_err(|e| ShiftError::SshConnection(format!("Exit status unavailable: {}", e)))?;

        if exit_status != 0 {
            return Err(ShiftError::CommandFailed {
                command: command.to_string(),
                code: Some(exit_status),
                stdout,
                stderr,
                server_id: Some(self.server_id.clone()),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

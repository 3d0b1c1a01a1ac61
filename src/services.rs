//! Interfaces to the parts of the platform this engine does not own.

use crate::compose::ComposeSpec;
use crate::model::{Endpoint, ServiceType, TransferOptions};
use crate::Result;

/// Connection parameters for a registered server.
#[derive(Clone)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: Option<String>,
}

impl std::fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait ServerDirectory: Send + Sync {
    fn get_server(&self, server_id: &str) -> Result<ServerInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredMountKind {
    Volume { volume_name: String },
    Bind { host_path: String },
    /// Inline file mounts live in the service record and are not moved here.
    File,
}

/// A mount attached to the service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredMount {
    pub mount_id: String,
    pub kind: DeclaredMountKind,
    pub mount_path: String,
}

pub trait MountStore: Send + Sync {
    fn find_mounts(&self, service_id: &str, service_type: ServiceType) -> Result<Vec<DeclaredMount>>;
}

/// A parsed compose file and its path relative to the service's code directory.
#[derive(Debug, Clone)]
pub struct LoadedCompose {
    pub spec: ComposeSpec,
    pub compose_file: String,
}

pub trait ComposeLoader: Send + Sync {
    fn load(&self, options: &TransferOptions) -> Result<Option<LoadedCompose>>;
}

pub trait TraefikStore: Send + Sync {
    fn read_config(&self, app_name: &str, endpoint: &Endpoint) -> Result<Option<String>>;
    fn write_config(&self, app_name: &str, endpoint: &Endpoint, content: &str) -> Result<()>;
}

//! Collaborators backed by the config file, the local disk and the hosts themselves.

use crate::compose::ComposeSpec;
use crate::config::{ServerEntry, Settings};
use crate::model::{Endpoint, ServiceType, TransferOptions};
use crate::services::{
    ComposeLoader, DeclaredMount, LoadedCompose, MountStore, ServerDirectory, ServerInfo, TraefikStore,
};
use crate::settings::ServicePaths;
use crate::transport::Transport;
use crate::util::{join_root, parent_dir, shell_quote};
use crate::{Result, ShiftError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

pub struct ConfigServerDirectory {
    servers: BTreeMap<String, ServerEntry>,
}

impl ConfigServerDirectory {
    pub fn new(servers: BTreeMap<String, ServerEntry>) -> Self {
        Self { servers }
    }
}

impl ServerDirectory for ConfigServerDirectory {
    fn get_server(&self, server_id: &str) -> Result<ServerInfo> {
        let entry = self
            .servers
            .get(server_id)
            .ok_or_else(|| ShiftError::ServerNotFound(server_id.to_string()))?;
        let private_key = match &entry.key_path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .map_err(|source| ShiftError::ReadFile { path: path.clone(), source })?,
            ),
            None => None,
        };
        Ok(ServerInfo {
            host: entry.host.clone(),
            port: entry.port,
            username: entry.username.clone(),
            private_key,
        })
    }
}

/// Mounts declared for the one service a config file describes.
pub struct ConfigMountStore {
    service_id: String,
    mounts: Vec<DeclaredMount>,
}

impl ConfigMountStore {
    pub fn new(service_id: impl Into<String>, mounts: Vec<DeclaredMount>) -> Self {
        Self { service_id: service_id.into(), mounts }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.service.id.clone(), settings.declared_mounts())
    }
}

impl MountStore for ConfigMountStore {
    fn find_mounts(&self, service_id: &str, _service_type: ServiceType) -> Result<Vec<DeclaredMount>> {
        if service_id == self.service_id {
            Ok(self.mounts.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Renders the compose file on the source host with `docker compose config`, so
/// interpolation and `extends` are already applied.
pub struct DockerComposeLoader {
    transport: Arc<dyn Transport>,
    paths: ServicePaths,
    compose_file: String,
}

impl DockerComposeLoader {
    pub fn new(transport: Arc<dyn Transport>, paths: ServicePaths, compose_file: Option<String>) -> Self {
        Self {
            transport,
            paths,
            compose_file: compose_file.unwrap_or_else(|| DEFAULT_COMPOSE_FILE.to_string()),
        }
    }
}

impl ComposeLoader for DockerComposeLoader {
    fn load(&self, options: &TransferOptions) -> Result<Option<LoadedCompose>> {
        let service_dir = match self.paths.service_dir(ServiceType::Compose, &options.app_name) {
            Some(dir) if options.service_type == ServiceType::Compose => dir,
            _ => return Ok(None),
        };
        let full_path = join_root(&format!("{}/code", service_dir), &self.compose_file);
        let command = format!(
            "if [ -f {p} ]; then docker compose -f {p} config --format json; fi",
            p = shell_quote(&full_path)
        );
        let output = self
            .transport
            .exec(&options.source(), &command)
            .map_err(|e| ShiftError::Compose(format!("failed to render {}: {}", full_path, e)))?;
        if output.stdout.trim().is_empty() {
            debug!("No compose file at {}", full_path);
            return Ok(None);
        }
        let spec: ComposeSpec = serde_json::from_str(&output.stdout)?;
        Ok(Some(LoadedCompose { spec, compose_file: self.compose_file.clone() }))
    }
}

/// Dynamic Traefik files named `<app>.yml` in one directory on every host.
pub struct FileTraefikStore {
    transport: Arc<dyn Transport>,
    dir: String,
}

impl FileTraefikStore {
    pub fn new(transport: Arc<dyn Transport>, dir: impl Into<String>) -> Self {
        Self { transport, dir: dir.into() }
    }

    fn config_path(&self, app_name: &str) -> String {
        join_root(&self.dir, &format!("{}.yml", app_name))
    }
}

impl TraefikStore for FileTraefikStore {
    fn read_config(&self, app_name: &str, endpoint: &Endpoint) -> Result<Option<String>> {
        let path = self.config_path(app_name);
        match endpoint {
            Endpoint::Local => {
                if !Path::new(&path).exists() {
                    return Ok(None);
                }
                let content = std::fs::read_to_string(&path)
                    .map_err(|source| ShiftError::ReadFile { path: path.clone().into(), source })?;
                Ok(Some(content))
            }
            Endpoint::Remote(_) => {
                let command = format!("if [ -f {p} ]; then cat {p}; fi", p = shell_quote(&path));
                let output = self.transport.exec(endpoint, &command)?;
                Ok(Some(output.stdout).filter(|c| !c.is_empty()))
            }
        }
    }

    fn write_config(&self, app_name: &str, endpoint: &Endpoint, content: &str) -> Result<()> {
        let path = self.config_path(app_name);
        match endpoint {
            Endpoint::Local => {
                std::fs::create_dir_all(parent_dir(&path))?;
                std::fs::write(&path, content)?;
            }
            Endpoint::Remote(_) => {
                let command = format!(
                    "mkdir -p {} && echo {} | base64 -d > {}",
                    shell_quote(parent_dir(&path)),
                    shell_quote(&STANDARD.encode(content.as_bytes())),
                    shell_quote(&path)
                );
                self.transport.exec(endpoint, &command)?;
            }
        }
        debug!("Wrote Traefik config {} on {}", path, endpoint);
        Ok(())
    }
}

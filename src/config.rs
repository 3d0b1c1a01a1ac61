use crate::model::{ServiceType, TransferOptions};
use crate::services::{DeclaredMount, DeclaredMountKind};
use crate::settings::EngineSettings;
use crate::{Result, ShiftError};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_TRAEFIK_DIR: &str = "/etc/shiftstate/traefik/dynamic";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Transfer description (servers, service, mounts, engine settings)
    #[arg(short, long, global = true, default_value = "shiftstate.toml")]
    pub config: PathBuf,

    /// Suppress non-error messages
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compare source and target without changing either
    Scan {
        /// Print the full scan result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Copy the selected data from source to target
    Execute {
        /// JSON object of per-file decisions, `{"<scope>:<path>": "skip" | "overwrite"}`
        #[arg(short, long)]
        decisions: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Hide the progress bar
        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    /// Private key file; servers without one cannot be used as endpoints
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".into()
}

fn default_traefik_dir() -> String {
    DEFAULT_TRAEFIK_DIR.into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MountEntry {
    Volume { id: String, volume_name: String, mount_path: String },
    Bind { id: String, host_path: String, mount_path: String },
    File { id: String, mount_path: String },
}

impl MountEntry {
    pub fn to_declared(&self) -> DeclaredMount {
        match self {
            MountEntry::Volume { id, volume_name, mount_path } => DeclaredMount {
                mount_id: id.clone(),
                kind: DeclaredMountKind::Volume { volume_name: volume_name.clone() },
                mount_path: mount_path.clone(),
            },
            MountEntry::Bind { id, host_path, mount_path } => DeclaredMount {
                mount_id: id.clone(),
                kind: DeclaredMountKind::Bind { host_path: host_path.clone() },
                mount_path: mount_path.clone(),
            },
            MountEntry::File { id, mount_path } => DeclaredMount {
                mount_id: id.clone(),
                kind: DeclaredMountKind::File,
                mount_path: mount_path.clone(),
            },
        }
    }
}

/// The service being moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub app_name: String,
    /// Server id, or absent for this host
    #[serde(default)]
    pub source_server: Option<String>,
    #[serde(default)]
    pub target_server: Option<String>,
    /// Compose file relative to the service's code directory
    #[serde(default)]
    pub compose_file: Option<String>,
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub service: ServiceSection,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
    #[serde(default = "default_traefik_dir")]
    pub traefik_dir: String,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ShiftError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let service = &self.service;
        for server in [&service.source_server, &service.target_server].into_iter().flatten() {
            if !self.servers.contains_key(server) {
                return Err(ShiftError::Config(format!("server {} is not defined under [servers]", server)));
            }
        }
        if service.source_server == service.target_server {
            return Err(ShiftError::Config("source and target are the same endpoint".into()));
        }
        if self.engine.batch_size == 0 {
            return Err(ShiftError::Config("engine.batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            service_id: self.service.id.clone(),
            service_type: self.service.service_type,
            app_name: self.service.app_name.clone(),
            source_server_id: self.service.source_server.clone(),
            target_server_id: self.service.target_server.clone(),
        }
    }

    pub fn declared_mounts(&self) -> Vec<DeclaredMount> {
        self.service.mounts.iter().map(MountEntry::to_declared).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        traefik_dir = "/srv/traefik"

        [service]
        id = "c-1"
        type = "compose"
        app_name = "shop"
        target_server = "edge"
        compose_file = "deploy/docker-compose.yml"

        [[service.mounts]]
        type = "volume"
        id = "m-1"
        volume_name = "shop_db"
        mount_path = "/var/lib/postgresql/data"

        [[service.mounts]]
        type = "bind"
        id = "m-2"
        host_path = "/srv/uploads"
        mount_path = "/uploads"

        [servers.edge]
        host = "10.0.0.2"
        key_path = "/root/.ssh/edge"

        [engine]
        batch_size = 100
        require_free_space = true
    "#;

    #[test]
    fn parses_full_config() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.traefik_dir, "/srv/traefik");
        assert_eq!(settings.engine.batch_size, 100);
        assert!(settings.engine.require_free_space);
        // Unset engine keys keep their defaults
        assert_eq!(settings.engine.hash_parallelism, 4);

        let edge = &settings.servers["edge"];
        assert_eq!(edge.port, 22);
        assert_eq!(edge.username, "root");

        let options = settings.transfer_options();
        assert_eq!(options.service_type, ServiceType::Compose);
        assert!(options.source().is_local());
        assert_eq!(options.target().server_id(), Some("edge"));

        let mounts = settings.declared_mounts();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].kind, DeclaredMountKind::Bind { host_path: "/srv/uploads".into() });
    }

    #[test]
    fn rejects_unknown_servers_and_identical_endpoints() {
        let unknown = SAMPLE.replace("target_server = \"edge\"", "target_server = \"ghost\"");
        assert!(matches!(Settings::from_toml(&unknown), Err(ShiftError::Config(_))));

        let same = SAMPLE.replace("target_server = \"edge\"", "");
        assert!(matches!(Settings::from_toml(&same), Err(ShiftError::Config(_))));
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::parse_from(["shiftstate", "execute", "-d", "decisions.json", "--config", "move.toml"]);
        assert_eq!(args.config, PathBuf::from("move.toml"));
        match args.command {
            Command::Execute { decisions, json, no_progress } => {
                assert_eq!(decisions, Some(PathBuf::from("decisions.json")));
                assert!(!json);
                assert!(!no_progress);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

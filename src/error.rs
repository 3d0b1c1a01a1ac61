use thiserror::Error;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum ShiftError {
    #[error("SSH connection failed: {0}")]
    SshConnection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("{role} server {server_id} has no SSH private key configured")]
    MissingPrivateKey { role: &'static str, server_id: String },

    #[error("Command failed with exit code {code:?}{}: {command}\n{stderr}", server_suffix(.server_id))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
        server_id: Option<String>,
    },

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Not enough free space on target for {path}: need {required} bytes, {available} available")]
    InsufficientSpace { path: String, required: u64, available: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path:?}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("WalkDir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ShiftError {
    /// Errors that make every further command against an endpoint pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShiftError::SshConnection(_)
                | ShiftError::Authentication(_)
                | ShiftError::ServerNotFound(_)
                | ShiftError::MissingPrivateKey { .. }
                | ShiftError::InsufficientSpace { .. }
        )
    }
}

fn server_suffix(server_id: &Option<String>) -> String {
    match server_id {
        Some(id) => format!(" on server {}", id),
        None => String::new(),
    }
}

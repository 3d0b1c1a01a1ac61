//! Engine tuning and host layout shared by scan and execute.

use crate::model::ServiceType;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_SCAN_EMIT_INTERVAL: usize = 200;
pub const DEFAULT_HASH_EMIT_INTERVAL: usize = 20;
pub const DEFAULT_HASH_PARALLELISM: usize = 4;

/// Where service directories live on every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePaths {
    pub applications: String,
    pub compose: String,
}

impl Default for ServicePaths {
    fn default() -> Self {
        Self {
            applications: "/etc/shiftstate/applications".into(),
            compose: "/etc/shiftstate/compose".into(),
        }
    }
}

impl ServicePaths {
    pub fn service_dir(&self, service_type: ServiceType, app_name: &str) -> Option<String> {
        match service_type {
            ServiceType::Application => Some(format!("{}/{}", self.applications.trim_end_matches('/'), app_name)),
            ServiceType::Compose => Some(format!("{}/{}", self.compose.trim_end_matches('/'), app_name)),
            _ => None,
        }
    }
}

pub fn service_dir_mount_id(service_type: ServiceType, service_id: &str) -> String {
    format!("service-dir:{}:{}", service_type.as_str(), service_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Volume files per tar stream
    pub batch_size: usize,
    /// Emit a scan progress event every N discovered files
    pub scan_emit_interval: usize,
    /// Emit a hashing progress event every N hashed files
    pub hash_emit_interval: usize,
    /// Concurrent hash pairs per mount
    pub hash_parallelism: usize,
    /// Refuse to start when a bind target lacks space for the planned bytes
    pub require_free_space: bool,
    pub paths: ServicePaths,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            scan_emit_interval: DEFAULT_SCAN_EMIT_INTERVAL,
            hash_emit_interval: DEFAULT_HASH_EMIT_INTERVAL,
            hash_parallelism: DEFAULT_HASH_PARALLELISM,
            require_free_space: false,
            paths: ServicePaths::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_dirs_only_for_apps_and_compose() {
        let paths = ServicePaths { applications: "/srv/apps/".into(), compose: "/srv/compose".into() };
        assert_eq!(paths.service_dir(ServiceType::Application, "web").as_deref(), Some("/srv/apps/web"));
        assert_eq!(paths.service_dir(ServiceType::Compose, "shop").as_deref(), Some("/srv/compose/shop"));
        assert_eq!(paths.service_dir(ServiceType::Postgres, "db"), None);
        assert_eq!(service_dir_mount_id(ServiceType::Compose, "c-1"), "service-dir:compose:c-1");
    }
}

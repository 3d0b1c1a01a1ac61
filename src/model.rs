//! Shared data model for scanning, planning and syncing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One side of a transfer: the host running this process or a registered server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Local,
    Remote(String),
}

impl Endpoint {
    pub fn from_server_id(server_id: Option<&str>) -> Self {
        match server_id {
            Some(id) => Endpoint::Remote(id.to_string()),
            None => Endpoint::Local,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            Endpoint::Local => None,
            Endpoint::Remote(id) => Some(id),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local => write!(f, "local"),
            Endpoint::Remote(id) => write!(f, "server {}", id),
        }
    }
}

/// File or directory metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Path relative to the scan root, `/`-separated, always starting with `/`
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time (unix seconds)
    pub mtime: i64,
    /// Octal permission bits, e.g. "644"
    pub mode: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Match,
    MissingTarget,
    MissingSource,
    NewerSource,
    NewerTarget,
    Conflict,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Match => "match",
            FileStatus::MissingTarget => "missing_target",
            FileStatus::MissingSource => "missing_source",
            FileStatus::NewerSource => "newer_source",
            FileStatus::NewerTarget => "newer_target",
            FileStatus::Conflict => "conflict",
        }
    }

    /// Statuses that need a human look before a transfer.
    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            FileStatus::Conflict | FileStatus::NewerSource | FileStatus::NewerTarget
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCompareResult {
    #[serde(flatten)]
    pub info: FileInfo,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_info: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_key: Option<String>,
}

impl FileCompareResult {
    pub fn new(info: FileInfo, status: FileStatus, target_info: Option<FileInfo>) -> Self {
        Self {
            info,
            status,
            target_info,
            hash: None,
            target_hash: None,
            decision_key: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn is_directory(&self) -> bool {
        self.info.is_directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Volume,
    Bind,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::Volume => write!(f, "volume"),
            MountType::Bind => write!(f, "bind"),
        }
    }
}

/// A mount to move, resolved once per scan or execute call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountTransferConfig {
    pub mount_id: String,
    pub mount_type: MountType,
    /// Volume name or host path on the source
    pub source_path: String,
    /// Volume name or host path on the target
    pub target_path: String,
    pub create_if_missing: bool,
    pub update_mount_config: bool,
    /// Path inside the container, informational only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_volume_key: Option<String>,
}

impl MountTransferConfig {
    pub fn new(mount_id: impl Into<String>, mount_type: MountType, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            mount_id: mount_id.into(),
            mount_type,
            source_path: path.clone(),
            target_path: path,
            create_if_missing: true,
            update_mount_config: false,
            mount_path: None,
            compose_project: None,
            compose_volume_key: None,
        }
    }

    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.mount_type, self.source_path)
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.mount_type, self.source_path)
    }

    /// Labels that make a freshly created target volume look Compose-managed.
    pub fn compose_labels(&self) -> Vec<(String, String)> {
        match (self.mount_type, &self.compose_project, &self.compose_volume_key) {
            (MountType::Volume, Some(project), Some(key)) => vec![
                ("com.docker.compose.project".to_string(), project.clone()),
                ("com.docker.compose.volume".to_string(), key.clone()),
            ],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Application,
    Postgres,
    Mysql,
    Mariadb,
    Mongo,
    Redis,
    Compose,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Application => "application",
            ServiceType::Postgres => "postgres",
            ServiceType::Mysql => "mysql",
            ServiceType::Mariadb => "mariadb",
            ServiceType::Mongo => "mongo",
            ServiceType::Redis => "redis",
            ServiceType::Compose => "compose",
        }
    }

    /// Only applications and compose stacks own a service directory and a Traefik file.
    pub fn has_service_dir(self) -> bool {
        matches!(self, ServiceType::Application | ServiceType::Compose)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOptions {
    pub service_id: String,
    pub service_type: ServiceType,
    pub app_name: String,
    /// `None` means the local host
    pub source_server_id: Option<String>,
    pub target_server_id: Option<String>,
}

impl TransferOptions {
    pub fn source(&self) -> Endpoint {
        Endpoint::from_server_id(self.source_server_id.as_deref())
    }

    pub fn target(&self) -> Endpoint {
        Endpoint::from_server_id(self.target_server_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Skip,
    Overwrite,
    Newer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Skip,
    Overwrite,
}

pub fn decision_key(scope: &str, path: &str) -> String {
    format!("{}:{}", scope, path)
}

/// Manual per-file overrides keyed by `"<scope>:<path>"` (or a bare path).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionMap {
    entries: HashMap<String, Decision>,
}

impl DecisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, decision: Decision) {
        self.entries.insert(key.into(), decision);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The file's own decision key wins, then the key built from `scope`, then the bare path.
    pub fn lookup(&self, file: &FileCompareResult, scope: Option<&str>) -> Option<Decision> {
        if let Some(decision) = file.decision_key.as_deref().and_then(|k| self.entries.get(k)) {
            return Some(*decision);
        }
        if let Some(scope) = scope {
            if let Some(decision) = self.entries.get(&decision_key(scope, file.path())) {
                return Some(*decision);
            }
        }
        self.entries.get(file.path()).copied()
    }

    pub fn has_skip_for_scope(&self, scope: &str) -> bool {
        let prefix = format!("{}:", scope);
        self.entries
            .iter()
            .any(|(key, decision)| *decision == Decision::Skip && key.starts_with(&prefix))
    }
}

impl FromIterator<(String, Decision)> for DecisionMap {
    fn from_iter<T: IntoIterator<Item = (String, Decision)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// One failed unit of work, reported back to the caller instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "Failed to sync {} ({}): {}", path, self.scope, self.message),
            None => write!(f, "Failed to sync {}: {}", self.scope, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, key: Option<&str>) -> FileCompareResult {
        let mut f = FileCompareResult::new(
            FileInfo { path: path.into(), size: 1, mtime: 1, mode: "644".into(), is_directory: false },
            FileStatus::Conflict,
            None,
        );
        f.decision_key = key.map(String::from);
        f
    }

    #[test]
    fn decision_lookup_precedence() {
        let mut decisions = DecisionMap::new();
        decisions.insert("/a.txt", Decision::Skip);
        decisions.insert("vol-1:/a.txt", Decision::Overwrite);
        decisions.insert("own-key", Decision::Skip);

        // Own key beats the scoped key
        assert_eq!(decisions.lookup(&file("/a.txt", Some("own-key")), Some("vol-1")), Some(Decision::Skip));
        // Scoped key beats the bare path
        assert_eq!(decisions.lookup(&file("/a.txt", None), Some("vol-1")), Some(Decision::Overwrite));
        // Bare path as last resort
        assert_eq!(decisions.lookup(&file("/a.txt", None), Some("vol-2")), Some(Decision::Skip));
        assert_eq!(decisions.lookup(&file("/b.txt", None), Some("vol-1")), None);
    }

    #[test]
    fn skip_scope_detection() {
        let decisions: DecisionMap = vec![
            ("vol-1:/a".to_string(), Decision::Overwrite),
            ("vol-2:/b".to_string(), Decision::Skip),
        ]
        .into_iter()
        .collect();
        assert!(!decisions.has_skip_for_scope("vol-1"));
        assert!(decisions.has_skip_for_scope("vol-2"));
        assert!(!decisions.has_skip_for_scope("vol"));
    }

    #[test]
    fn compose_labels_only_for_labelled_volumes() {
        let mut mount = MountTransferConfig::new("m", MountType::Volume, "app_data");
        assert!(mount.compose_labels().is_empty());
        mount.compose_project = Some("app".into());
        mount.compose_volume_key = Some("data".into());
        assert_eq!(mount.compose_labels().len(), 2);
        mount.mount_type = MountType::Bind;
        assert!(mount.compose_labels().is_empty());
    }

    #[test]
    fn decisions_deserialize_from_plain_object() {
        let decisions: DecisionMap =
            serde_json::from_str(r#"{"vol:/a":"skip","/b":"overwrite"}"#).unwrap();
        assert!(decisions.has_skip_for_scope("vol"));
    }
}

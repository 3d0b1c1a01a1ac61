//! The slice of a compose file this engine cares about: which volumes and host
//! directories each service mounts.

use crate::model::{MountTransferConfig, MountType};
use crate::util::{is_path_inside, resolve_path};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeSpec {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default)]
    pub volumes: BTreeMap<String, Option<VolumeDefinition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default)]
    pub volumes: Option<Vec<ServiceVolume>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceVolume {
    /// `source:target[:mode]`
    Short(String),
    Long(LongVolume),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongVolume {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    #[serde(default)]
    pub external: Option<External>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum External {
    Flag(bool),
    Named {
        #[serde(default)]
        name: Option<String>,
    },
}

/// Host layout needed to turn relative compose paths into absolute ones.
#[derive(Debug, Clone)]
pub struct ComposeContext<'a> {
    pub app_name: &'a str,
    /// Directory owned by the service; binds inside it travel with the service dir
    pub service_dir: &'a str,
    /// Directory the compose file lives in
    pub base_dir: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComposeVolume {
    pub volume_name: String,
    pub volume_key: String,
    pub external: bool,
}

pub fn has_unresolved_variable(value: &str) -> bool {
    value.contains("${") || value.starts_with('$')
}

pub fn is_likely_bind_source(source: &str) -> bool {
    source.starts_with('/')
        || source.starts_with("./")
        || source.starts_with("../")
        || source == "."
        || source == ".."
        || source.starts_with("~/")
}

/// Split `source:target[:mode]`. An anonymous volume (`/var/lib/data`) has no source.
pub fn parse_short_volume(volume: &str) -> (Option<&str>, Option<&str>) {
    let mut parts = volume.split(':');
    let first = parts.next().filter(|p| !p.is_empty());
    match parts.next() {
        Some(target) => (first, Some(target).filter(|t| !t.is_empty())),
        None => (None, first),
    }
}

/// Name a named-volume reference resolves to on the host.
pub fn resolve_compose_volume(source: &str, app_name: &str, spec: &ComposeSpec) -> Option<ResolvedComposeVolume> {
    if has_unresolved_variable(source) || is_likely_bind_source(source) {
        return None;
    }

    // `db-data/subdir` still lives in the `db-data` volume
    let volume_key = source.split('/').next().filter(|k| !k.is_empty())?;
    let implicit = || ResolvedComposeVolume {
        volume_name: format!("{}_{}", app_name, volume_key),
        volume_key: volume_key.to_string(),
        external: false,
    };

    let definition = match spec.volumes.get(volume_key) {
        Some(Some(definition)) => definition,
        _ => return Some(implicit()),
    };

    match &definition.external {
        Some(External::Flag(true)) => {
            return Some(ResolvedComposeVolume {
                volume_name: definition.name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| volume_key.to_string()),
                volume_key: volume_key.to_string(),
                external: true,
            })
        }
        Some(External::Named { name }) => {
            return Some(ResolvedComposeVolume {
                volume_name: name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| volume_key.to_string()),
                volume_key: volume_key.to_string(),
                external: true,
            })
        }
        _ => {}
    }

    match definition.name.as_deref() {
        Some(name) if !name.is_empty() => Some(ResolvedComposeVolume {
            volume_name: name.to_string(),
            volume_key: volume_key.to_string(),
            external: false,
        }),
        _ => Some(implicit()),
    }
}

fn bind_mount(source: &str, target: &str, ctx: &ComposeContext<'_>) -> Option<MountTransferConfig> {
    if source.starts_with("~/") {
        return None;
    }
    let bind_path = resolve_path(ctx.base_dir, source);
    if is_path_inside(&bind_path, ctx.service_dir) {
        return None;
    }
    let mut mount = MountTransferConfig::new(format!("compose-spec:bind:{}", bind_path), MountType::Bind, bind_path);
    mount.mount_path = Some(target.to_string());
    Some(mount)
}

fn volume_mount(source: &str, target: &str, spec: &ComposeSpec, ctx: &ComposeContext<'_>) -> Option<MountTransferConfig> {
    let resolved = resolve_compose_volume(source, ctx.app_name, spec)?;
    let mut mount = MountTransferConfig::new(
        format!("compose-spec:volume:{}", resolved.volume_name),
        MountType::Volume,
        resolved.volume_name,
    );
    mount.mount_path = Some(target.to_string());
    if !resolved.external {
        mount.compose_project = Some(ctx.app_name.to_string());
        mount.compose_volume_key = Some(resolved.volume_key);
    }
    Some(mount)
}

/// Every transferable volume and bind declared by any service, deduplicated by
/// `(type, source path)` in declaration order.
pub fn extract_compose_mounts(spec: &ComposeSpec, ctx: &ComposeContext<'_>) -> Vec<MountTransferConfig> {
    let mut mounts = Vec::new();
    let mut seen = HashSet::new();

    for service in spec.services.values() {
        let volumes = match &service.volumes {
            Some(volumes) => volumes,
            None => continue,
        };

        for volume in volumes {
            let mount = match volume {
                ServiceVolume::Short(raw) => {
                    let (source, target) = match parse_short_volume(raw) {
                        (Some(source), Some(target)) => (source, target),
                        _ => continue,
                    };
                    if has_unresolved_variable(source) {
                        continue;
                    }
                    if is_likely_bind_source(source) {
                        bind_mount(source, target, ctx)
                    } else {
                        volume_mount(source, target, spec, ctx)
                    }
                }
                ServiceVolume::Long(long) => {
                    let (source, target) = match (long.source.as_deref(), long.target.as_deref()) {
                        (Some(source), Some(target)) if !source.is_empty() => (source, target),
                        _ => continue,
                    };
                    if has_unresolved_variable(source) {
                        continue;
                    }
                    match long.kind.as_deref().unwrap_or("volume") {
                        "bind" => bind_mount(source, target, ctx),
                        "volume" => volume_mount(source, target, spec, ctx),
                        _ => None,
                    }
                }
                ServiceVolume::Other(_) => None,
            };

            if let Some(mount) = mount {
                if seen.insert(mount.dedupe_key()) {
                    mounts.push(mount);
                }
            }
        }
    }

    mounts
}

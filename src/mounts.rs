//! Works out the complete set of mounts a transfer has to move.

use crate::compose::{extract_compose_mounts, ComposeContext};
use crate::model::{MountTransferConfig, MountType, ServiceType, TransferOptions};
use crate::services::{ComposeLoader, DeclaredMount, DeclaredMountKind, MountStore};
use crate::settings::ServicePaths;
use crate::util::{dirname, resolve_path};
use crate::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Turn declared volume/bind mounts into transfer configs; other kinds are dropped.
pub fn declared_mount_configs(declared: &[DeclaredMount]) -> Vec<MountTransferConfig> {
    declared
        .iter()
        .filter_map(|m| {
            let (mount_type, path) = match &m.kind {
                DeclaredMountKind::Volume { volume_name } => (MountType::Volume, volume_name),
                DeclaredMountKind::Bind { host_path } => (MountType::Bind, host_path),
                DeclaredMountKind::File => return None,
            };
            let mut config = MountTransferConfig::new(m.mount_id.clone(), mount_type, path.clone());
            config.mount_path = Some(m.mount_path.clone());
            Some(config)
        })
        .collect()
}

/// Add compose-derived mounts that are new; for collisions keep the declared mount
/// and backfill compose labels it lacks.
pub fn merge_compose_mounts(mounts: &mut Vec<MountTransferConfig>, compose_mounts: Vec<MountTransferConfig>) {
    let mut by_key: HashMap<String, usize> = mounts
        .iter()
        .enumerate()
        .map(|(idx, m)| (m.dedupe_key(), idx))
        .collect();

    for compose_mount in compose_mounts {
        let key = compose_mount.dedupe_key();
        match by_key.get(&key) {
            Some(&idx) => {
                let existing = &mut mounts[idx];
                if existing.compose_project.is_none() {
                    existing.compose_project = compose_mount.compose_project;
                }
                if existing.compose_volume_key.is_none() {
                    existing.compose_volume_key = compose_mount.compose_volume_key;
                }
            }
            None => {
                by_key.insert(key, mounts.len());
                mounts.push(compose_mount);
            }
        }
    }
}

pub struct MountResolver<'a> {
    store: &'a dyn MountStore,
    compose: &'a dyn ComposeLoader,
    paths: &'a ServicePaths,
}

impl<'a> MountResolver<'a> {
    pub fn new(store: &'a dyn MountStore, compose: &'a dyn ComposeLoader, paths: &'a ServicePaths) -> Self {
        Self { store, compose, paths }
    }

    pub fn resolve(&self, options: &TransferOptions) -> Result<Vec<MountTransferConfig>> {
        let declared = self.store.find_mounts(&options.service_id, options.service_type)?;
        let mut mounts = declared_mount_configs(&declared);

        if options.service_type != ServiceType::Compose {
            return Ok(mounts);
        }

        match self.compose_mounts(options) {
            Ok(compose_mounts) => {
                debug!("Compose file declares {} transferable mounts", compose_mounts.len());
                merge_compose_mounts(&mut mounts, compose_mounts);
            }
            Err(e) => {
                warn!("Failed to resolve Compose-defined mounts for transfer: {}", e);
            }
        }
        Ok(mounts)
    }

    fn compose_mounts(&self, options: &TransferOptions) -> Result<Vec<MountTransferConfig>> {
        let loaded = match self.compose.load(options)? {
            Some(loaded) => loaded,
            None => return Ok(Vec::new()),
        };

        let service_dir = self
            .paths
            .service_dir(ServiceType::Compose, &options.app_name)
            .unwrap_or_default();
        let code_dir = format!("{}/code", service_dir);
        let base_dir = resolve_path(&code_dir, dirname(&loaded.compose_file));

        let ctx = ComposeContext {
            app_name: &options.app_name,
            service_dir: &service_dir,
            base_dir: &base_dir,
        };
        Ok(extract_compose_mounts(&loaded.spec, &ctx))
    }
}

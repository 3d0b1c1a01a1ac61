//! Decides what a transfer will move before any byte moves, so progress can be
//! reported against one total spanning every mount.

use crate::compare::{compare_file_lists, with_decision_keys};
use crate::model::{Decision, DecisionMap, Endpoint, FileCompareResult, FileStatus, MergeStrategy, MountTransferConfig, MountType};
use crate::scanner::{scan_mount, volume_size, CommandScanner, Scanner};
use crate::transport::Transport;
use crate::Result;
use tracing::warn;

/// Whether `file` should be copied from source to target.
pub fn should_sync_file(
    file: &FileCompareResult,
    strategy: MergeStrategy,
    decisions: Option<&DecisionMap>,
    scope: Option<&str>,
) -> bool {
    // tar/rsync create directories on the way; their mtimes are noise
    if file.is_directory() {
        return false;
    }

    if let Some(decision) = decisions.and_then(|d| d.lookup(file, scope)) {
        return decision == Decision::Overwrite;
    }

    match file.status {
        FileStatus::Match => false,
        FileStatus::MissingTarget => true,
        // Target-only data is never touched
        FileStatus::MissingSource => false,
        FileStatus::NewerSource => strategy != MergeStrategy::Skip,
        FileStatus::NewerTarget => strategy == MergeStrategy::Overwrite,
        FileStatus::Conflict => matches!(strategy, MergeStrategy::Overwrite | MergeStrategy::Newer),
    }
}

/// Itemized plan: the comparison plus what it will cost.
#[derive(Debug, Clone)]
pub struct DiffPlan {
    pub mount: MountTransferConfig,
    /// Decision scope, the mount id unless overridden (service directory)
    pub scope: String,
    pub compared: Vec<FileCompareResult>,
    pub files_to_sync: usize,
    pub total_bytes: u64,
    pub phase_label: String,
}

/// Whole-volume tar stream sized by the measured volume.
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    pub mount: MountTransferConfig,
    pub files_to_sync: usize,
    pub total_bytes: u64,
    pub phase_label: String,
}

#[derive(Debug, Clone)]
pub enum TransferPlan {
    Diff(DiffPlan),
    Archive(ArchivePlan),
}

impl TransferPlan {
    pub fn mount(&self) -> &MountTransferConfig {
        match self {
            TransferPlan::Diff(plan) => &plan.mount,
            TransferPlan::Archive(plan) => &plan.mount,
        }
    }

    pub fn files_to_sync(&self) -> usize {
        match self {
            TransferPlan::Diff(plan) => plan.files_to_sync,
            TransferPlan::Archive(plan) => plan.files_to_sync,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        match self {
            TransferPlan::Diff(plan) => plan.total_bytes,
            TransferPlan::Archive(plan) => plan.total_bytes,
        }
    }

    pub fn phase_label(&self) -> &str {
        match self {
            TransferPlan::Diff(plan) => &plan.phase_label,
            TransferPlan::Archive(plan) => &plan.phase_label,
        }
    }
}

/// Count and byte weight of the files that pass [`should_sync_file`].
pub fn summarize(
    compared: &[FileCompareResult],
    strategy: MergeStrategy,
    decisions: &DecisionMap,
    scope: &str,
) -> (usize, u64) {
    compared
        .iter()
        .filter(|f| should_sync_file(f, strategy, Some(decisions), Some(scope)))
        .fold((0, 0), |(count, bytes), f| (count + 1, bytes + f.size()))
}

/// Volumes without any `skip` decision may go as one archive, provided the
/// target holds nothing the archive could overwrite.
pub fn archive_eligible(mount: &MountTransferConfig, decisions: &DecisionMap) -> bool {
    mount.mount_type == MountType::Volume && !decisions.has_skip_for_scope(&mount.mount_id)
}

pub struct Planner<'a> {
    transport: &'a dyn Transport,
    source: &'a Endpoint,
    target: &'a Endpoint,
}

impl<'a> Planner<'a> {
    pub fn new(transport: &'a dyn Transport, source: &'a Endpoint, target: &'a Endpoint) -> Self {
        Self { transport, source, target }
    }

    /// Scan both sides (concurrently, both reads) and compare.
    pub fn compare_mount(&self, mount: &MountTransferConfig, scope: &str) -> Vec<FileCompareResult> {
        let (source_files, target_files) = rayon::join(
            || scan_mount(self.transport, self.source, mount.mount_type, &mount.source_path, None),
            || scan_mount(self.transport, self.target, mount.mount_type, &mount.target_path, None),
        );
        with_decision_keys(compare_file_lists(&source_files, &target_files), scope)
    }

    pub fn diff_plan(
        &self,
        mount: &MountTransferConfig,
        scope: &str,
        decisions: &DecisionMap,
        phase_label: String,
    ) -> DiffPlan {
        let compared = self.compare_mount(mount, scope);
        let (files_to_sync, total_bytes) = summarize(&compared, MergeStrategy::Manual, decisions, scope);
        DiffPlan {
            mount: mount.clone(),
            scope: scope.to_string(),
            compared,
            files_to_sync,
            total_bytes,
            phase_label,
        }
    }

    /// No files in the target volume, or no target volume at all.
    fn target_volume_is_empty(&self, mount: &MountTransferConfig) -> Result<bool> {
        let entries = CommandScanner::volume(self.transport, self.target).scan(&mount.target_path, None)?;
        Ok(entries.iter().all(|entry| entry.is_directory))
    }

    /// Archive a volume into an empty target, where it lands exactly what the
    /// itemized diff would; diff everything else.
    pub fn plan_mount(&self, mount: &MountTransferConfig, decisions: &DecisionMap) -> TransferPlan {
        let phase_label = format!("Syncing {}: {}", mount.mount_type, mount.source_path);
        if archive_eligible(mount, decisions) {
            match self.archive_plan(mount, &phase_label) {
                Ok(Some(plan)) => return TransferPlan::Archive(plan),
                Ok(None) => {}
                Err(e) => warn!("Falling back to a file diff for {}: {}", mount.label(), e),
            }
        }
        TransferPlan::Diff(self.diff_plan(mount, &mount.mount_id, decisions, phase_label))
    }

    fn archive_plan(&self, mount: &MountTransferConfig, phase_label: &str) -> Result<Option<ArchivePlan>> {
        if !self.target_volume_is_empty(mount)? {
            return Ok(None);
        }
        let total_bytes = volume_size(self.transport, self.source, &mount.source_path)?;
        Ok(Some(ArchivePlan {
            mount: mount.clone(),
            files_to_sync: if total_bytes > 0 { 1 } else { 0 },
            total_bytes,
            phase_label: phase_label.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileInfo;

    fn file(status: FileStatus) -> FileCompareResult {
        FileCompareResult::new(
            FileInfo { path: "/data/a.txt".into(), size: 100, mtime: 1, mode: "644".into(), is_directory: false },
            status,
            None,
        )
    }

    const ALL: [MergeStrategy; 4] = [MergeStrategy::Skip, MergeStrategy::Overwrite, MergeStrategy::Newer, MergeStrategy::Manual];

    #[test]
    fn status_rules_per_strategy() {
        for strategy in ALL {
            assert!(!should_sync_file(&file(FileStatus::Match), strategy, None, None));
            assert!(should_sync_file(&file(FileStatus::MissingTarget), strategy, None, None));
            assert!(!should_sync_file(&file(FileStatus::MissingSource), strategy, None, None));
        }

        assert!(!should_sync_file(&file(FileStatus::NewerSource), MergeStrategy::Skip, None, None));
        assert!(should_sync_file(&file(FileStatus::NewerSource), MergeStrategy::Manual, None, None));

        assert!(should_sync_file(&file(FileStatus::NewerTarget), MergeStrategy::Overwrite, None, None));
        assert!(!should_sync_file(&file(FileStatus::NewerTarget), MergeStrategy::Newer, None, None));

        assert!(should_sync_file(&file(FileStatus::Conflict), MergeStrategy::Overwrite, None, None));
        assert!(should_sync_file(&file(FileStatus::Conflict), MergeStrategy::Newer, None, None));
        assert!(!should_sync_file(&file(FileStatus::Conflict), MergeStrategy::Skip, None, None));
        assert!(!should_sync_file(&file(FileStatus::Conflict), MergeStrategy::Manual, None, None));
    }

    #[test]
    fn manual_decisions_override_status() {
        let mut decisions = DecisionMap::new();
        decisions.insert("vol-1:/data/a.txt", Decision::Skip);
        for strategy in ALL {
            assert!(!should_sync_file(&file(FileStatus::MissingTarget), strategy, Some(&decisions), Some("vol-1")));
        }

        let mut decisions = DecisionMap::new();
        decisions.insert("vol-1:/data/a.txt", Decision::Overwrite);
        for strategy in ALL {
            assert!(should_sync_file(&file(FileStatus::Match), strategy, Some(&decisions), Some("vol-1")));
        }
        // Other scopes are unaffected
        assert!(!should_sync_file(&file(FileStatus::Match), MergeStrategy::Manual, Some(&decisions), Some("vol-2")));
    }

    #[test]
    fn directories_are_never_synced() {
        let mut dir = file(FileStatus::MissingTarget);
        dir.info.is_directory = true;
        let mut decisions = DecisionMap::new();
        decisions.insert("/data/a.txt", Decision::Overwrite);
        assert!(!should_sync_file(&dir, MergeStrategy::Overwrite, Some(&decisions), None));
    }

    #[test]
    fn archive_only_considered_for_volumes_without_skips() {
        let volume = MountTransferConfig::new("vol-1", MountType::Volume, "app_data");
        let bind = MountTransferConfig::new("bind-1", MountType::Bind, "/srv/data");
        let mut decisions = DecisionMap::new();
        decisions.insert("vol-1:/a", Decision::Overwrite);
        decisions.insert("bind-1:/a", Decision::Skip);
        assert!(archive_eligible(&volume, &decisions));
        assert!(!archive_eligible(&bind, &DecisionMap::new()));

        decisions.insert("vol-1:/b", Decision::Skip);
        assert!(!archive_eligible(&volume, &decisions));
    }

    #[test]
    fn summarize_counts_only_synced_files() {
        let compared = vec![file(FileStatus::MissingTarget), file(FileStatus::Match), file(FileStatus::Conflict)];
        assert_eq!(summarize(&compared, MergeStrategy::Manual, &DecisionMap::new(), "m"), (1, 100));
    }
}

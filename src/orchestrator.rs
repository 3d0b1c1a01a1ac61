//! The two public phases of a transfer: scan (read-only on both sides) and execute.

use crate::engine::{SyncEngine, SyncEvent};
use crate::hash::{needs_hash, HashVerifier};
use crate::model::{
    DecisionMap, Endpoint, FileCompareResult, FileInfo, MergeStrategy, MountTransferConfig, MountType, SyncFailure,
    TransferOptions,
};
use crate::mounts::MountResolver;
use crate::plan::{DiffPlan, Planner, TransferPlan};
use crate::preflight::{check_target_path, create_directory, create_volume};
use crate::compare::{compare_file_lists, with_decision_keys};
use crate::scanner::{scan_mount, volume_size};
use crate::services::{ComposeLoader, MountStore, TraefikStore};
use crate::session::{SyncControl, TransferSession, TransferState};
use crate::settings::{service_dir_mount_id, EngineSettings};
use crate::transport::Transport;
use crate::{Result, ShiftError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferScanProgress {
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub processed_mounts: usize,
    pub total_mounts: usize,
    pub scanned_files: usize,
    pub processed_hashes: usize,
    pub total_hashes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub processed_files: usize,
    pub total_files: usize,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub percentage: u32,
}

/// Rounded share of `total` already transferred; 0 when there is nothing to move.
pub fn percentage(transferred: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((transferred as f64 / total as f64) * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDirScan {
    pub path: String,
    pub files: Vec<FileCompareResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraefikConfigStatus {
    pub source_exists: bool,
    pub target_exists: bool,
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeScanResult {
    pub volume_name: String,
    pub mount_path: String,
    pub size_bytes: u64,
    pub files: Vec<FileCompareResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindScanResult {
    pub host_path: String,
    pub files: Vec<FileCompareResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferScanResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_dir: Option<ServiceDirScan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traefik_config: Option<TraefikConfigStatus>,
    pub volumes: Vec<VolumeScanResult>,
    pub binds: Vec<BindScanResult>,
    pub total_size_bytes: u64,
    /// Entries still needing a decision after hashing
    pub conflicts: Vec<FileCompareResult>,
    pub has_conflicts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub cancelled: bool,
    pub errors: Vec<SyncFailure>,
}

/// Push a non-fatal error into `errors`, or hand a fatal one back.
fn absorb(errors: &mut Vec<SyncFailure>, scope: &str, err: ShiftError) -> Result<()> {
    if err.is_fatal() {
        return Err(err);
    }
    let failure = SyncFailure { scope: scope.to_string(), path: None, message: err.to_string() };
    error!("{}", failure);
    errors.push(failure);
    Ok(())
}

fn data_bytes(files: &[FileInfo]) -> u64 {
    files.iter().filter(|f| !f.is_directory).map(|f| f.size).sum()
}

/// Counters behind [`TransferScanProgress`], shared by concurrent scans.
struct ScanTracker<'a> {
    on_progress: &'a (dyn Fn(TransferScanProgress) + Sync),
    emit_interval: usize,
    hash_emit_interval: usize,
    total_mounts: usize,
    processed_mounts: AtomicUsize,
    scanned_files: AtomicUsize,
    processed_hashes: AtomicUsize,
    total_hashes: AtomicUsize,
}

impl<'a> ScanTracker<'a> {
    fn emit(&self, phase: &str, mount: Option<&str>, current_file: Option<&str>) {
        (self.on_progress)(TransferScanProgress {
            phase: phase.to_string(),
            mount: mount.map(String::from),
            current_file: current_file.map(String::from),
            processed_mounts: self.processed_mounts.load(Ordering::SeqCst),
            total_mounts: self.total_mounts,
            scanned_files: self.scanned_files.load(Ordering::SeqCst),
            processed_hashes: self.processed_hashes.load(Ordering::SeqCst),
            total_hashes: self.total_hashes.load(Ordering::SeqCst),
        });
    }

    fn file_scanned(&self, phase: &str, mount: &str, path: &str) {
        let scanned = self.scanned_files.fetch_add(1, Ordering::SeqCst) + 1;
        if scanned % self.emit_interval == 0 {
            self.emit(phase, Some(mount), Some(path));
        }
    }

    fn file_hashed(&self, path: &str) {
        let hashed = self.processed_hashes.fetch_add(1, Ordering::SeqCst) + 1;
        if hashed % self.hash_emit_interval == 0 || hashed == self.total_hashes.load(Ordering::SeqCst) {
            self.emit("Hashing changed files", None, Some(path));
        }
    }
}

/// Counters behind [`TransferProgress`], one set for the whole transfer.
struct ExecTracker<'a> {
    on_progress: &'a mut dyn FnMut(TransferProgress),
    processed_files: usize,
    total_files: usize,
    transferred_bytes: u64,
    total_bytes: u64,
}

impl<'a> ExecTracker<'a> {
    fn emit(&mut self, phase: &str, current_file: Option<&str>) {
        (self.on_progress)(TransferProgress {
            phase: phase.to_string(),
            current_file: current_file.map(String::from),
            processed_files: self.processed_files,
            total_files: self.total_files,
            transferred_bytes: self.transferred_bytes,
            total_bytes: self.total_bytes,
            percentage: percentage(self.transferred_bytes, self.total_bytes),
        });
    }

    fn apply(&mut self, phase: &str, event: SyncEvent) {
        self.processed_files += event.processed_files;
        self.transferred_bytes += event.transferred_bytes;
        self.emit(phase, event.current_file.as_deref());
    }
}

/// A mount scanned on both sides, before hashing.
struct ScannedMount {
    mount: MountTransferConfig,
    files: Vec<FileCompareResult>,
    size_bytes: u64,
}

pub struct TransferService {
    transport: Arc<dyn Transport>,
    mounts: Arc<dyn MountStore>,
    compose: Arc<dyn ComposeLoader>,
    traefik: Arc<dyn TraefikStore>,
    settings: EngineSettings,
}

impl TransferService {
    pub fn new(
        transport: Arc<dyn Transport>,
        mounts: Arc<dyn MountStore>,
        compose: Arc<dyn ComposeLoader>,
        traefik: Arc<dyn TraefikStore>,
        settings: EngineSettings,
    ) -> Self {
        Self { transport, mounts, compose, traefik, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn connect(&self, options: &TransferOptions) -> Result<(Endpoint, Endpoint)> {
        let source = options.source();
        let target = options.target();
        self.transport.connect(&source)?;
        self.transport.connect(&target)?;
        Ok((source, target))
    }

    fn resolve_mounts(&self, options: &TransferOptions) -> Result<Vec<MountTransferConfig>> {
        MountResolver::new(self.mounts.as_ref(), self.compose.as_ref(), &self.settings.paths).resolve(options)
    }

    /// The service's own directory, treated as a bind mount with its own decision scope.
    fn service_dir_mount(&self, options: &TransferOptions) -> Option<MountTransferConfig> {
        let dir = self.settings.paths.service_dir(options.service_type, &options.app_name)?;
        Some(MountTransferConfig::new(
            service_dir_mount_id(options.service_type, &options.service_id),
            MountType::Bind,
            dir,
        ))
    }

    fn read_traefik(&self, app_name: &str, endpoint: &Endpoint) -> Option<String> {
        match self.traefik.read_config(app_name, endpoint) {
            Ok(config) => config.filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("Failed to read Traefik config for {} on {}: {}", app_name, endpoint, e);
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Scan
    // ---------------------------------------------------------------------

    /// Compare source and target for every mount of the service without writing anything.
    pub fn scan(
        &self,
        options: &TransferOptions,
        session: &TransferSession,
        on_progress: &(dyn Fn(TransferScanProgress) + Sync),
    ) -> Result<TransferScanResult> {
        session.transition(TransferState::Scanning)?;
        match self.run_scan(options, session, on_progress) {
            Ok(result) => {
                session.transition(TransferState::Ready)?;
                Ok(result)
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                let _ = session.transition(TransferState::Error);
                Err(e)
            }
        }
    }

    fn scan_side(
        &self,
        tracker: &ScanTracker<'_>,
        endpoint: &Endpoint,
        mount_type: MountType,
        root: &str,
        label: &str,
        side: &str,
    ) -> Vec<FileInfo> {
        let phase = format!("Scanning {} mount", side);
        tracker.emit(&phase, Some(label), None);
        let on_entry = |file: &FileInfo| tracker.file_scanned(&phase, label, &file.path);
        let files = scan_mount(self.transport.as_ref(), endpoint, mount_type, root, Some(&on_entry));
        tracker.processed_mounts.fetch_add(1, Ordering::SeqCst);
        tracker.emit(&format!("Scanned {} mount", side), Some(label), None);
        files
    }

    /// Scan both sides of `mount` concurrently and compare them under `scope`.
    fn scan_pair(
        &self,
        tracker: &ScanTracker<'_>,
        source: &Endpoint,
        target: &Endpoint,
        mount: &MountTransferConfig,
        label: &str,
    ) -> (Vec<FileCompareResult>, Vec<FileInfo>) {
        let (source_files, target_files) = rayon::join(
            || self.scan_side(tracker, source, mount.mount_type, &mount.source_path, label, "source"),
            || self.scan_side(tracker, target, mount.mount_type, &mount.target_path, label, "target"),
        );
        let compared = with_decision_keys(compare_file_lists(&source_files, &target_files), &mount.mount_id);
        (compared, source_files)
    }

    fn run_scan(
        &self,
        options: &TransferOptions,
        session: &TransferSession,
        on_progress: &(dyn Fn(TransferScanProgress) + Sync),
    ) -> Result<TransferScanResult> {
        let (source, target) = self.connect(options)?;
        let mounts = self.resolve_mounts(options)?;
        let service_dir = self.service_dir_mount(options);
        info!(
            "Scanning {} {} ({} mounts) from {} to {}",
            options.service_type.as_str(),
            options.app_name,
            mounts.len(),
            source,
            target
        );

        let tracker = ScanTracker {
            on_progress,
            emit_interval: self.settings.scan_emit_interval.max(1),
            hash_emit_interval: self.settings.hash_emit_interval.max(1),
            total_mounts: (mounts.len() + usize::from(service_dir.is_some())) * 2,
            processed_mounts: AtomicUsize::new(0),
            scanned_files: AtomicUsize::new(0),
            processed_hashes: AtomicUsize::new(0),
            total_hashes: AtomicUsize::new(0),
        };
        tracker.emit("Preparing scan", None, None);

        let mut result = TransferScanResult::default();

        let mut service_dir_scan = None;
        if let Some(dir_mount) = service_dir {
            let (files, source_files) = self.scan_pair(&tracker, &source, &target, &dir_mount, &dir_mount.source_path);
            result.total_size_bytes += data_bytes(&source_files);
            service_dir_scan = Some(ScannedMount { mount: dir_mount, files, size_bytes: 0 });
        }

        if options.service_type.has_service_dir() {
            let source_content = self.read_traefik(&options.app_name, &source);
            let target_content = self.read_traefik(&options.app_name, &target);
            result.traefik_config = Some(TraefikConfigStatus {
                source_exists: source_content.is_some(),
                target_exists: target_content.is_some(),
                has_conflict: matches!((&source_content, &target_content), (Some(s), Some(t)) if s != t),
                source_content,
                target_content,
            });
        }

        let mut scanned = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let label = mount.label();
            let size_bytes = match mount.mount_type {
                MountType::Volume => volume_size(self.transport.as_ref(), &source, &mount.source_path)
                    .unwrap_or_else(|e| {
                        warn!("Failed to measure volume {} on {}: {}", mount.source_path, source, e);
                        0
                    }),
                MountType::Bind => 0,
            };
            let (files, source_files) = self.scan_pair(&tracker, &source, &target, &mount, &label);
            let size_bytes = match mount.mount_type {
                MountType::Volume => size_bytes,
                MountType::Bind => data_bytes(&source_files),
            };
            result.total_size_bytes += size_bytes;
            scanned.push(ScannedMount { mount, files, size_bytes });
        }

        session.transition(TransferState::Comparing)?;

        let total_hashes = service_dir_scan
            .iter()
            .chain(scanned.iter())
            .map(|s| s.files.iter().filter(|f| needs_hash(f)).count())
            .sum::<usize>();
        tracker.total_hashes.store(total_hashes, Ordering::SeqCst);
        if total_hashes > 0 {
            tracker.emit("Hashing changed files", None, None);
            let verifier = HashVerifier::new(self.transport.as_ref(), &source, &target, self.settings.hash_parallelism);
            let on_hashed = |path: &str| tracker.file_hashed(path);
            for entry in service_dir_scan.iter_mut().chain(scanned.iter_mut()) {
                verifier.verify(
                    entry.mount.mount_type,
                    &entry.mount.source_path,
                    &entry.mount.target_path,
                    &mut entry.files,
                    Some(&on_hashed),
                )?;
            }
        }

        if let Some(dir) = service_dir_scan {
            result.service_dir = Some(ServiceDirScan { path: dir.mount.source_path, files: dir.files });
        }
        for entry in scanned {
            match entry.mount.mount_type {
                MountType::Volume => result.volumes.push(VolumeScanResult {
                    volume_name: entry.mount.source_path,
                    mount_path: entry.mount.mount_path.unwrap_or_default(),
                    size_bytes: entry.size_bytes,
                    files: entry.files,
                }),
                MountType::Bind => result.binds.push(BindScanResult {
                    host_path: entry.mount.source_path,
                    files: entry.files,
                }),
            }
        }

        result.conflicts = result
            .service_dir
            .iter()
            .flat_map(|d| d.files.iter())
            .chain(result.volumes.iter().flat_map(|v| v.files.iter()))
            .chain(result.binds.iter().flat_map(|b| b.files.iter()))
            .filter(|f| f.status.needs_attention())
            .cloned()
            .collect();
        result.has_conflicts = !result.conflicts.is_empty();

        info!(
            "Scan complete: {} bytes, {} entries need attention",
            result.total_size_bytes,
            result.conflicts.len()
        );
        tracker.emit("Scan complete", None, None);
        Ok(result)
    }

    // ---------------------------------------------------------------------
    // Execute
    // ---------------------------------------------------------------------

    /// Copy everything the decisions and statuses select from source to target.
    pub fn execute(
        &self,
        options: &TransferOptions,
        decisions: &DecisionMap,
        session: &TransferSession,
        on_progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<TransferOutcome> {
        session.transition(TransferState::Syncing)?;
        let mut tracker = ExecTracker {
            on_progress,
            processed_files: 0,
            total_files: 0,
            transferred_bytes: 0,
            total_bytes: 0,
        };

        match self.run_execute(options, decisions, session, &mut tracker) {
            Ok(outcome) => {
                let next = if outcome.cancelled {
                    TransferState::Cancelled
                } else if outcome.errors.is_empty() {
                    TransferState::Completed
                } else {
                    TransferState::Error
                };
                session.transition(next)?;
                Ok(outcome)
            }
            Err(e) => {
                error!("Transfer failed: {}", e);
                tracker.emit("Transfer failed", None);
                let _ = session.transition(TransferState::Error);
                Err(e)
            }
        }
    }

    fn plan(
        &self,
        options: &TransferOptions,
        decisions: &DecisionMap,
        source: &Endpoint,
        target: &Endpoint,
        tracker: &mut ExecTracker<'_>,
    ) -> Result<(Option<DiffPlan>, Vec<TransferPlan>)> {
        tracker.emit("Preparing transfer plan", None);
        let planner = Planner::new(self.transport.as_ref(), source, target);
        let mounts = self.resolve_mounts(options)?;
        let service_dir = self.service_dir_mount(options);
        let planning_total = mounts.len() + usize::from(service_dir.is_some());
        let mut step = 0;
        let mut step_label = || {
            step += 1;
            format!("Preparing transfer plan ({}/{})", step, planning_total)
        };

        let mut service_dir_plan = None;
        if let Some(dir_mount) = service_dir {
            tracker.emit(&step_label(), Some(&format!("Analyzing bind: {}", dir_mount.source_path)));
            let label = format!("Syncing service directory: {}", dir_mount.source_path);
            let plan = planner.diff_plan(&dir_mount, &dir_mount.mount_id, decisions, label);
            tracker.total_files += plan.files_to_sync;
            tracker.total_bytes += plan.total_bytes;
            service_dir_plan = Some(plan);
        }

        let mut plans = Vec::with_capacity(mounts.len());
        for mount in &mounts {
            let detail = format!("Analyzing {}: {}", mount.mount_type, mount.source_path);
            tracker.emit(&step_label(), Some(&detail));
            let plan = planner.plan_mount(mount, decisions);
            if matches!(plan, TransferPlan::Archive(_)) {
                tracker.emit(&step_label(), Some(&format!("{} (archive mode)", detail)));
            }
            tracker.total_files += plan.files_to_sync();
            tracker.total_bytes += plan.total_bytes();
            plans.push(plan);
        }

        info!(
            "Transfer plan: {} files, {} bytes across {} mounts",
            tracker.total_files,
            tracker.total_bytes,
            plans.len()
        );
        Ok((service_dir_plan, plans))
    }

    /// Compare planned bytes against free space for each bind target path.
    fn check_capacity(&self, target: &Endpoint, service_dir: Option<&DiffPlan>, plans: &[TransferPlan]) -> Result<()> {
        let mut required: BTreeMap<&str, u64> = BTreeMap::new();
        let bind_plans = service_dir.into_iter().chain(plans.iter().filter_map(|p| match p {
            TransferPlan::Diff(diff) if diff.mount.mount_type == MountType::Bind => Some(diff),
            _ => None,
        }));
        for plan in bind_plans {
            if plan.total_bytes > 0 {
                *required.entry(plan.mount.target_path.as_str()).or_default() += plan.total_bytes;
            }
        }

        for (path, bytes) in required {
            let check = match check_target_path(self.transport.as_ref(), target, path) {
                Ok(check) => check,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Could not check free space for {} on {}: {}", path, target, e);
                    continue;
                }
            };
            if check.exists && !check.writable {
                warn!("{} on {} is not writable", path, target);
            }
            match check.free_bytes {
                Some(available) if available < bytes => {
                    if self.settings.require_free_space {
                        return Err(ShiftError::InsufficientSpace { path: path.to_string(), required: bytes, available });
                    }
                    warn!("{} on {} has {} bytes free, {} planned", path, target, available, bytes);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sync_traefik(
        &self,
        options: &TransferOptions,
        source: &Endpoint,
        target: &Endpoint,
        tracker: &mut ExecTracker<'_>,
    ) -> Result<()> {
        const PHASE: &str = "Syncing Traefik configuration";
        tracker.emit(PHASE, None);
        tracker.emit(PHASE, Some(&format!("Syncing Traefik config: {}.yml", options.app_name)));
        match self.traefik.read_config(&options.app_name, source)? {
            Some(config) if !config.is_empty() => self.traefik.write_config(&options.app_name, target, &config),
            _ => {
                tracker.emit(PHASE, Some("No Traefik config found on source, skipping"));
                Ok(())
            }
        }
    }

    fn prepare_target(&self, target: &Endpoint, mount: &MountTransferConfig) -> Result<()> {
        match mount.mount_type {
            MountType::Volume => create_volume(self.transport.as_ref(), target, &mount.target_path, &mount.compose_labels()),
            MountType::Bind => create_directory(self.transport.as_ref(), target, &mount.target_path),
        }
    }

    fn run_execute(
        &self,
        options: &TransferOptions,
        decisions: &DecisionMap,
        session: &TransferSession,
        tracker: &mut ExecTracker<'_>,
    ) -> Result<TransferOutcome> {
        let (source, target) = self.connect(options)?;
        let (service_dir_plan, plans) = self.plan(options, decisions, &source, &target, tracker)?;
        self.check_capacity(&target, service_dir_plan.as_ref(), &plans)?;

        let engine = SyncEngine::new(self.transport.as_ref(), &source, &target, session)
            .with_batch_size(self.settings.batch_size);
        let mut errors = Vec::new();
        let mut cancelled = false;

        if let Some(plan) = &service_dir_plan {
            tracker.emit(&plan.phase_label, None);
            match create_directory(self.transport.as_ref(), &target, &plan.mount.target_path) {
                Ok(()) => {
                    let report = engine.sync_mount(
                        &plan.mount,
                        &plan.compared,
                        MergeStrategy::Manual,
                        decisions,
                        &mut |event: SyncEvent| tracker.apply(&plan.phase_label, event),
                    )?;
                    errors.extend(report.errors);
                    cancelled = report.cancelled;
                }
                Err(e) => absorb(&mut errors, &plan.mount.label(), e)?,
            }
        }

        if !cancelled && options.service_type.has_service_dir() {
            if let Err(e) = self.sync_traefik(options, &source, &target, tracker) {
                absorb(&mut errors, &format!("traefik:{}", options.app_name), e)?;
            }
        }

        // Mounts whose target could not be prepared are not synced
        let mut ready = Vec::with_capacity(plans.len());
        if !cancelled {
            for plan in &plans {
                match self.prepare_target(&target, plan.mount()) {
                    Ok(()) => ready.push(plan),
                    Err(e) => absorb(&mut errors, &plan.mount().label(), e)?,
                }
            }
        }

        for plan in ready {
            session.wait_for_resume();
            if session.is_cancelled() {
                cancelled = true;
                break;
            }

            let phase = plan.phase_label();
            tracker.emit(phase, None);
            match plan {
                TransferPlan::Archive(archive) => {
                    if archive.files_to_sync == 0 {
                        continue;
                    }
                    tracker.emit(phase, Some("[archive stream]"));
                    match engine.sync_volume_archive(&archive.mount) {
                        Ok(()) => tracker.apply(phase, SyncEvent {
                            current_file: None,
                            processed_files: archive.files_to_sync,
                            transferred_bytes: archive.total_bytes,
                        }),
                        Err(e) => absorb(&mut errors, &archive.mount.label(), e)?,
                    }
                }
                TransferPlan::Diff(diff) => {
                    let report = engine.sync_mount(
                        &diff.mount,
                        &diff.compared,
                        MergeStrategy::Manual,
                        decisions,
                        &mut |event: SyncEvent| tracker.apply(phase, event),
                    )?;
                    errors.extend(report.errors);
                    if report.cancelled {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        // A pause landing after the last unit still holds completion
        session.wait_for_resume();
        if session.state() == TransferState::Paused {
            cancelled = true;
        }

        if cancelled {
            info!("Transfer cancelled");
            tracker.emit("Transfer cancelled", None);
        } else {
            info!("Transfer complete with {} errors", errors.len());
            tracker.emit("Transfer complete", None);
        }

        Ok(TransferOutcome { success: errors.is_empty() && !cancelled, cancelled, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_and_handles_empty_totals() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(50, 0), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(10, 10), 100);
    }

    #[test]
    fn non_fatal_errors_are_collected() {
        let mut errors = Vec::new();
        absorb(&mut errors, "volume:data", ShiftError::Compose("bad".into())).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].scope, "volume:data");

        let fatal = absorb(&mut errors, "volume:data", ShiftError::ServerNotFound("s".into()));
        assert!(fatal.is_err());
        assert_eq!(errors.len(), 1);
    }
}

use crate::docker;
use crate::model::{DecisionMap, Endpoint, FileCompareResult, MergeStrategy, MountTransferConfig, MountType, SyncFailure};
use crate::plan::should_sync_file;
use crate::preflight::create_directory;
use crate::session::SyncControl;
use crate::settings::DEFAULT_BATCH_SIZE;
use crate::transport::Transport;
use crate::util::{join_root, parent_dir, shell_quote};
use crate::{Result, ShiftError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, error, info, warn};

/// Progress delta reported after each unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncEvent {
    pub current_file: Option<String>,
    pub processed_files: usize,
    pub transferred_bytes: u64,
}

impl SyncEvent {
    fn started(path: &str) -> Self {
        Self { current_file: Some(path.to_string()), ..Self::default() }
    }

    fn done(processed_files: usize, transferred_bytes: u64) -> Self {
        Self { current_file: None, processed_files, transferred_bytes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSyncReport {
    pub processed_files: usize,
    pub transferred_bytes: u64,
    pub errors: Vec<SyncFailure>,
    pub cancelled: bool,
}

impl MountSyncReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// `/a/b` -> `./a/b`, the member name tar uses below `-C root`.
fn tar_member(path: &str) -> String {
    format!(".{}", path)
}

/// Copies the selected entries of one mount from source to target.
pub struct SyncEngine<'a> {
    transport: &'a dyn Transport,
    source: &'a Endpoint,
    target: &'a Endpoint,
    control: &'a dyn SyncControl,
    batch_size: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        source: &'a Endpoint,
        target: &'a Endpoint,
        control: &'a dyn SyncControl,
    ) -> Self {
        Self { transport, source, target, control, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stop at a unit boundary: wait out a pause, then report whether to abort.
    fn should_stop(&self) -> bool {
        self.control.wait_for_resume();
        self.control.is_cancelled()
    }

    /// Record a non-fatal failure, or abort the mount on a fatal one.
    fn record(&self, report: &mut MountSyncReport, mount: &MountTransferConfig, path: Option<&str>, err: ShiftError) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        let failure = SyncFailure {
            scope: mount.label(),
            path: path.map(String::from),
            message: err.to_string(),
        };
        error!("{}", failure);
        report.errors.push(failure);
        Ok(())
    }

    pub fn sync_mount(
        &self,
        mount: &MountTransferConfig,
        files: &[FileCompareResult],
        strategy: MergeStrategy,
        decisions: &DecisionMap,
        on_event: &mut dyn FnMut(SyncEvent),
    ) -> Result<MountSyncReport> {
        let selected: Vec<&FileCompareResult> = files
            .iter()
            .filter(|f| should_sync_file(f, strategy, Some(decisions), Some(&mount.mount_id)))
            .collect();
        info!("Syncing {} entries of {}", selected.len(), mount.label());

        match mount.mount_type {
            MountType::Volume => self.sync_volume_files(mount, &selected, on_event),
            MountType::Bind => self.sync_bind_files(mount, &selected, on_event),
        }
    }

    fn sync_volume_files(
        &self,
        mount: &MountTransferConfig,
        selected: &[&FileCompareResult],
        on_event: &mut dyn FnMut(SyncEvent),
    ) -> Result<MountSyncReport> {
        let mut report = MountSyncReport::default();

        for batch in selected.chunks(self.batch_size) {
            if self.should_stop() {
                report.cancelled = true;
                return Ok(report);
            }

            let batch_bytes: u64 = batch.iter().map(|f| f.size()).sum();
            on_event(SyncEvent::started(batch[0].path()));

            match self.sync_volume_batch(mount, batch) {
                Ok(()) => {
                    report.processed_files += batch.len();
                    report.transferred_bytes += batch_bytes;
                    on_event(SyncEvent::done(batch.len(), batch_bytes));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Volume batch sync failed for {}, falling back to per-file mode: {}",
                        mount.source_path, e
                    );
                    for file in batch {
                        if self.should_stop() {
                            report.cancelled = true;
                            return Ok(report);
                        }
                        on_event(SyncEvent::started(file.path()));
                        match self.sync_volume_file(mount, file.path()) {
                            Ok(()) => {
                                report.processed_files += 1;
                                report.transferred_bytes += file.size();
                                on_event(SyncEvent::done(1, file.size()));
                            }
                            Err(e) => self.record(&mut report, mount, Some(file.path()), e)?,
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// One tar stream for many files; the member list travels base64-encoded.
    fn sync_volume_batch(&self, mount: &MountTransferConfig, batch: &[&FileCompareResult]) -> Result<()> {
        let list = batch.iter().map(|f| tar_member(f.path())).collect::<Vec<_>>().join("\n");
        let encoded = STANDARD.encode(list.as_bytes());
        let script = format!(
            "echo {} | base64 -d > /tmp/files.txt && tar czf - -C {} -T /tmp/files.txt",
            shell_quote(&encoded),
            docker::VOLUME_ROOT
        );
        debug!("Streaming batch of {} files from {}", batch.len(), mount.source_path);
        self.transport.pipe(
            self.source,
            self.target,
            &docker::stream_from_volume(&mount.source_path, &script),
            &docker::extract_into_volume(&mount.target_path, true),
        )
    }

    fn sync_volume_file(&self, mount: &MountTransferConfig, path: &str) -> Result<()> {
        let script = format!("tar czf - -C {} {}", docker::VOLUME_ROOT, shell_quote(&tar_member(path)));
        self.transport.pipe(
            self.source,
            self.target,
            &docker::stream_from_volume(&mount.source_path, &script),
            &docker::extract_into_volume(&mount.target_path, true),
        )
    }

    /// Stream the whole volume in one archive.
    pub fn sync_volume_archive(&self, mount: &MountTransferConfig) -> Result<()> {
        let script = format!("tar czf - -C {} .", docker::VOLUME_ROOT);
        info!("Streaming volume {} as one archive", mount.source_path);
        self.transport.pipe(
            self.source,
            self.target,
            &docker::stream_from_volume(&mount.source_path, &script),
            &docker::extract_into_volume(&mount.target_path, true),
        )
    }

    fn sync_bind_files(
        &self,
        mount: &MountTransferConfig,
        selected: &[&FileCompareResult],
        on_event: &mut dyn FnMut(SyncEvent),
    ) -> Result<MountSyncReport> {
        let mut report = MountSyncReport::default();

        for file in selected {
            if self.should_stop() {
                report.cancelled = true;
                return Ok(report);
            }

            on_event(SyncEvent::started(file.path()));
            match self.sync_bind_file(mount, file.path()) {
                Ok(()) => {
                    report.processed_files += 1;
                    report.transferred_bytes += file.size();
                    on_event(SyncEvent::done(1, file.size()));
                }
                Err(e) => self.record(&mut report, mount, Some(file.path()), e)?,
            }
        }

        Ok(report)
    }

    fn sync_bind_file(&self, mount: &MountTransferConfig, path: &str) -> Result<()> {
        let target_full = join_root(&mount.target_path, path);
        let target_dir = parent_dir(&target_full);
        create_directory(self.transport, self.target, target_dir)?;

        if self.source.is_local() && !self.target.is_local() {
            // rsync keeps the source mtime, which later comparisons rely on
            return self
                .transport
                .push_file(self.target, &join_root(&mount.source_path, path), &target_full);
        }

        let source_command = format!(
            "tar cf - -C {} {}",
            shell_quote(&mount.source_path),
            shell_quote(&tar_member(path))
        );
        let target_command = format!(
            "mkdir -p {} && tar xf - -C {}",
            shell_quote(target_dir),
            shell_quote(&mount.target_path)
        );
        self.transport.pipe(self.source, self.target, &source_command, &target_command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tar_members_are_relative() {
        assert_eq!(tar_member("/a/b.txt"), "./a/b.txt");
    }

    #[test]
    fn report_success_requires_no_errors_and_no_cancel() {
        let mut report = MountSyncReport::default();
        assert!(report.success());
        report.cancelled = true;
        assert!(!report.success());
    }
}

use filetime::FileTime;
use shiftstate::backends::ConfigServerDirectory;
use shiftstate::engine::{SyncEngine, SyncEvent};
use shiftstate::model::{Decision, DecisionMap, Endpoint, FileStatus, MergeStrategy, MountTransferConfig, MountType};
use shiftstate::plan::Planner;
use shiftstate::session::{TransferSession, TransferState};
use shiftstate::transport::ShellTransport;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const MTIME: i64 = 1_600_000_000;

/// The production shell (`bash -o pipefail`), so a failing `tar cf` fails the pipe.
fn transport() -> ShellTransport {
    ShellTransport::new(Arc::new(ConfigServerDirectory::new(BTreeMap::new())))
}

fn write(root: &Path, relative: &str, content: &str, mtime: i64) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

fn mtime_of(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

fn bind_mount(source: &Path, target: &Path) -> MountTransferConfig {
    let mut mount = MountTransferConfig::new("m-uploads", MountType::Bind, source.to_string_lossy().to_string());
    mount.target_path = target.to_string_lossy().to_string();
    mount
}

#[test]
fn bind_sync_preserves_mtime_and_is_idempotent() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    write(source_dir.path(), "a.txt", "alpha", MTIME);
    write(source_dir.path(), "nested/deep/b.bin", "bravo bravo", MTIME + 10);
    write(source_dir.path(), "with space/c d.txt", "charlie", MTIME + 20);
    write(target_dir.path(), "stale.txt", "only on target", MTIME);

    let transport = transport();
    let (source, target) = (Endpoint::Local, Endpoint::Local);
    let mount = bind_mount(source_dir.path(), target_dir.path());
    let planner = Planner::new(&transport, &source, &target);

    let plan = planner.diff_plan(&mount, &mount.mount_id, &DecisionMap::new(), "Syncing bind".into());
    assert_eq!(plan.files_to_sync, 3);
    assert_eq!(plan.total_bytes, 5 + 11 + 7);

    let session = TransferSession::new();
    session.transition(TransferState::Syncing).unwrap();
    let engine = SyncEngine::new(&transport, &source, &target, &session);
    let mut seen = Vec::new();
    let report = engine
        .sync_mount(&mount, &plan.compared, MergeStrategy::Manual, &DecisionMap::new(), &mut |event: SyncEvent| {
            if let Some(file) = event.current_file {
                seen.push(file);
            }
        })
        .unwrap();
    assert!(report.success(), "{:?}", report.errors);
    // The three directories on the way are created by the copies, not counted
    assert!(plan.compared.iter().filter(|f| f.is_directory()).count() >= 3);
    assert_eq!(report.processed_files, 3);
    assert_eq!(report.transferred_bytes, 23);
    assert_eq!(seen.len(), 3);

    let copied = target_dir.path().join("nested/deep/b.bin");
    assert_eq!(fs::read_to_string(&copied).unwrap(), "bravo bravo");
    assert_eq!(mtime_of(&copied), MTIME + 10);
    assert_eq!(fs::read_to_string(target_dir.path().join("with space/c d.txt")).unwrap(), "charlie");
    assert_eq!(fs::read_to_string(target_dir.path().join("stale.txt")).unwrap(), "only on target");

    let rescanned = planner.compare_mount(&mount, &mount.mount_id);
    for file in rescanned.iter().filter(|f| !f.is_directory()) {
        let expected = if file.path() == "/stale.txt" { FileStatus::MissingSource } else { FileStatus::Match };
        assert_eq!(file.status, expected, "{}", file.path());
    }

    let again = planner.diff_plan(&mount, &mount.mount_id, &DecisionMap::new(), "Syncing bind".into());
    assert_eq!(again.files_to_sync, 0);
    assert_eq!(again.total_bytes, 0);
}

#[test]
fn newer_target_files_need_an_explicit_overwrite() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    write(source_dir.path(), "config.yml", "from source", MTIME);
    write(target_dir.path(), "config.yml", "edited on target", MTIME + 60);

    let transport = transport();
    let (source, target) = (Endpoint::Local, Endpoint::Local);
    let mount = bind_mount(source_dir.path(), target_dir.path());
    let planner = Planner::new(&transport, &source, &target);
    let session = TransferSession::new();
    let engine = SyncEngine::new(&transport, &source, &target, &session);

    let compared = planner.compare_mount(&mount, &mount.mount_id);
    let config = compared.iter().find(|f| f.path() == "/config.yml").unwrap();
    assert_eq!(config.status, FileStatus::NewerTarget);
    assert_eq!(config.decision_key.as_deref(), Some("m-uploads:/config.yml"));

    let report = engine
        .sync_mount(&mount, &compared, MergeStrategy::Manual, &DecisionMap::new(), &mut |_: SyncEvent| {})
        .unwrap();
    assert_eq!(report.processed_files, 0);
    assert_eq!(fs::read_to_string(target_dir.path().join("config.yml")).unwrap(), "edited on target");

    let decisions: DecisionMap = [("m-uploads:/config.yml".to_string(), Decision::Overwrite)].into_iter().collect();
    let report = engine
        .sync_mount(&mount, &compared, MergeStrategy::Manual, &decisions, &mut |_: SyncEvent| {})
        .unwrap();
    assert_eq!(report.processed_files, 1);
    assert_eq!(fs::read_to_string(target_dir.path().join("config.yml")).unwrap(), "from source");
    assert_eq!(mtime_of(&target_dir.path().join("config.yml")), MTIME);
}

#[test]
fn unreadable_files_are_reported_without_stopping_the_mount() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    write(source_dir.path(), "ok.txt", "fine", MTIME);
    write(source_dir.path(), "gone.txt", "vanishes", MTIME);

    let transport = transport();
    let (source, target) = (Endpoint::Local, Endpoint::Local);
    let mount = bind_mount(source_dir.path(), target_dir.path());
    let planner = Planner::new(&transport, &source, &target);
    let compared = planner.compare_mount(&mount, &mount.mount_id);

    // Deleted between scan and sync
    fs::remove_file(source_dir.path().join("gone.txt")).unwrap();

    let session = TransferSession::new();
    let engine = SyncEngine::new(&transport, &source, &target, &session);
    let report = engine
        .sync_mount(&mount, &compared, MergeStrategy::Manual, &DecisionMap::new(), &mut |_: SyncEvent| {})
        .unwrap();

    assert_eq!(report.processed_files, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path.as_deref(), Some("/gone.txt"));
    assert_eq!(report.errors[0].scope, mount.label());
    assert!(target_dir.path().join("ok.txt").exists());
}

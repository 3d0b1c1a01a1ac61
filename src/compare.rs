use crate::model::{decision_key, FileCompareResult, FileInfo, FileStatus};
use std::collections::{HashMap, HashSet};

/// Classify every path present on either side.
///
/// mtime is the primary signal; size only breaks the tie when mtimes are equal.
pub fn compare_file_lists(source: &[FileInfo], target: &[FileInfo]) -> Vec<FileCompareResult> {
    let mut results = Vec::with_capacity(source.len());
    let target_map: HashMap<&str, &FileInfo> = target.iter()
        .map(|e| (e.path.as_str(), e))
        .collect();
    let mut visited: HashSet<&str> = HashSet::with_capacity(source.len());

    for source_entry in source {
        visited.insert(source_entry.path.as_str());
        match target_map.get(source_entry.path.as_str()) {
            Some(target_entry) => {
                let status = if source_entry.size == target_entry.size && source_entry.mtime == target_entry.mtime {
                    FileStatus::Match
                } else if source_entry.mtime > target_entry.mtime {
                    FileStatus::NewerSource
                } else if source_entry.mtime < target_entry.mtime {
                    FileStatus::NewerTarget
                } else {
                    FileStatus::Conflict
                };
                results.push(FileCompareResult::new(
                    source_entry.clone(),
                    status,
                    Some((*target_entry).clone()),
                ));
            }
            None => {
                results.push(FileCompareResult::new(source_entry.clone(), FileStatus::MissingTarget, None));
            }
        }
    }

    for target_entry in target {
        if !visited.contains(target_entry.path.as_str()) {
            results.push(FileCompareResult::new(target_entry.clone(), FileStatus::MissingSource, None));
        }
    }

    results
}

/// Tag every result with `"<scope>:<path>"` for manual decisions.
pub fn with_decision_keys(mut results: Vec<FileCompareResult>, scope: &str) -> Vec<FileCompareResult> {
    for result in &mut results {
        result.decision_key = Some(decision_key(scope, result.path()));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, mtime: i64) -> FileInfo {
        FileInfo { path: path.into(), size, mtime, mode: "644".into(), is_directory: false }
    }

    fn status_of<'a>(results: &'a [FileCompareResult], path: &str) -> FileStatus {
        results.iter().find(|r| r.path() == path).unwrap().status
    }

    #[test]
    fn test_compare_file_lists() {
        let source = vec![
            entry("/same.txt", 30, 300),
            entry("/new.txt", 20, 200),
            entry("/updated.txt", 10, 100),
            entry("/older.txt", 10, 50),
            entry("/clash.txt", 11, 70),
            entry("/grown.txt", 99, 100),
        ];
        let target = vec![
            entry("/same.txt", 30, 300),
            entry("/updated.txt", 10, 90),
            entry("/older.txt", 10, 60),
            entry("/clash.txt", 12, 70),
            entry("/grown.txt", 1, 90),
            entry("/target-only.txt", 40, 400),
        ];

        let results = compare_file_lists(&source, &target);
        assert_eq!(results.len(), 7);
        assert_eq!(status_of(&results, "/same.txt"), FileStatus::Match);
        assert_eq!(status_of(&results, "/new.txt"), FileStatus::MissingTarget);
        assert_eq!(status_of(&results, "/updated.txt"), FileStatus::NewerSource);
        assert_eq!(status_of(&results, "/older.txt"), FileStatus::NewerTarget);
        assert_eq!(status_of(&results, "/clash.txt"), FileStatus::Conflict);
        // Size differences do not matter once mtimes differ
        assert_eq!(status_of(&results, "/grown.txt"), FileStatus::NewerSource);
        assert_eq!(status_of(&results, "/target-only.txt"), FileStatus::MissingSource);

        let updated = results.iter().find(|r| r.path() == "/updated.txt").unwrap();
        assert_eq!(updated.target_info.as_ref().unwrap().mtime, 90);
        let missing = results.iter().find(|r| r.path() == "/target-only.txt").unwrap();
        assert!(missing.target_info.is_none());
        assert_eq!(missing.size(), 40);
    }

    #[test]
    fn empty_target_means_everything_missing() {
        let source = vec![entry("/a", 1, 1), entry("/b", 2, 2)];
        let results = compare_file_lists(&source, &[]);
        assert!(results.iter().all(|r| r.status == FileStatus::MissingTarget));
    }

    #[test]
    fn decision_keys_use_scope() {
        let results = with_decision_keys(compare_file_lists(&[entry("/a", 1, 1)], &[]), "vol-1");
        assert_eq!(results[0].decision_key.as_deref(), Some("vol-1:/a"));
    }
}

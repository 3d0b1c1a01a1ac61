use crate::docker;
use crate::model::{Endpoint, FileInfo};
use crate::scanner::{EntryCallback, Scanner};
use crate::transport::Transport;
use crate::util::shell_quote;
use crate::Result;

const STAT_FORMAT: &str = "%s|%Y|%a|%F|%n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Bind,
    Volume,
}

/// Scans through `find` + `stat` executed on the endpoint, either directly on a host
/// path or inside a helper container for a named volume.
pub struct CommandScanner<'a> {
    transport: &'a dyn Transport,
    endpoint: &'a Endpoint,
    target: Target,
}

impl<'a> CommandScanner<'a> {
    pub fn bind(transport: &'a dyn Transport, endpoint: &'a Endpoint) -> Self {
        Self { transport, endpoint, target: Target::Bind }
    }

    pub fn volume(transport: &'a dyn Transport, endpoint: &'a Endpoint) -> Self {
        Self { transport, endpoint, target: Target::Volume }
    }
}

pub fn find_script(root: &str) -> String {
    format!(
        "find {} \\( -type f -o -type d \\) -exec stat -c {} {{}} + 2>/dev/null || true",
        shell_quote(root),
        shell_quote(STAT_FORMAT)
    )
}

impl<'a> Scanner for CommandScanner<'a> {
    fn scan(&self, root: &str, on_entry: Option<EntryCallback<'_>>) -> Result<Vec<FileInfo>> {
        let (command, strip_root) = match self.target {
            Target::Bind => (find_script(root), root.to_string()),
            Target::Volume => (
                docker::read_volume_if_exists(root, &find_script(docker::VOLUME_ROOT)),
                docker::VOLUME_ROOT.to_string(),
            ),
        };

        let output = self.transport.exec(self.endpoint, &command)?;
        let mut entries = Vec::new();
        for line in output.stdout.lines() {
            if let Some(info) = parse_stat_line(line, &strip_root) {
                if let Some(callback) = on_entry {
                    callback(&info);
                }
                entries.push(info);
            }
        }
        Ok(entries)
    }
}

/// Parse one `size|mtime|mode|type|name` line; `None` for the root itself and junk.
pub fn parse_stat_line(line: &str, root: &str) -> Option<FileInfo> {
    let mut parts = line.splitn(5, '|');
    let size = parts.next()?.trim().parse().ok()?;
    let mtime = parts.next()?.trim().parse().ok()?;
    let mode = parts.next()?.trim().to_string();
    let kind = parts.next()?;
    let name = parts.next()?;

    let root = root.trim_end_matches('/');
    let relative = name.strip_prefix(root)?;
    if relative.is_empty() || !relative.starts_with('/') {
        return None;
    }

    Some(FileInfo {
        path: relative.to_string(),
        size,
        mtime,
        mode,
        is_directory: kind == "directory",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_output() {
        let root = "/volume_data";
        assert!(parse_stat_line("4096|1700000000|755|directory|/volume_data", root).is_none());

        let dir = parse_stat_line("4096|1700000000|755|directory|/volume_data/data", root).unwrap();
        assert!(dir.is_directory);
        assert_eq!(dir.path, "/data");

        let file = parse_stat_line("100|1700000001|644|regular file|/volume_data/data/a|b.txt", root).unwrap();
        assert_eq!(file.path, "/data/a|b.txt");
        assert_eq!(file.size, 100);
        assert_eq!(file.mtime, 1700000001);
        assert_eq!(file.mode, "644");
        assert!(!file.is_directory);

        let empty = parse_stat_line("0|1700000001|644|regular empty file|/volume_data/e", root).unwrap();
        assert!(!empty.is_directory);
    }

    #[test]
    fn rejects_foreign_and_malformed_lines() {
        assert!(parse_stat_line("100|1|644|regular file|/srv/appx/file", "/srv/app").is_none());
        assert!(parse_stat_line("find: permission denied", "/srv/app").is_none());
        assert!(parse_stat_line("x|1|644|regular file|/srv/app/f", "/srv/app").is_none());
        assert!(parse_stat_line("1|1|644|regular file|/srv/app/f", "/srv/app/").is_some());
    }

    #[test]
    fn find_script_quotes_root() {
        let script = find_script("/srv/my app");
        assert!(script.starts_with("find '/srv/my app' \\( -type f -o -type d \\)"));
        assert!(script.contains("'%s|%Y|%a|%F|%n'"));
    }
}

//! Command builders for reaching into named volumes through throwaway containers.

use crate::util::shell_quote;

/// Where a volume is mounted inside the helper container.
pub const VOLUME_ROOT: &str = "/volume_data";

/// Small image with `tar`, `find`, `stat`, `md5sum`, `du` and `base64`.
pub const HELPER_IMAGE: &str = "alpine";

fn volume_arg(volume: &str, read_only: bool) -> String {
    let spec = if read_only {
        format!("{}:{}:ro", volume, VOLUME_ROOT)
    } else {
        format!("{}:{}", volume, VOLUME_ROOT)
    };
    shell_quote(&spec)
}

/// Run `script` against a read-only mount of `volume`.
pub fn read_volume(volume: &str, script: &str) -> String {
    format!(
        "docker run --rm -v {} {} sh -c {}",
        volume_arg(volume, true),
        HELPER_IMAGE,
        shell_quote(script)
    )
}

/// Like [`read_volume`] but prints nothing instead of implicitly creating a missing volume.
pub fn read_volume_if_exists(volume: &str, script: &str) -> String {
    format!(
        "if docker volume inspect {} >/dev/null 2>&1; then {}; fi",
        shell_quote(volume),
        read_volume(volume, script)
    )
}

/// Producer side of a volume pipe. Fails, rather than creating it, when `volume` is missing.
pub fn stream_from_volume(volume: &str, script: &str) -> String {
    format!(
        "{{ docker volume inspect {} >/dev/null 2>&1 && {}; }}",
        shell_quote(volume),
        read_volume(volume, script)
    )
}

/// Unpack a tar stream from stdin into `volume`.
pub fn extract_into_volume(volume: &str, gzip: bool) -> String {
    format!(
        "docker run --rm -i -v {} {} tar {} - -C {}",
        volume_arg(volume, false),
        HELPER_IMAGE,
        if gzip { "xzf" } else { "xf" },
        VOLUME_ROOT
    )
}

pub fn volume_exists(volume: &str) -> String {
    format!("docker volume inspect {} >/dev/null 2>&1 && echo yes || echo no", shell_quote(volume))
}

pub fn create_volume(volume: &str, labels: &[(String, String)]) -> String {
    let mut command = String::from("docker volume create");
    for (key, value) in labels {
        command.push_str(" --label ");
        command.push_str(&shell_quote(&format!("{}={}", key, value)));
    }
    command.push(' ');
    command.push_str(&shell_quote(volume));
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_mounts() {
        let cmd = read_volume("app_data", "du -sb /volume_data");
        assert_eq!(
            cmd,
            "docker run --rm -v 'app_data:/volume_data:ro' alpine sh -c 'du -sb /volume_data'"
        );
        assert!(read_volume_if_exists("app_data", "true").starts_with("if docker volume inspect 'app_data'"));
        assert!(stream_from_volume("app_data", "tar czf - .").starts_with("{ docker volume inspect 'app_data' >/dev/null 2>&1 && docker run --rm -v 'app_data:/volume_data:ro'"));
    }

    #[test]
    fn extracts_with_writable_mount() {
        assert_eq!(
            extract_into_volume("app_data", true),
            "docker run --rm -i -v 'app_data:/volume_data' alpine tar xzf - -C /volume_data"
        );
    }

    #[test]
    fn creates_labelled_volume() {
        let labels = vec![("com.docker.compose.project".to_string(), "shop".to_string())];
        assert_eq!(
            create_volume("shop_db", &labels),
            "docker volume create --label 'com.docker.compose.project=shop' 'shop_db'"
        );
    }
}

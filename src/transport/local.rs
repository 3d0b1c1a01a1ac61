use crate::transport::CommandOutput;
use crate::{Result, ShiftError};
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs command lines on this host through a shell.
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: String,
    args: Vec<String>,
}

impl Default for LocalShell {
    /// `bash -o pipefail` so a failing producer fails the whole pipeline.
    fn default() -> Self {
        Self {
            program: "bash".into(),
            args: vec!["-o".into(), "pipefail".into(), "-c".into()],
        }
    }
}

impl LocalShell {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    pub fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!("exec (local): {}", command);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .map_err(ShiftError::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ShiftError::CommandFailed {
                command: command.to_string(),
                code: output.status.code(),
                stdout,
                stderr,
                server_id: None,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_exit_code() {
        let shell = LocalShell::new("sh", vec!["-c".into()]);
        let out = shell.run("echo hello; echo oops >&2").unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");

        match shell.run("echo partial; exit 3") {
            Err(ShiftError::CommandFailed { code, stdout, server_id, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout.trim(), "partial");
                assert!(server_id.is_none());
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }
}

//! Spawning of user commands.
//!
//! Event commands are fire-and-forget: the child is not supervised and
//! its exit status is never consulted. Only user-variable commands have
//! their stdout captured.

use std::process::{Command, Stdio};
use tracing::{debug, warn};

#[cfg(not(windows))]
fn shell(command_line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

#[cfg(windows)]
fn shell(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}

/// Spawn a command asynchronously. Output is not captured. A failure to
/// spawn is logged but never aborts the caller.
pub fn run_detached(command_line: &str) {
    debug!(command = command_line, "spawning event command");

    let spawned = shell(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    if let Err(e) = spawned {
        warn!("failed to spawn command \"{command_line}\": {e}");
    }
}

/// Run a command to completion and capture its stdout, trimmed of the
/// trailing newline.
pub fn run_capture(command_line: &str) -> std::io::Result<String> {
    let output = shell(command_line).stdin(Stdio::null()).output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_capture_stdout() {
        let out = run_capture("echo hello").unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_run_capture_trims_trailing_newline_only() {
        let out = run_capture("printf 'a\\nb\\n'").unwrap();
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn test_run_detached_bad_command_does_not_panic() {
        // The shell itself spawns; the failure happens in the child.
        run_detached("definitely-not-a-command-anywhere");
    }
}

//! Small helpers for the platform layer: session detection and running the
//! command-line tools the Linux and macOS backends shell out to.

use std::io::Write;
use std::process::{Command, Stdio};

/// Check if running on Wayland
#[cfg(target_os = "linux")]
pub fn is_wayland() -> bool {
    std::env::var("WAYLAND_DISPLAY").is_ok()
        || std::env::var("XDG_SESSION_TYPE")
            .map(|v| v.to_lowercase() == "wayland")
            .unwrap_or(false)
}

/// Whether `tool` resolves on `PATH`.
pub fn command_available(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Runs a tool and returns its raw stdout. A non-zero exit is an error carrying stderr.
pub fn run_capture(program: &str, args: &[&str]) -> Result<Vec<u8>, String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} failed: {}", program, stderr.trim()));
    }

    Ok(output.stdout)
}

/// Runs a tool, feeding `input` on stdin.
///
/// stdout/stderr go to null: `xclip` and `wl-copy` fork a background owner that
/// would otherwise keep captured pipes open forever.
pub fn run_with_input(program: &str, args: &[&str], input: &[u8]) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| format!("{} has no stdin", program))?;
        stdin
            .write_all(input)
            .map_err(|e| format!("Failed to write to {}: {}", program, e))?;
    }

    let status = child
        .wait()
        .map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
    if !status.success() {
        return Err(format!("{} exited with {}", program, status));
    }

    Ok(())
}

/// Runs a shell snippet, for tools that read commands on stdin (`dotool`).
#[cfg(target_os = "linux")]
pub fn run_shell(snippet: &str) -> Result<(), String> {
    run_capture("sh", &["-c", snippet]).map(|_| ())
}

//! Synthetic copy keystroke.

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use std::sync::Mutex;

#[cfg(target_os = "linux")]
use log::info;
#[cfg(target_os = "linux")]
use crate::utils::{command_available, is_wayland, run_capture, run_shell};

pub trait CopyShortcut: Send + Sync {
    fn send_copy(&self) -> Result<(), String>;
}

/// Sends the platform copy chord. On Linux native tools are tried first since
/// enigo cannot inject input under most Wayland compositors.
#[derive(Default)]
pub struct SystemCopyShortcut {
    enigo: Mutex<Option<Enigo>>,
}

impl SystemCopyShortcut {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_with_enigo(&self) -> Result<(), String> {
        let mut slot = self
            .enigo
            .lock()
            .map_err(|e| format!("Failed to lock Enigo: {}", e))?;
        if slot.is_none() {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| format!("Failed to initialize Enigo: {}", e))?;
            *slot = Some(enigo);
        }
        let enigo = slot
            .as_mut()
            .ok_or_else(|| "Enigo unavailable".to_string())?;
        send_copy_chord(enigo)
    }
}

impl CopyShortcut for SystemCopyShortcut {
    fn send_copy(&self) -> Result<(), String> {
        #[cfg(target_os = "linux")]
        if try_send_copy_linux()? {
            return Ok(());
        }

        self.send_with_enigo()
    }
}

/// Cmd+C on macOS, Ctrl+C elsewhere.
fn send_copy_chord(enigo: &mut Enigo) -> Result<(), String> {
    #[cfg(target_os = "macos")]
    let modifier = Key::Meta;
    #[cfg(not(target_os = "macos"))]
    let modifier = Key::Control;

    enigo
        .key(modifier, Direction::Press)
        .map_err(|e| format!("Failed to press modifier: {}", e))?;
    let result = enigo
        .key(Key::Unicode('c'), Direction::Click)
        .map_err(|e| format!("Failed to click C: {}", e));
    enigo
        .key(modifier, Direction::Release)
        .map_err(|e| format!("Failed to release modifier: {}", e))?;
    result
}

/// Returns `Ok(true)` if a native tool sent the chord, `Ok(false)` to fall back to enigo.
#[cfg(target_os = "linux")]
fn try_send_copy_linux() -> Result<bool, String> {
    if is_wayland() {
        if command_available("wtype") {
            info!("Using wtype for copy");
            run_capture("wtype", &["-M", "ctrl", "-k", "c", "-m", "ctrl"])?;
            return Ok(true);
        }
        if command_available("dotool") {
            info!("Using dotool for copy");
            run_shell("echo key ctrl+c | dotool")?;
            return Ok(true);
        }
        if command_available("ydotool") {
            info!("Using ydotool for copy");
            send_copy_via_ydotool()?;
            return Ok(true);
        }
    } else {
        if command_available("xdotool") {
            info!("Using xdotool for copy");
            run_capture("xdotool", &["key", "--clearmodifiers", "ctrl+c"])?;
            return Ok(true);
        }
        if command_available("ydotool") {
            info!("Using ydotool for copy");
            send_copy_via_ydotool()?;
            return Ok(true);
        }
    }

    Ok(false)
}

/// ydotool takes Linux input keycodes as `<code>:<pressed>`; ctrl=29, c=46.
#[cfg(target_os = "linux")]
fn send_copy_via_ydotool() -> Result<(), String> {
    run_capture("ydotool", &["key", "29:1", "46:1", "46:0", "29:0"]).map(|_| ())
}

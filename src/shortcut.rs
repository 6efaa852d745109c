//! Global hotkey via a low-level `rdev` keyboard hook.
//!
//! The hook runs on its own thread. Each press of the configured binding sends one
//! trigger through a channel; holding the keys down (auto-repeat) does not fire
//! again until the binding is released. The currently held modifiers are
//! published too, so a synthetic keystroke can wait until the user lets go.

use log::{debug, error, info};
use rdev::{EventType, Key};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Capacity of the trigger channel. Presses beyond it are dropped while the
/// consumer is busy.
const TRIGGER_CAPACITY: usize = 8;

/// Held modifiers (Ctrl, Shift, Alt, Win/Cmd)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub win: bool,
}

impl ModifierState {
    pub fn update(&mut self, key: Key, pressed: bool) {
        match key {
            Key::ControlLeft | Key::ControlRight => self.ctrl = pressed,
            Key::ShiftLeft | Key::ShiftRight => self.shift = pressed,
            Key::Alt | Key::AltGr => self.alt = pressed,
            Key::MetaLeft | Key::MetaRight => self.win = pressed,
            _ => {}
        }
    }

    pub fn any(&self) -> bool {
        self.ctrl || self.shift || self.alt || self.win
    }
}

fn is_modifier_key(key: Key) -> bool {
    matches!(
        key,
        Key::ControlLeft
            | Key::ControlRight
            | Key::ShiftLeft
            | Key::ShiftRight
            | Key::Alt
            | Key::AltGr
            | Key::MetaLeft
            | Key::MetaRight
    )
}

/// A parsed binding. `key` is `None` for modifier-only bindings like `ctrl+alt`.
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyBinding {
    pub key: Option<Key>,
    pub modifiers: ModifierState,
    pub original: String,
}

/// Parses `"ctrl+alt+t"`, `"cmd+shift+space"`, `"f9"` and similar.
pub fn parse_binding(binding: &str) -> Result<HotkeyBinding, String> {
    let normalized = binding.trim().to_lowercase();
    let mut modifiers = ModifierState::default();
    let mut main_key: Option<Key> = None;

    for part in normalized.split('+').map(str::trim) {
        match part {
            "ctrl" | "control" => modifiers.ctrl = true,
            "shift" => modifiers.shift = true,
            "alt" | "option" => modifiers.alt = true,
            "win" | "super" | "meta" | "cmd" | "command" => modifiers.win = true,
            "" => return Err(format!("Empty key in shortcut '{}'", binding)),
            key_str => {
                if main_key.is_some() {
                    return Err(format!(
                        "Multiple main keys in shortcut: already have a key, found '{}'",
                        key_str
                    ));
                }
                main_key = Some(key_from_name(key_str)?);
            }
        }
    }

    if main_key.is_none() && !modifiers.any() {
        return Err("Shortcut must have at least one key or modifier".to_string());
    }

    Ok(HotkeyBinding {
        key: main_key,
        modifiers,
        original: binding.trim().to_string(),
    })
}

const LETTER_KEYS: [Key; 26] = [
    Key::KeyA, Key::KeyB, Key::KeyC, Key::KeyD, Key::KeyE, Key::KeyF, Key::KeyG,
    Key::KeyH, Key::KeyI, Key::KeyJ, Key::KeyK, Key::KeyL, Key::KeyM, Key::KeyN,
    Key::KeyO, Key::KeyP, Key::KeyQ, Key::KeyR, Key::KeyS, Key::KeyT, Key::KeyU,
    Key::KeyV, Key::KeyW, Key::KeyX, Key::KeyY, Key::KeyZ,
];

const DIGIT_KEYS: [Key; 10] = [
    Key::Num0, Key::Num1, Key::Num2, Key::Num3, Key::Num4,
    Key::Num5, Key::Num6, Key::Num7, Key::Num8, Key::Num9,
];

const FUNCTION_KEYS: [Key; 12] = [
    Key::F1, Key::F2, Key::F3, Key::F4, Key::F5, Key::F6,
    Key::F7, Key::F8, Key::F9, Key::F10, Key::F11, Key::F12,
];

fn key_from_name(name: &str) -> Result<Key, String> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_lowercase() {
            return Ok(LETTER_KEYS[(c as u8 - b'a') as usize]);
        }
        if c.is_ascii_digit() {
            return Ok(DIGIT_KEYS[(c as u8 - b'0') as usize]);
        }
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        if (1..=FUNCTION_KEYS.len()).contains(&n) {
            return Ok(FUNCTION_KEYS[n - 1]);
        }
    }

    match name {
        "space" => Ok(Key::Space),
        "enter" | "return" => Ok(Key::Return),
        "tab" => Ok(Key::Tab),
        "escape" | "esc" => Ok(Key::Escape),
        "backspace" => Ok(Key::Backspace),
        "delete" | "del" => Ok(Key::Delete),
        "insert" | "ins" => Ok(Key::Insert),
        "home" => Ok(Key::Home),
        "end" => Ok(Key::End),
        "pageup" | "pgup" => Ok(Key::PageUp),
        "pagedown" | "pgdn" => Ok(Key::PageDown),
        "up" => Ok(Key::UpArrow),
        "down" => Ok(Key::DownArrow),
        "left" => Ok(Key::LeftArrow),
        "right" => Ok(Key::RightArrow),
        "capslock" | "caps lock" => Ok(Key::CapsLock),
        "`" | "backquote" => Ok(Key::BackQuote),
        "-" | "minus" => Ok(Key::Minus),
        "=" | "equal" => Ok(Key::Equal),
        "[" => Ok(Key::LeftBracket),
        "]" => Ok(Key::RightBracket),
        "\\" | "backslash" => Ok(Key::BackSlash),
        ";" | "semicolon" => Ok(Key::SemiColon),
        "'" | "quote" => Ok(Key::Quote),
        "," | "comma" => Ok(Key::Comma),
        "." | "period" => Ok(Key::Dot),
        "/" | "slash" => Ok(Key::Slash),
        _ => Err(format!("Unknown key: '{}'", name)),
    }
}

/// Tracks keyboard state and decides when the binding fires.
#[derive(Debug)]
pub struct HotkeyMatcher {
    binding: HotkeyBinding,
    modifiers: ModifierState,
    active: bool,
}

impl HotkeyMatcher {
    pub fn new(binding: HotkeyBinding) -> Self {
        Self {
            binding,
            modifiers: ModifierState::default(),
            active: false,
        }
    }

    /// Modifiers physically held right now.
    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    /// Feeds one event; returns true when this press triggers the binding.
    pub fn on_event(&mut self, event: &EventType) -> bool {
        match *event {
            EventType::KeyPress(key) => {
                self.modifiers.update(key, true);
                let matches = self.modifiers == self.binding.modifiers
                    && match self.binding.key {
                        Some(main) => main == key,
                        None => is_modifier_key(key),
                    };
                if matches && !self.active {
                    self.active = true;
                    return true;
                }
                false
            }
            EventType::KeyRelease(key) => {
                self.modifiers.update(key, false);
                let main_released = self.binding.key == Some(key);
                if main_released || self.modifiers != self.binding.modifiers {
                    self.active = false;
                }
                false
            }
            _ => false,
        }
    }
}

/// Runs the keyboard hook and yields one `()` per hotkey press.
pub struct HotkeyListener {
    triggers: mpsc::Receiver<()>,
    held: watch::Receiver<ModifierState>,
}

impl HotkeyListener {
    /// Starts the hook thread. The thread lives until the process exits; dropping
    /// the listener only stops deliveries.
    pub fn start(binding: HotkeyBinding) -> Self {
        let (tx, triggers) = mpsc::channel(TRIGGER_CAPACITY);
        let (held_tx, held) = watch::channel(ModifierState::default());
        info!("Listening for hotkey '{}'", binding.original);

        std::thread::spawn(move || {
            let mut matcher = HotkeyMatcher::new(binding);
            // Must not block: the OS drops the hook if the callback stalls.
            if let Err(e) = rdev::listen(move |event| {
                let fired = matcher.on_event(&event.event_type);
                let modifiers = matcher.modifiers();
                held_tx.send_if_modified(|current| {
                    let changed = *current != modifiers;
                    *current = modifiers;
                    changed
                });
                if fired {
                    debug!("Hotkey pressed");
                    if tx.try_send(()).is_err() {
                        debug!("Trigger dropped, consumer busy or gone");
                    }
                }
            }) {
                error!("Failed to start key listener: {:?}", e);
            }
        });

        Self { triggers, held }
    }

    /// Next hotkey press, `None` once the hook thread has exited.
    pub async fn next_trigger(&mut self) -> Option<()> {
        self.triggers.recv().await
    }

    /// Waits until no modifier is held, up to `timeout`. A synthetic copy sent
    /// while the hotkey's modifiers are still down arrives as a different chord.
    pub async fn modifiers_released(&mut self, timeout: Duration) -> bool {
        let released = tokio::time::timeout(timeout, self.held.wait_for(|held| !held.any())).await;
        matches!(released, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_binding() {
        let binding = parse_binding("Ctrl+Alt+T").unwrap();
        assert_eq!(binding.key, Some(Key::KeyT));
        assert!(binding.modifiers.ctrl && binding.modifiers.alt);
        assert!(!binding.modifiers.shift && !binding.modifiers.win);
        assert_eq!(binding.original, "Ctrl+Alt+T");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_binding("cmd+shift+space").unwrap().key, Some(Key::Space));
        assert_eq!(parse_binding("f9").unwrap().key, Some(Key::F9));
        assert_eq!(parse_binding("alt+7").unwrap().key, Some(Key::Num7));
        let modifier_only = parse_binding("ctrl+alt").unwrap();
        assert_eq!(modifier_only.key, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_binding("").is_err());
        assert!(parse_binding("ctrl+a+b").is_err());
        assert!(parse_binding("ctrl+hyper").is_err());
        assert!(parse_binding("ctrl++").is_err());
        assert!(parse_binding("f13").is_err());
    }

    #[test]
    fn test_matcher_fires_once_per_press() {
        let mut matcher = HotkeyMatcher::new(parse_binding("ctrl+alt+t").unwrap());
        assert!(!matcher.on_event(&EventType::KeyPress(Key::ControlLeft)));
        assert!(!matcher.on_event(&EventType::KeyPress(Key::Alt)));
        assert!(matcher.on_event(&EventType::KeyPress(Key::KeyT)));
        // Auto-repeat
        assert!(!matcher.on_event(&EventType::KeyPress(Key::KeyT)));
        assert!(!matcher.on_event(&EventType::KeyRelease(Key::KeyT)));
        assert!(matcher.on_event(&EventType::KeyPress(Key::KeyT)));
    }

    #[test]
    fn test_matcher_requires_exact_modifiers() {
        let mut matcher = HotkeyMatcher::new(parse_binding("ctrl+t").unwrap());
        assert!(!matcher.on_event(&EventType::KeyPress(Key::KeyT)));
        matcher.on_event(&EventType::KeyPress(Key::ControlLeft));
        matcher.on_event(&EventType::KeyPress(Key::ShiftLeft));
        assert!(!matcher.on_event(&EventType::KeyPress(Key::KeyT)));
        matcher.on_event(&EventType::KeyRelease(Key::ShiftLeft));
        assert!(matcher.on_event(&EventType::KeyPress(Key::KeyT)));
    }

    #[test]
    fn test_matcher_tracks_held_modifiers() {
        let mut matcher = HotkeyMatcher::new(parse_binding("ctrl+alt").unwrap());
        matcher.on_event(&EventType::KeyPress(Key::ControlLeft));
        assert!(matcher.on_event(&EventType::KeyPress(Key::Alt)));
        assert!(matcher.modifiers().any());
        matcher.on_event(&EventType::KeyRelease(Key::Alt));
        matcher.on_event(&EventType::KeyRelease(Key::ControlLeft));
        assert_eq!(matcher.modifiers(), ModifierState::default());
    }

    fn listener_with(held: ModifierState) -> (HotkeyListener, watch::Sender<ModifierState>) {
        let (_tx, triggers) = mpsc::channel(1);
        let (held_tx, held_rx) = watch::channel(held);
        (
            HotkeyListener {
                triggers,
                held: held_rx,
            },
            held_tx,
        )
    }

    #[tokio::test]
    async fn test_waits_for_modifier_release() {
        let held = ModifierState {
            ctrl: true,
            alt: true,
            ..Default::default()
        };
        let (mut listener, held_tx) = listener_with(held);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            held_tx.send_replace(ModifierState::default());
            // Keep the sender alive until the waiter has observed the release.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        assert!(listener.modifiers_released(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_modifier_wait_times_out_while_held() {
        let held = ModifierState {
            ctrl: true,
            ..Default::default()
        };
        let (mut listener, _held_tx) = listener_with(held);
        assert!(!listener.modifiers_released(Duration::from_millis(30)).await);

        let (mut idle, _held_tx) = listener_with(ModifierState::default());
        assert!(idle.modifiers_released(Duration::from_millis(30)).await);
    }

    #[test]
    fn test_modifier_only_binding() {
        let mut matcher = HotkeyMatcher::new(parse_binding("ctrl+alt").unwrap());
        assert!(!matcher.on_event(&EventType::KeyPress(Key::ControlLeft)));
        assert!(matcher.on_event(&EventType::KeyPress(Key::Alt)));
        assert!(!matcher.on_event(&EventType::KeyPress(Key::Alt)));
        matcher.on_event(&EventType::KeyRelease(Key::Alt));
        assert!(matcher.on_event(&EventType::KeyPress(Key::Alt)));
    }
}

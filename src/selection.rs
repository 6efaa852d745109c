//! Acquiring the text selected in the focused application.
//!
//! The structured path asks the platform for the selection directly. When that
//! yields nothing, the clipboard path snapshots the clipboard, sends a copy
//! keystroke, waits for the target app to respond and reads the result. The
//! snapshot is restored afterwards.
//!
//! Other clipboard writers during the settle window are not coordinated with; the
//! change counter (or a text comparison where the platform has no counter) is the
//! only race detector.

use crate::clipboard::{ClipboardBackend, ClipboardGuard};
use crate::errors::TranslationError;
use crate::input::CopyShortcut;
use log::{debug, info, warn};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Structured,
    Clipboard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedText {
    pub value: String,
    pub source: CaptureSource,
}

/// Permission required before reading other applications' UI.
pub trait AccessibilityGate: Send + Sync {
    fn is_trusted(&self) -> bool;
    /// Shows the system permission prompt.
    fn request_access(&self);
}

/// Structured access to the focused element's selection.
pub trait FocusedElementReader: Send + Sync {
    fn selected_text(&self) -> Option<String>;
    /// Full value plus the selected range, in characters.
    fn value_and_selection(&self) -> Option<(String, Range<usize>)>;
}

/// Slices `range` (in characters) out of `value`, `None` when out of range.
fn slice_chars(value: &str, range: &Range<usize>) -> Option<String> {
    if range.start > range.end || range.end > value.chars().count() {
        return None;
    }
    Some(
        value
            .chars()
            .skip(range.start)
            .take(range.end - range.start)
            .collect(),
    )
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

pub struct TextAcquisition {
    gate: Arc<dyn AccessibilityGate>,
    reader: Arc<dyn FocusedElementReader>,
    clipboard: Arc<dyn ClipboardBackend>,
    copy: Arc<dyn CopyShortcut>,
    settle_delay: Duration,
    prompted: AtomicBool,
}

impl TextAcquisition {
    pub fn new(
        gate: Arc<dyn AccessibilityGate>,
        reader: Arc<dyn FocusedElementReader>,
        clipboard: Arc<dyn ClipboardBackend>,
        copy: Arc<dyn CopyShortcut>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            gate,
            reader,
            clipboard,
            copy,
            settle_delay,
            prompted: AtomicBool::new(false),
        }
    }

    /// Returns the current selection, `Ok(None)` when nothing is selected.
    ///
    /// Fails only with [`TranslationError::NotAuthorized`]. The permission prompt
    /// is shown at most once per instance; callers must not retry on their own.
    pub async fn capture(&self) -> Result<Option<CapturedText>, TranslationError> {
        if !self.gate.is_trusted() {
            if !self.prompted.swap(true, Ordering::SeqCst) {
                info!("Accessibility permission missing, requesting access");
                self.gate.request_access();
            }
            return Err(TranslationError::NotAuthorized);
        }

        let reader = self.reader.clone();
        if let Some(value) = run_blocking(move || read_structured(reader.as_ref()))
            .await
            .flatten()
        {
            return Ok(Some(CapturedText {
                value,
                source: CaptureSource::Structured,
            }));
        }

        Ok(self.capture_via_clipboard().await)
    }

    async fn capture_via_clipboard(&self) -> Option<CapturedText> {
        let guard = ClipboardGuard::new(self.clipboard.clone());
        let snapshot = {
            let guard = guard.clone();
            let copy = self.copy.clone();
            run_blocking(move || {
                let snapshot = guard.snapshot();
                if let Err(e) = copy.send_copy() {
                    warn!("Failed to send copy keystroke: {}", e);
                }
                snapshot
            })
            .await?
        };
        tokio::time::sleep(self.settle_delay).await;

        let clipboard = self.clipboard.clone();
        let (change_count, text) =
            run_blocking(move || (clipboard.change_count(), clipboard.read_text())).await?;
        let changed = change_count != snapshot.change_count || text != snapshot.text;
        if !changed {
            debug!("Clipboard unchanged after copy, no selection");
            return None;
        }

        run_blocking(move || guard.restore(snapshot)).await;

        let value = non_blank(text)?;
        info!("Selection captured via clipboard ({} chars)", value.chars().count());
        Some(CapturedText {
            value,
            source: CaptureSource::Clipboard,
        })
    }
}

fn read_structured(reader: &dyn FocusedElementReader) -> Option<String> {
    if let Some(value) = non_blank(reader.selected_text()) {
        debug!("Selection read from focused element");
        return Some(value);
    }

    let (value, range) = reader.value_and_selection()?;
    let value = non_blank(slice_chars(&value, &range))?;
    debug!("Selection sliced from focused element value");
    Some(value)
}

/// Platform readers and clipboard tools block on IPC or subprocesses.
async fn run_blocking<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Selection task failed: {}", e);
            None
        }
    }
}

/// Converts a UTF-16 `location`/`length` pair into a character range over
/// `value`. Offsets that split a surrogate pair or run past the end are rejected.
pub fn utf16_to_char_range(value: &str, location: isize, length: isize) -> Option<Range<usize>> {
    let start = usize::try_from(location).ok()?;
    let end = start.checked_add(usize::try_from(length).ok()?)?;

    let mut units = 0usize;
    let mut char_start = None;
    let mut char_end = None;
    for (index, c) in value.chars().chain(std::iter::once('\0')).enumerate() {
        if units == start {
            char_start = Some(index);
        }
        if units == end {
            char_end = Some(index);
            break;
        }
        if units > end {
            break;
        }
        units += c.len_utf16();
    }

    Some(char_start?..char_end?)
}

/// Gate for platforms without a permission model.
pub struct AlwaysTrusted;

impl AccessibilityGate for AlwaysTrusted {
    fn is_trusted(&self) -> bool {
        true
    }

    fn request_access(&self) {}
}

/// Reader for platforms where only the clipboard path is available.
pub struct NoFocusedElement;

impl FocusedElementReader for NoFocusedElement {
    fn selected_text(&self) -> Option<String> {
        None
    }

    fn value_and_selection(&self) -> Option<(String, Range<usize>)> {
        None
    }
}

#[cfg(target_os = "macos")]
mod macos_access {
    use super::utf16_to_char_range;
    use core_foundation::base::{CFType, CFTypeID, CFTypeRef, TCFType};
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
    use core_foundation::string::{CFString, CFStringRef};
    use log::debug;
    use std::ffi::c_void;
    use std::ops::Range;

    type AXUIElementRef = CFTypeRef;
    type AXError = i32;

    const AX_ERROR_SUCCESS: AXError = 0;
    const AX_VALUE_TYPE_CF_RANGE: u32 = 4;

    #[repr(C)]
    #[derive(Default)]
    struct CFRange {
        location: isize,
        length: isize,
    }

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn AXIsProcessTrusted() -> bool;
        fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
        fn AXUIElementCreateSystemWide() -> AXUIElementRef;
        fn AXUIElementCopyAttributeValue(
            element: AXUIElementRef,
            attribute: CFStringRef,
            value: *mut CFTypeRef,
        ) -> AXError;
        fn AXValueGetTypeID() -> CFTypeID;
        fn AXValueGetType(value: CFTypeRef) -> u32;
        fn AXValueGetValue(value: CFTypeRef, value_type: u32, value_ptr: *mut c_void) -> bool;
    }

    pub fn is_trusted() -> bool {
        unsafe { AXIsProcessTrusted() }
    }

    pub fn prompt() -> bool {
        let key = CFString::new("AXTrustedCheckOptionPrompt");
        let options = CFDictionary::from_CFType_pairs(&[(
            key.as_CFType(),
            CFBoolean::true_value().as_CFType(),
        )]);
        unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
    }

    /// Copied attribute values follow the create rule; the wrapper releases them.
    fn copy_attribute(element: &CFType, name: &'static str) -> Option<CFType> {
        let attribute = CFString::from_static_string(name);
        let mut value: CFTypeRef = std::ptr::null();
        let err = unsafe {
            AXUIElementCopyAttributeValue(
                element.as_CFTypeRef(),
                attribute.as_concrete_TypeRef(),
                &mut value,
            )
        };
        if err != AX_ERROR_SUCCESS || value.is_null() {
            debug!("{} unavailable (AXError {})", name, err);
            return None;
        }
        Some(unsafe { CFType::wrap_under_create_rule(value) })
    }

    fn copy_string(element: &CFType, name: &'static str) -> Option<String> {
        copy_attribute(element, name)?
            .downcast::<CFString>()
            .map(|s| s.to_string())
    }

    fn focused_element() -> Option<CFType> {
        let system = unsafe { CFType::wrap_under_create_rule(AXUIElementCreateSystemWide()) };
        copy_attribute(&system, "AXFocusedUIElement")
    }

    fn selected_range(element: &CFType) -> Option<CFRange> {
        let value = copy_attribute(element, "AXSelectedTextRange")?;
        let raw = value.as_CFTypeRef();
        unsafe {
            if value.type_of() != AXValueGetTypeID()
                || AXValueGetType(raw) != AX_VALUE_TYPE_CF_RANGE
            {
                return None;
            }
            let mut range = CFRange::default();
            AXValueGetValue(
                raw,
                AX_VALUE_TYPE_CF_RANGE,
                &mut range as *mut CFRange as *mut c_void,
            )
            .then_some(range)
        }
    }

    /// Reads the focused element through the Accessibility API.
    pub struct AxSelectionReader;

    impl super::FocusedElementReader for AxSelectionReader {
        fn selected_text(&self) -> Option<String> {
            copy_string(&focused_element()?, "AXSelectedText")
        }

        fn value_and_selection(&self) -> Option<(String, Range<usize>)> {
            let element = focused_element()?;
            let range = selected_range(&element)?;
            let value = copy_string(&element, "AXValue")?;
            // AX ranges count UTF-16 units.
            let chars = utf16_to_char_range(&value, range.location, range.length)?;
            Some((value, chars))
        }
    }
}

#[cfg(target_os = "macos")]
pub use macos_access::AxSelectionReader;

/// Accessibility trust as reported by the OS.
pub struct SystemAccessibilityGate;

impl AccessibilityGate for SystemAccessibilityGate {
    #[cfg(target_os = "macos")]
    fn is_trusted(&self) -> bool {
        macos_access::is_trusted()
    }

    #[cfg(not(target_os = "macos"))]
    fn is_trusted(&self) -> bool {
        true
    }

    #[cfg(target_os = "macos")]
    fn request_access(&self) {
        let trusted = macos_access::prompt();
        debug!("Accessibility prompt shown (trusted: {})", trusted);
    }

    #[cfg(not(target_os = "macos"))]
    fn request_access(&self) {}
}

/// Linux exposes the current selection as the PRIMARY selection.
#[cfg(target_os = "linux")]
pub struct PrimarySelectionReader;

#[cfg(target_os = "linux")]
impl FocusedElementReader for PrimarySelectionReader {
    fn selected_text(&self) -> Option<String> {
        use crate::utils::{is_wayland, run_capture};

        let raw = if is_wayland() {
            run_capture("wl-paste", &["--primary", "--no-newline"])
        } else {
            run_capture("xclip", &["-selection", "primary", "-o"])
        };
        match raw {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                debug!("Primary selection unavailable: {}", e);
                None
            }
        }
    }

    fn value_and_selection(&self) -> Option<(String, Range<usize>)> {
        None
    }
}

/// The structured reader for the current platform.
pub fn system_reader() -> Arc<dyn FocusedElementReader> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(PrimarySelectionReader)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(AxSelectionReader)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Arc::new(NoFocusedElement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{ClipboardItem, ClipboardRepresentation, MemoryClipboard, PLAIN_TEXT_KIND};
    use std::sync::atomic::AtomicUsize;

    struct FakeGate {
        trusted: bool,
        prompts: AtomicUsize,
    }

    impl FakeGate {
        fn new(trusted: bool) -> Self {
            Self {
                trusted,
                prompts: AtomicUsize::new(0),
            }
        }
    }

    impl AccessibilityGate for FakeGate {
        fn is_trusted(&self) -> bool {
            self.trusted
        }
        fn request_access(&self) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeReader {
        selected: Option<String>,
        value: Option<(String, Range<usize>)>,
    }

    impl FocusedElementReader for FakeReader {
        fn selected_text(&self) -> Option<String> {
            self.selected.clone()
        }
        fn value_and_selection(&self) -> Option<(String, Range<usize>)> {
            self.value.clone()
        }
    }

    /// Simulates the focused app answering Ctrl+C by putting `selection` on the clipboard.
    struct FakeCopy {
        clipboard: Arc<MemoryClipboard>,
        selection: Option<String>,
        presses: AtomicUsize,
        thread: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl CopyShortcut for FakeCopy {
        fn send_copy(&self) -> Result<(), String> {
            self.presses.fetch_add(1, Ordering::SeqCst);
            *self.thread.lock().unwrap() = Some(std::thread::current().id());
            match &self.selection {
                Some(text) => self.clipboard.write_text(text),
                None => Ok(()),
            }
        }
    }

    fn previous_contents() -> Vec<ClipboardItem> {
        vec![ClipboardItem {
            representations: vec![
                ClipboardRepresentation::new(PLAIN_TEXT_KIND, "previous"),
                ClipboardRepresentation::new("image/png", vec![1, 2, 3, 255]),
            ],
        }]
    }

    fn acquisition(
        gate: Arc<FakeGate>,
        reader: FakeReader,
        clipboard: Arc<MemoryClipboard>,
        selection: Option<&str>,
    ) -> (TextAcquisition, Arc<FakeCopy>) {
        let copy = Arc::new(FakeCopy {
            clipboard: clipboard.clone(),
            selection: selection.map(str::to_string),
            presses: AtomicUsize::new(0),
            thread: std::sync::Mutex::new(None),
        });
        let acquisition = TextAcquisition::new(
            gate,
            Arc::new(reader),
            clipboard,
            copy.clone(),
            Duration::from_millis(1),
        );
        (acquisition, copy)
    }

    #[test]
    fn test_slice_chars() {
        assert_eq!(slice_chars("héllo wörld", &(6..11)).as_deref(), Some("wörld"));
        assert_eq!(slice_chars("abc", &(1..1)).as_deref(), Some(""));
        assert_eq!(slice_chars("abc", &(2..5)), None);
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 2..1;
        assert_eq!(slice_chars("abc", &reversed), None);
    }

    #[test]
    fn test_utf16_range_to_chars() {
        // "a😀b": the emoji occupies two UTF-16 units and one char.
        assert_eq!(utf16_to_char_range("a😀b", 1, 2), Some(1..2));
        assert_eq!(utf16_to_char_range("a😀b", 3, 1), Some(2..3));
        assert_eq!(utf16_to_char_range("a😀b", 0, 4), Some(0..3));
        assert_eq!(utf16_to_char_range("我喜欢猫", 3, 1), Some(3..4));
        assert_eq!(utf16_to_char_range("abc", 3, 0), Some(3..3));
    }

    #[test]
    fn test_utf16_range_rejects_unresolvable_offsets() {
        assert_eq!(utf16_to_char_range("a😀b", 2, 1), None);
        assert_eq!(utf16_to_char_range("abc", 1, 5), None);
        assert_eq!(utf16_to_char_range("abc", -1, 1), None);
        assert_eq!(utf16_to_char_range("abc", 0, -1), None);
    }

    #[tokio::test]
    async fn test_utf16_selection_sliced_from_value() {
        let value = "see 😀 here";
        let reader = FakeReader {
            selected: None,
            value: Some((value.into(), utf16_to_char_range(value, 7, 4).unwrap())),
        };
        let (acquisition, _) = acquisition(
            Arc::new(FakeGate::new(true)),
            reader,
            Arc::new(MemoryClipboard::new()),
            None,
        );

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "here");
        assert_eq!(captured.source, CaptureSource::Structured);
    }

    #[tokio::test]
    async fn test_untrusted_prompts_once() {
        let gate = Arc::new(FakeGate::new(false));
        let clipboard = Arc::new(MemoryClipboard::new());
        let (acquisition, copy) =
            acquisition(gate.clone(), FakeReader::default(), clipboard, Some("x"));

        assert_eq!(acquisition.capture().await, Err(TranslationError::NotAuthorized));
        assert_eq!(acquisition.capture().await, Err(TranslationError::NotAuthorized));
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(copy.presses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_structured_selection_wins() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let reader = FakeReader {
            selected: Some("from the app".into()),
            value: None,
        };
        let (acquisition, copy) =
            acquisition(Arc::new(FakeGate::new(true)), reader, clipboard, Some("x"));

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "from the app");
        assert_eq!(captured.source, CaptureSource::Structured);
        assert_eq!(copy.presses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_value_and_range_fallback() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let reader = FakeReader {
            selected: Some("   ".into()),
            value: Some(("我喜欢猫 cats".into(), 3..4)),
        };
        let (acquisition, _) =
            acquisition(Arc::new(FakeGate::new(true)), reader, clipboard, None);

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "猫");
        assert_eq!(captured.source, CaptureSource::Structured);
    }

    #[tokio::test]
    async fn test_clipboard_path_restores_previous_contents() {
        let clipboard = Arc::new(MemoryClipboard::with_items(previous_contents()));
        let reader = FakeReader {
            selected: None,
            value: Some(("short".into(), 0..99)),
        };
        let (acquisition, copy) = acquisition(
            Arc::new(FakeGate::new(true)),
            reader,
            clipboard.clone(),
            Some("selected words"),
        );

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "selected words");
        assert_eq!(captured.source, CaptureSource::Clipboard);
        assert_eq!(copy.presses.load(Ordering::SeqCst), 1);
        assert_eq!(clipboard.contents(), previous_contents());
    }

    #[tokio::test]
    async fn test_copy_keystroke_runs_off_the_runtime_thread() {
        let clipboard = Arc::new(MemoryClipboard::with_items(previous_contents()));
        let (acquisition, copy) = acquisition(
            Arc::new(FakeGate::new(true)),
            FakeReader::default(),
            clipboard,
            Some("selected words"),
        );

        acquisition.capture().await.unwrap().unwrap();
        let copy_thread = copy.thread.lock().unwrap().unwrap();
        assert_ne!(copy_thread, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_same_text_copy_detected_by_change_count() {
        let clipboard = Arc::new(MemoryClipboard::with_items(previous_contents()));
        let (acquisition, _) = acquisition(
            Arc::new(FakeGate::new(true)),
            FakeReader::default(),
            clipboard.clone(),
            Some("previous"),
        );

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "previous");
        assert_eq!(clipboard.contents(), previous_contents());
    }

    #[tokio::test]
    async fn test_nothing_selected_is_not_an_error() {
        let clipboard = Arc::new(MemoryClipboard::with_items(previous_contents()));
        let (acquisition, copy) = acquisition(
            Arc::new(FakeGate::new(true)),
            FakeReader::default(),
            clipboard.clone(),
            None,
        );

        let before = clipboard.change_count();
        assert_eq!(acquisition.capture().await, Ok(None));
        assert_eq!(copy.presses.load(Ordering::SeqCst), 1);
        assert_eq!(clipboard.change_count(), before);
        assert_eq!(clipboard.contents(), previous_contents());
    }

    #[tokio::test]
    async fn test_whitespace_copy_restores_and_returns_none() {
        let clipboard = Arc::new(MemoryClipboard::with_items(previous_contents()));
        let (acquisition, _) = acquisition(
            Arc::new(FakeGate::new(true)),
            FakeReader::default(),
            clipboard.clone(),
            Some(" \n "),
        );

        assert_eq!(acquisition.capture().await, Ok(None));
        assert_eq!(clipboard.contents(), previous_contents());
    }

    #[tokio::test]
    async fn test_empty_clipboard_is_left_empty() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let (acquisition, _) = acquisition(
            Arc::new(FakeGate::new(true)),
            FakeReader::default(),
            clipboard.clone(),
            Some("fresh"),
        );

        let captured = acquisition.capture().await.unwrap().unwrap();
        assert_eq!(captured.value, "fresh");
        // No prior content: the copy result stays.
        assert_eq!(clipboard.read_text().as_deref(), Some("fresh"));
    }
}

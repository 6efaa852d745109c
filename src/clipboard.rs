//! Clipboard snapshot/restore around a synthetic copy.
//!
//! [`ClipboardGuard`] records every representation of every clipboard item before
//! the copy keystroke and writes them back afterwards, so the user's clipboard is
//! left as it was. Restore failures are logged and never surfaced.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// One typed payload of a clipboard item (a MIME type, a pasteboard type or a
/// Windows format id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardRepresentation {
    pub kind: String,
    pub data: Vec<u8>,
}

impl ClipboardRepresentation {
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardItem {
    pub representations: Vec<ClipboardRepresentation>,
}

impl ClipboardItem {
    pub fn text(kind: &str, text: &str) -> Self {
        Self {
            representations: vec![ClipboardRepresentation::new(kind, text.as_bytes())],
        }
    }
}

/// State captured right before a synthetic copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub items: Vec<ClipboardItem>,
    pub text: Option<String>,
    pub change_count: u64,
}

impl ClipboardSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|i| i.representations.is_empty())
            && self.text.as_deref().map_or(true, str::is_empty)
    }
}

/// Platform clipboard access used by the guard and by text acquisition.
pub trait ClipboardBackend: Send + Sync {
    /// Monotonic change counter, or 0 where the platform exposes none.
    fn change_count(&self) -> u64;
    fn items(&self) -> Result<Vec<ClipboardItem>, String>;
    fn read_text(&self) -> Option<String>;
    /// Clears the clipboard and writes all items in one operation.
    fn write_items(&self, items: &[ClipboardItem]) -> Result<(), String>;
    fn write_text(&self, text: &str) -> Result<(), String>;
}

#[derive(Clone)]
pub struct ClipboardGuard {
    backend: Arc<dyn ClipboardBackend>,
}

impl ClipboardGuard {
    pub fn new(backend: Arc<dyn ClipboardBackend>) -> Self {
        Self { backend }
    }

    pub fn snapshot(&self) -> ClipboardSnapshot {
        let change_count = self.backend.change_count();
        let items = match self.backend.items() {
            Ok(items) => items
                .into_iter()
                .filter(|item| !item.representations.is_empty())
                .collect(),
            Err(e) => {
                warn!("Clipboard backup failed: {}. Falling back to text-only.", e);
                Vec::new()
            }
        };
        let text = self.backend.read_text();

        debug!(
            "Clipboard snapshot: {} items, {} representations, change count {}",
            items.len(),
            items
                .iter()
                .map(|i: &ClipboardItem| i.representations.len())
                .sum::<usize>(),
            change_count
        );
        ClipboardSnapshot {
            items,
            text,
            change_count,
        }
    }

    /// Writes the snapshot back. An empty snapshot performs no write at all.
    pub fn restore(&self, snapshot: ClipboardSnapshot) {
        if !snapshot.items.is_empty() {
            match self.backend.write_items(&snapshot.items) {
                Ok(()) => info!("Clipboard restored ({} items)", snapshot.items.len()),
                Err(e) => warn!(
                    "Clipboard restore failed: {}. Clipboard may contain the selection.",
                    e
                ),
            }
            return;
        }

        match snapshot.text {
            Some(text) if !text.is_empty() => {
                if let Err(e) = self.backend.write_text(&text) {
                    warn!("Failed to restore clipboard text: {}", e);
                } else {
                    info!("Clipboard text restored");
                }
            }
            _ => debug!("Clipboard was empty before capture, nothing to restore"),
        }
    }
}

pub const PLAIN_TEXT_KIND: &str = "text/plain;charset=utf-8";

/// In-process clipboard with a real change counter. Backs the tests and can stand
/// in for the system clipboard when running headless.
#[derive(Default)]
pub struct MemoryClipboard {
    state: Mutex<MemoryClipboardState>,
}

#[derive(Default)]
struct MemoryClipboardState {
    items: Vec<ClipboardItem>,
    change_count: u64,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<ClipboardItem>) -> Self {
        Self {
            state: Mutex::new(MemoryClipboardState {
                items,
                change_count: 1,
            }),
        }
    }

    pub fn contents(&self) -> Vec<ClipboardItem> {
        self.lock().items.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryClipboardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn change_count(&self) -> u64 {
        self.lock().change_count
    }

    fn items(&self) -> Result<Vec<ClipboardItem>, String> {
        Ok(self.lock().items.clone())
    }

    fn read_text(&self) -> Option<String> {
        self.lock().items.iter().find_map(|item| {
            item.representations
                .iter()
                .find(|r| r.kind.starts_with("text/plain"))
                .map(|r| String::from_utf8_lossy(&r.data).into_owned())
        })
    }

    fn write_items(&self, items: &[ClipboardItem]) -> Result<(), String> {
        let mut state = self.lock();
        state.items = items.to_vec();
        state.change_count += 1;
        Ok(())
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        self.write_items(&[ClipboardItem::text(PLAIN_TEXT_KIND, text)])
    }
}

/// The clipboard of the running desktop session.
#[derive(Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

/// Windows: enumerate and restore every HGLOBAL-backed format.
#[cfg(target_os = "windows")]
mod win_clipboard {
    use super::ClipboardRepresentation;
    use log::{debug, warn};
    use std::ptr;
    use windows::Win32::Foundation::{HANDLE, HGLOBAL};
    use windows::Win32::System::DataExchange::{
        CloseClipboard, EmptyClipboard, EnumClipboardFormats, GetClipboardData,
        GetClipboardSequenceNumber, OpenClipboard, SetClipboardData,
    };
    use windows::Win32::System::Memory::{GlobalAlloc, GlobalLock, GlobalSize, GlobalUnlock, GHND};

    const CF_UNICODETEXT: u32 = 13;

    pub fn sequence_number() -> u64 {
        unsafe { GetClipboardSequenceNumber() as u64 }
    }

    fn format_kind(format: u32) -> String {
        format!("cf:{}", format)
    }

    fn parse_kind(kind: &str) -> Option<u32> {
        kind.strip_prefix("cf:")?.parse().ok()
    }

    pub fn read_all_formats() -> Result<Vec<ClipboardRepresentation>, String> {
        let mut representations = Vec::new();

        unsafe {
            if OpenClipboard(None).is_err() {
                return Err("Failed to open clipboard for backup".into());
            }

            let mut format = EnumClipboardFormats(0);
            while format != 0 {
                if let Some(data) = read_format(format) {
                    debug!("Backed up clipboard format {}: {} bytes", format, data.len());
                    representations.push(ClipboardRepresentation::new(format_kind(format), data));
                }
                format = EnumClipboardFormats(format);
            }

            let _ = CloseClipboard();
        }

        Ok(representations)
    }

    /// Formats backed by GDI handles report a zero global size and are skipped.
    unsafe fn read_format(format: u32) -> Option<Vec<u8>> {
        let handle = GetClipboardData(format).ok()?;
        if handle.0.is_null() {
            return None;
        }

        let hglobal = HGLOBAL(handle.0);
        let size = GlobalSize(hglobal);
        if size == 0 {
            return None;
        }

        let ptr = GlobalLock(hglobal);
        if ptr.is_null() {
            return None;
        }
        let data = std::slice::from_raw_parts(ptr as *const u8, size).to_vec();
        let _ = GlobalUnlock(hglobal);

        Some(data)
    }

    pub fn write_all_formats(representations: &[ClipboardRepresentation]) -> Result<(), String> {
        unsafe {
            if OpenClipboard(None).is_err() {
                return Err("Failed to open clipboard for restore".into());
            }

            if EmptyClipboard().is_err() {
                let _ = CloseClipboard();
                return Err("Failed to empty clipboard".into());
            }

            for representation in representations {
                let Some(format) = parse_kind(&representation.kind) else {
                    warn!("Skipping foreign clipboard kind '{}'", representation.kind);
                    continue;
                };
                if let Err(e) = write_format(format, &representation.data) {
                    warn!("Failed to restore clipboard format {}: {}", format, e);
                }
            }

            let _ = CloseClipboard();
        }

        Ok(())
    }

    unsafe fn write_format(format: u32, data: &[u8]) -> Result<(), String> {
        let hmem =
            GlobalAlloc(GHND, data.len()).map_err(|e| format!("GlobalAlloc failed: {}", e))?;

        let ptr = GlobalLock(hmem);
        if ptr.is_null() {
            return Err("GlobalLock failed".into());
        }
        ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
        let _ = GlobalUnlock(hmem);

        // The clipboard owns the memory once SetClipboardData succeeds.
        SetClipboardData(format, Some(HANDLE(hmem.0)))
            .map_err(|e| format!("SetClipboardData failed: {}", e))?;

        Ok(())
    }

    pub fn read_text() -> Option<String> {
        let data = unsafe {
            if OpenClipboard(None).is_err() {
                return None;
            }
            let data = read_format(CF_UNICODETEXT);
            let _ = CloseClipboard();
            data?
        };

        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    pub fn write_text(text: &str) -> Result<(), String> {
        let data: Vec<u8> = text
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        write_all_formats(&[ClipboardRepresentation::new(format_kind(CF_UNICODETEXT), data)])
    }
}

#[cfg(target_os = "windows")]
impl ClipboardBackend for SystemClipboard {
    fn change_count(&self) -> u64 {
        win_clipboard::sequence_number()
    }

    fn items(&self) -> Result<Vec<ClipboardItem>, String> {
        let representations = win_clipboard::read_all_formats()?;
        if representations.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ClipboardItem { representations }])
    }

    fn read_text(&self) -> Option<String> {
        win_clipboard::read_text()
    }

    fn write_items(&self, items: &[ClipboardItem]) -> Result<(), String> {
        // The Windows clipboard holds a single item.
        let representations: Vec<_> = items
            .iter()
            .flat_map(|item| item.representations.iter().cloned())
            .collect();
        win_clipboard::write_all_formats(&representations)
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        win_clipboard::write_text(text)
    }
}

/// Linux: `wl-paste`/`wl-copy` on Wayland, `xclip` on X11.
///
/// Both tools can only serve one type per owner process, so restore writes the
/// preferred text representation and drops the rest with a warning.
#[cfg(target_os = "linux")]
mod linux_clipboard {
    use super::{ClipboardItem, ClipboardRepresentation};
    use crate::utils::{is_wayland, run_capture, run_with_input};

    const X11_META_TARGETS: &[&str] = &["TARGETS", "TIMESTAMP", "MULTIPLE", "SAVE_TARGETS"];
    const TEXT_PREFERENCE: &[&str] = &[
        "text/plain;charset=utf-8",
        "UTF8_STRING",
        "text/plain",
        "STRING",
    ];

    fn list_types() -> Result<Vec<String>, String> {
        let raw = if is_wayland() {
            run_capture("wl-paste", &["--list-types"])
        } else {
            run_capture("xclip", &["-selection", "clipboard", "-t", "TARGETS", "-o"])
        };

        // Both tools fail when the clipboard is empty.
        let Ok(raw) = raw else {
            return Ok(Vec::new());
        };
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !X11_META_TARGETS.contains(t))
            .map(str::to_string)
            .collect())
    }

    fn read_type(kind: &str) -> Result<Vec<u8>, String> {
        if is_wayland() {
            run_capture("wl-paste", &["--no-newline", "--type", kind])
        } else {
            run_capture("xclip", &["-selection", "clipboard", "-t", kind, "-o"])
        }
    }

    pub fn items() -> Result<Vec<ClipboardItem>, String> {
        let mut representations = Vec::new();
        for kind in list_types()? {
            match read_type(&kind) {
                Ok(data) => representations.push(ClipboardRepresentation::new(kind, data)),
                Err(e) => log::debug!("Skipping clipboard type {}: {}", kind, e),
            }
        }
        if representations.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ClipboardItem { representations }])
    }

    pub fn read_text() -> Option<String> {
        let raw = if is_wayland() {
            run_capture("wl-paste", &["--no-newline"])
        } else {
            run_capture("xclip", &["-selection", "clipboard", "-o"])
        };
        raw.ok().map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write(kind: &str, data: &[u8]) -> Result<(), String> {
        if is_wayland() {
            run_with_input("wl-copy", &["--type", kind], data)
        } else {
            run_with_input("xclip", &["-selection", "clipboard", "-t", kind, "-i"], data)
        }
    }

    /// The representation restore writes back, plus the kinds it has to drop.
    pub fn restore_plan(items: &[ClipboardItem]) -> Option<(&ClipboardRepresentation, Vec<&str>)> {
        let all: Vec<&ClipboardRepresentation> =
            items.iter().flat_map(|i| i.representations.iter()).collect();
        let chosen = TEXT_PREFERENCE
            .iter()
            .find_map(|kind| all.iter().find(|r| r.kind == *kind).copied())
            .or_else(|| all.first().copied())?;

        // X11 offers the same text under several aliases; those are not losses.
        let dropped = all
            .iter()
            .copied()
            .map(|r| r.kind.as_str())
            .filter(|kind| *kind != chosen.kind && !is_text_alias(chosen, kind))
            .collect();
        Some((chosen, dropped))
    }

    fn is_text_alias(chosen: &ClipboardRepresentation, kind: &str) -> bool {
        TEXT_PREFERENCE.contains(&chosen.kind.as_str())
            && (TEXT_PREFERENCE.contains(&kind) || kind == "TEXT" || kind == "text/plain;charset=UTF-8")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_restore_plan_reports_dropped_kinds() {
            let items = vec![ClipboardItem {
                representations: vec![
                    ClipboardRepresentation::new("text/html", "<b>hi</b>"),
                    ClipboardRepresentation::new("UTF8_STRING", "hi"),
                    ClipboardRepresentation::new("STRING", "hi"),
                    ClipboardRepresentation::new("image/png", vec![0x89, 0x50]),
                ],
            }];

            let (chosen, dropped) = restore_plan(&items).unwrap();
            assert_eq!(chosen.kind, "UTF8_STRING");
            assert_eq!(dropped, vec!["text/html", "image/png"]);
        }

        #[test]
        fn test_restore_plan_for_image_only_clipboard() {
            let items = vec![ClipboardItem {
                representations: vec![ClipboardRepresentation::new("image/png", vec![1, 2, 3])],
            }];

            let (chosen, dropped) = restore_plan(&items).unwrap();
            assert_eq!(chosen.kind, "image/png");
            assert!(dropped.is_empty());
            assert!(restore_plan(&[]).is_none());
        }
    }
}

#[cfg(target_os = "linux")]
impl ClipboardBackend for SystemClipboard {
    fn change_count(&self) -> u64 {
        0
    }

    fn items(&self) -> Result<Vec<ClipboardItem>, String> {
        linux_clipboard::items()
    }

    fn read_text(&self) -> Option<String> {
        linux_clipboard::read_text()
    }

    fn write_items(&self, items: &[ClipboardItem]) -> Result<(), String> {
        let (representation, dropped) = linux_clipboard::restore_plan(items)
            .ok_or_else(|| "No clipboard representation to write".to_string())?;
        if !dropped.is_empty() {
            warn!(
                "Clipboard restore keeps only {}; dropping {}",
                representation.kind,
                dropped.join(", ")
            );
        }
        linux_clipboard::write(&representation.kind, &representation.data)
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        linux_clipboard::write(PLAIN_TEXT_KIND, text.as_bytes())
    }
}

/// macOS: `NSPasteboard` through the Objective-C runtime. Every pasteboard item
/// is captured with all of its declared types, and restore replaces the contents
/// with a single `writeObjects:` call.
#[cfg(target_os = "macos")]
#[allow(unexpected_cfgs)] // objc::msg_send! checks cfg(feature = "cargo-clippy")
mod mac_pasteboard {
    use super::{ClipboardItem, ClipboardRepresentation};
    use objc::runtime::{Object, BOOL, NO};
    use objc::{class, msg_send, sel, sel_impl};
    use std::ffi::{c_void, CStr};
    use std::os::raw::c_char;

    #[link(name = "AppKit", kind = "framework")]
    extern "C" {}

    type Id = *mut Object;

    /// `NSPasteboardTypeString`
    const STRING_TYPE: &str = "public.utf8-plain-text";
    const NS_UTF8_STRING_ENCODING: usize = 4;

    /// Objects returned by convenience constructors are autoreleased; without a
    /// pool on this thread they would leak.
    struct AutoreleasePool(Id);

    impl AutoreleasePool {
        fn new() -> Self {
            unsafe { Self(msg_send![class!(NSAutoreleasePool), new]) }
        }
    }

    impl Drop for AutoreleasePool {
        fn drop(&mut self) {
            unsafe {
                let _: () = msg_send![self.0, drain];
            }
        }
    }

    unsafe fn general() -> Id {
        msg_send![class!(NSPasteboard), generalPasteboard]
    }

    unsafe fn ns_string(value: &str) -> Id {
        let string: Id = msg_send![class!(NSString), alloc];
        let string: Id = msg_send![string,
            initWithBytes: value.as_ptr() as *const c_void
            length: value.len()
            encoding: NS_UTF8_STRING_ENCODING];
        msg_send![string, autorelease]
    }

    unsafe fn rust_string(string: Id) -> Option<String> {
        if string.is_null() {
            return None;
        }
        let utf8: *const c_char = msg_send![string, UTF8String];
        if utf8.is_null() {
            return None;
        }
        Some(CStr::from_ptr(utf8).to_string_lossy().into_owned())
    }

    unsafe fn data_bytes(data: Id) -> Vec<u8> {
        let length: usize = msg_send![data, length];
        let bytes: *const u8 = msg_send![data, bytes];
        if length == 0 || bytes.is_null() {
            return Vec::new();
        }
        std::slice::from_raw_parts(bytes, length).to_vec()
    }

    pub fn change_count() -> u64 {
        let _pool = AutoreleasePool::new();
        unsafe {
            let count: isize = msg_send![general(), changeCount];
            count as u64
        }
    }

    pub fn items() -> Result<Vec<ClipboardItem>, String> {
        let _pool = AutoreleasePool::new();
        let mut items = Vec::new();
        unsafe {
            let pasteboard_items: Id = msg_send![general(), pasteboardItems];
            if pasteboard_items.is_null() {
                return Ok(items);
            }

            let item_count: usize = msg_send![pasteboard_items, count];
            for i in 0..item_count {
                let item: Id = msg_send![pasteboard_items, objectAtIndex: i];
                let types: Id = msg_send![item, types];
                if types.is_null() {
                    continue;
                }

                let mut representations = Vec::new();
                let type_count: usize = msg_send![types, count];
                for j in 0..type_count {
                    let kind: Id = msg_send![types, objectAtIndex: j];
                    let data: Id = msg_send![item, dataForType: kind];
                    // Promised types can fail to materialise.
                    if data.is_null() {
                        continue;
                    }
                    if let Some(kind) = rust_string(kind) {
                        representations.push(ClipboardRepresentation::new(kind, data_bytes(data)));
                    }
                }
                items.push(ClipboardItem { representations });
            }
        }
        Ok(items)
    }

    pub fn read_text() -> Option<String> {
        let _pool = AutoreleasePool::new();
        unsafe {
            let text: Id = msg_send![general(), stringForType: ns_string(STRING_TYPE)];
            rust_string(text)
        }
    }

    pub fn write_items(items: &[ClipboardItem]) -> Result<(), String> {
        let _pool = AutoreleasePool::new();
        unsafe {
            let objects: Id = msg_send![class!(NSMutableArray), array];
            for item in items {
                let pasteboard_item: Id = msg_send![class!(NSPasteboardItem), alloc];
                let pasteboard_item: Id = msg_send![pasteboard_item, init];
                for representation in &item.representations {
                    let data: Id = msg_send![class!(NSData),
                        dataWithBytes: representation.data.as_ptr() as *const c_void
                        length: representation.data.len()];
                    let ok: BOOL = msg_send![pasteboard_item,
                        setData: data
                        forType: ns_string(&representation.kind)];
                    if ok == NO {
                        log::warn!("Pasteboard rejected type {}", representation.kind);
                    }
                }
                let _: () = msg_send![objects, addObject: pasteboard_item];
                let _: () = msg_send![pasteboard_item, release];
            }

            let pasteboard = general();
            let _: isize = msg_send![pasteboard, clearContents];
            let ok: BOOL = msg_send![pasteboard, writeObjects: objects];
            if ok == NO {
                return Err("NSPasteboard writeObjects failed".into());
            }
        }
        Ok(())
    }

    pub fn write_text(text: &str) -> Result<(), String> {
        write_items(&[ClipboardItem::text(STRING_TYPE, text)])
    }
}

#[cfg(target_os = "macos")]
impl ClipboardBackend for SystemClipboard {
    fn change_count(&self) -> u64 {
        mac_pasteboard::change_count()
    }

    fn items(&self) -> Result<Vec<ClipboardItem>, String> {
        mac_pasteboard::items()
    }

    fn read_text(&self) -> Option<String> {
        mac_pasteboard::read_text()
    }

    fn write_items(&self, items: &[ClipboardItem]) -> Result<(), String> {
        mac_pasteboard::write_items(items)
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        mac_pasteboard::write_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_item() -> ClipboardItem {
        ClipboardItem {
            representations: vec![
                ClipboardRepresentation::new(PLAIN_TEXT_KIND, "hello"),
                ClipboardRepresentation::new("text/html", "<b>hello</b>"),
                ClipboardRepresentation::new("image/png", vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff]),
            ],
        }
    }

    /// Fails every write, counting attempts.
    #[derive(Default)]
    struct BrokenClipboard {
        writes: Mutex<usize>,
    }

    impl ClipboardBackend for BrokenClipboard {
        fn change_count(&self) -> u64 {
            7
        }
        fn items(&self) -> Result<Vec<ClipboardItem>, String> {
            Err("locked".into())
        }
        fn read_text(&self) -> Option<String> {
            Some("fallback".into())
        }
        fn write_items(&self, _items: &[ClipboardItem]) -> Result<(), String> {
            *self.writes.lock().unwrap() += 1;
            Err("denied".into())
        }
        fn write_text(&self, _text: &str) -> Result<(), String> {
            *self.writes.lock().unwrap() += 1;
            Err("denied".into())
        }
    }

    #[test]
    fn test_restore_is_byte_identical() {
        let items = vec![
            rich_item(),
            ClipboardItem::text(PLAIN_TEXT_KIND, "second"),
        ];
        let clipboard = Arc::new(MemoryClipboard::with_items(items.clone()));
        let guard = ClipboardGuard::new(clipboard.clone());

        let snapshot = guard.snapshot();
        assert_eq!(snapshot.text.as_deref(), Some("hello"));

        clipboard.write_text("the selection").unwrap();
        guard.restore(snapshot);
        assert_eq!(clipboard.contents(), items);
    }

    #[test]
    fn test_restore_without_copy_keeps_content() {
        let clipboard = Arc::new(MemoryClipboard::with_items(vec![rich_item()]));
        let guard = ClipboardGuard::new(clipboard.clone());
        let snapshot = guard.snapshot();
        guard.restore(snapshot);
        assert_eq!(clipboard.contents(), vec![rich_item()]);
    }

    #[test]
    fn test_empty_snapshot_restore_is_noop() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let guard = ClipboardGuard::new(clipboard.clone());
        let snapshot = guard.snapshot();
        assert!(snapshot.is_empty());

        clipboard.write_text("set later").unwrap();
        let count = clipboard.change_count();
        guard.restore(snapshot);
        assert_eq!(clipboard.change_count(), count);
        assert_eq!(clipboard.read_text().as_deref(), Some("set later"));
    }

    #[test]
    fn test_text_fallback_when_items_unavailable() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let guard = ClipboardGuard::new(clipboard.clone());
        guard.restore(ClipboardSnapshot {
            items: Vec::new(),
            text: Some("plain".into()),
            change_count: 3,
        });
        assert_eq!(clipboard.read_text().as_deref(), Some("plain"));
    }

    #[test]
    fn test_write_failures_are_swallowed() {
        let backend = Arc::new(BrokenClipboard::default());
        let guard = ClipboardGuard::new(backend.clone());
        let snapshot = guard.snapshot();
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.change_count, 7);

        guard.restore(snapshot);
        assert_eq!(*backend.writes.lock().unwrap(), 1);
    }

    #[test]
    fn test_image_only_clipboard_survives_text_copy() {
        let image = ClipboardItem {
            representations: vec![ClipboardRepresentation::new(
                "public.png",
                vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a],
            )],
        };
        let clipboard = Arc::new(MemoryClipboard::with_items(vec![image.clone()]));
        let guard = ClipboardGuard::new(clipboard.clone());

        let snapshot = guard.snapshot();
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.text, None);

        clipboard.write_text("selected words").unwrap();
        guard.restore(snapshot);
        assert_eq!(clipboard.contents(), vec![image]);
    }

    #[cfg(target_os = "macos")]
    #[test]
    #[ignore = "replaces the contents of the user's pasteboard"]
    fn test_pasteboard_round_trip_keeps_every_type() {
        let clipboard = Arc::new(SystemClipboard::new());
        let guard = ClipboardGuard::new(clipboard.clone());
        let original = guard.snapshot();

        let rich = vec![ClipboardItem {
            representations: vec![
                ClipboardRepresentation::new("public.utf8-plain-text", "hello"),
                ClipboardRepresentation::new("public.html", "<b>hello</b>"),
            ],
        }];
        clipboard.write_items(&rich).unwrap();
        let before = clipboard.change_count();
        let snapshot = guard.snapshot();

        clipboard.write_text("selected words").unwrap();
        assert!(clipboard.change_count() > before);
        guard.restore(snapshot);
        let restored = clipboard.items().unwrap();
        for representation in &rich[0].representations {
            assert!(restored[0].representations.contains(representation));
        }
        assert_eq!(clipboard.read_text().as_deref(), Some("hello"));

        guard.restore(original);
    }

    #[test]
    fn test_representation_less_items_are_dropped() {
        let clipboard = Arc::new(MemoryClipboard::with_items(vec![ClipboardItem::default()]));
        let snapshot = ClipboardGuard::new(clipboard).snapshot();
        assert!(snapshot.items.is_empty());
        assert!(snapshot.is_empty());
    }
}

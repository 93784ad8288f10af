//! Hotkey events.
//!
//! The firmware signals hotkeys through WMI notification `0xd2` on the
//! PNP0C14 device; the key code is the integer returned by `_WED`. Without
//! an in-kernel notify handler the notification reaches userspace through
//! acpid, so the listener reads acpid's socket and fetches the event data
//! through the same WMI backend as the EC channel. Mapped keys and the
//! rfkill switch are reported to an [`InputSink`] when one is attached.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::input::{HotKey, InputSink};
use super::platform::PlatformAttrs;
use crate::core::lock::Interrupt;
use crate::core::wmi::{AcpiObject, WmiBus, WmiError};

/// Notification carrying a hotkey code.
pub const HOTKEY_NOTIFY: u32 = 0xd2;
pub const FN_ESC_CODE: u64 = 184;

const RECENT_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Reported through some other path already.
    Ignore,
    /// Sets the rfkill switch.
    Switch(bool),
    Key(HotKey),
}

/// Sparse keymap of the hotkey codes.
pub const KEYMAP: &[(u64, KeyAction)] = &[
    (0x01, KeyAction::Ignore), // caps lock
    (0x02, KeyAction::Ignore), // num lock
    (0x03, KeyAction::Ignore), // scroll lock
    (0x14, KeyAction::Ignore), // brightness up
    (0x15, KeyAction::Ignore), // brightness down
    (0x1a, KeyAction::Switch(true)),
    (0x1b, KeyAction::Switch(false)),
    (0x35, KeyAction::Ignore), // mute
    (0x36, KeyAction::Ignore), // volume down
    (0x37, KeyAction::Ignore), // volume up
    (0xa4, KeyAction::Key(HotKey::Rfkill)),
    (0xb1, KeyAction::Key(HotKey::KbdIllumDown)),
    (0xb2, KeyAction::Key(HotKey::KbdIllumUp)),
    (0xb8, KeyAction::Key(HotKey::FnEsc)),
];

pub fn key_action(code: u64) -> Option<KeyAction> {
    KEYMAP
        .iter()
        .find(|(c, _)| *c == code)
        .map(|&(_, action)| action)
}

fn describe(code: u64) -> Option<&'static str> {
    let what = match code {
        1 => "caps lock",
        2 => "num lock",
        3 => "scroll lock",
        4 => "touchpad on",
        5 => "touchpad off",
        20 => "increase screen brightness",
        21 => "decrease screen brightness",
        26 => "radio on",
        27 => "radio off",
        53 => "toggle mute",
        54 => "decrease volume",
        55 => "increase volume",
        57 => "lightbar on",
        58 => "lightbar off",
        64 => "enable super key lock",
        65 => "disable super key lock",
        164 => "toggle airplane mode",
        165 => "super key lock state changed",
        166 => "lightbar state changed",
        167 => "fan boost state changed",
        171 => "AC plugged/unplugged",
        176 => "change perf mode",
        177 => "keyboard backlight decrease",
        178 => "keyboard backlight increase",
        184 => "toggle Fn lock",
        240 => "keyboard backlight changed",
        _ => return None,
    };
    Some(what)
}

/// A handled hotkey, as kept in the recent event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyEvent {
    pub code: u64,
    pub description: Option<String>,
    pub key: Option<String>,
}

/// Turns notifications into key events and side effects.
pub struct EventHandler {
    wmi: Arc<dyn WmiBus>,
    attrs: PlatformAttrs,
    rfkill: AtomicBool,
    recent: Mutex<VecDeque<HotkeyEvent>>,
    input: Option<Box<dyn InputSink>>,
}

impl EventHandler {
    /// Reads the Wi-Fi state as the initial rfkill switch position and
    /// reports it to `input`.
    pub fn new(
        wmi: Arc<dyn WmiBus>,
        attrs: PlatformAttrs,
        input: Option<Box<dyn InputSink>>,
    ) -> Self {
        let rfkill = attrs.wifi_state().unwrap_or_else(|err| {
            debug!("cannot read wifi state, assuming on: {err}");
            true
        });

        let handler = Self {
            wmi,
            attrs,
            rfkill: AtomicBool::new(rfkill),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
            input,
        };
        handler.report(|input| input.rfkill_switch(rfkill));
        handler
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn rfkill_switch(&self) -> bool {
        self.rfkill.load(Ordering::Relaxed)
    }

    pub fn recent(&self) -> Vec<HotkeyEvent> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Handle WMI notification `notify_id`.
    pub fn handle_notify(&self, notify_id: u32) -> Result<(), WmiError> {
        info!("WMI event (value={notify_id:#04x})");
        let data = self.wmi.event_data(notify_id)?;

        match &data {
            Some(AcpiObject::Integer(v)) => debug!("event data: int = {v}"),
            Some(AcpiObject::String(s)) => debug!("event data: string = '{s}'"),
            Some(AcpiObject::Buffer(buf)) => debug!("event data: buffer = {buf:02x?}"),
            Some(other) => debug!("event data: {other:?}"),
            None => debug!("event data: none"),
        }

        if notify_id == HOTKEY_NOTIFY {
            if let Some(AcpiObject::Integer(code)) = data {
                self.handle_code(code);
            }
        }
        Ok(())
    }

    /// Handle one hotkey code from notification `0xd2`.
    pub fn handle_code(&self, code: u64) -> Option<HotkeyEvent> {
        match describe(code) {
            Some(what) => info!("{what}"),
            None => warn!("unknown code: {code}"),
        }

        if code == FN_ESC_CODE {
            self.toggle_fn_lock();
        }

        let action = key_action(code);
        let key = match action {
            Some(KeyAction::Switch(on)) => {
                self.rfkill.store(on, Ordering::Relaxed);
                self.report(|input| input.rfkill_switch(on));
                Some("rfkill_switch")
            }
            Some(KeyAction::Key(key)) => {
                self.report(|input| input.key(key));
                Some(key.name())
            }
            Some(KeyAction::Ignore) | None => None,
        };

        if action == Some(KeyAction::Ignore) {
            return None;
        }

        let event = HotkeyEvent {
            code,
            description: describe(code).map(str::to_string),
            key: key.map(str::to_string),
        };

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(event.clone());
        Some(event)
    }

    fn report(&self, emit: impl FnOnce(&dyn InputSink) -> std::io::Result<()>) {
        if let Some(input) = &self.input {
            if let Err(err) = emit(input.as_ref()) {
                warn!("cannot report input event: {err}");
            }
        }
    }

    fn toggle_fn_lock(&self) {
        // By the time the event arrives the EC already reports the new
        // state; it only sticks once written back.
        let state = match self.attrs.fn_lock() {
            Ok(state) => state,
            Err(err) => {
                warn!("cannot read Fn lock state: {err}");
                return;
            }
        };

        info!("setting Fn lock state from {} to {}", !state, state);
        if let Err(err) = self.attrs.set_fn_lock(state) {
            warn!("cannot set Fn lock state: {err}");
        }
    }
}

/// Notification id from an acpid event line for the WMI device, e.g.
/// `PNP0C14:00 000000d2 00000000`.
pub fn parse_acpid_line(line: &str) -> Option<u32> {
    let mut tokens = line.split_whitespace();
    tokens.find(|token| token.starts_with("PNP0C14"))?;
    let notify = tokens.next()?;
    u32::from_str_radix(notify.trim_start_matches("0x"), 16).ok()
}

/// Read acpid events until the socket closes or `interrupt` is raised.
pub fn listen(
    socket: &Path,
    handler: &EventHandler,
    interrupt: &Interrupt,
) -> std::io::Result<()> {
    let stream = UnixStream::connect(socket)?;
    info!(socket = %socket.display(), "listening for hotkey events");

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        if interrupt.is_raised() {
            break;
        }
        let line = line?;
        let Some(notify) = parse_acpid_line(&line) else {
            continue;
        };
        if let Err(err) = handler.handle_notify(notify) {
            warn!("bad WMI event: {err}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acpid_lines() {
        assert_eq!(parse_acpid_line("PNP0C14:00 000000d2 00000000"), Some(0xd2));
        assert_eq!(parse_acpid_line("wmi PNP0C14:00 000000d0 00000000\n"), Some(0xd0));
        assert_eq!(parse_acpid_line("button/power PBTN 00000080 00000000"), None);
        assert_eq!(parse_acpid_line("PNP0C14:00"), None);
        assert_eq!(parse_acpid_line(""), None);
    }

    #[test]
    fn keymap_entries() {
        assert_eq!(key_action(0x1a), Some(KeyAction::Switch(true)));
        assert_eq!(key_action(0x1b), Some(KeyAction::Switch(false)));
        assert_eq!(key_action(0xb8), Some(KeyAction::Key(HotKey::FnEsc)));
        assert_eq!(key_action(0x35), Some(KeyAction::Ignore));
        assert_eq!(key_action(0x99), None);
        assert_eq!(FN_ESC_CODE, 0xb8);
    }
}

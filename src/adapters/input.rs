//! The `QC71 laptop input device`: mapped hotkeys and the rfkill switch,
//! reported through a uinput virtual device.

use std::io;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, SwitchType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const INPUT_NAME: &str = "QC71 laptop input device";

/// Keys the firmware's hotkey codes map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotKey {
    Rfkill,
    KbdIllumDown,
    KbdIllumUp,
    FnEsc,
}

impl HotKey {
    pub const ALL: [HotKey; 4] = [
        HotKey::Rfkill,
        HotKey::KbdIllumDown,
        HotKey::KbdIllumUp,
        HotKey::FnEsc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HotKey::Rfkill => "rfkill",
            HotKey::KbdIllumDown => "kbd_illum_down",
            HotKey::KbdIllumUp => "kbd_illum_up",
            HotKey::FnEsc => "fn_esc",
        }
    }

    pub fn key(self) -> Key {
        match self {
            HotKey::Rfkill => Key::KEY_RFKILL,
            HotKey::KbdIllumDown => Key::KEY_KBDILLUMDOWN,
            HotKey::KbdIllumUp => Key::KEY_KBDILLUMUP,
            HotKey::FnEsc => Key::KEY_FN_ESC,
        }
    }
}

/// Where handled hotkeys are reported.
pub trait InputSink: Send + Sync {
    /// Press and release `key`.
    fn key(&self, key: HotKey) -> io::Result<()>;

    fn rfkill_switch(&self, on: bool) -> io::Result<()>;
}

/// uinput-backed [`InputSink`]. Needs write access to `/dev/uinput`.
pub struct UinputDevice {
    device: Mutex<VirtualDevice>,
}

impl UinputDevice {
    pub fn create() -> io::Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for key in HotKey::ALL {
            keys.insert(key.key());
        }
        let mut switches = AttributeSet::<SwitchType>::new();
        switches.insert(SwitchType::SW_RFKILL_ALL);

        let device = VirtualDeviceBuilder::new()?
            .name(INPUT_NAME)
            .with_keys(&keys)?
            .with_switches(&switches)?
            .build()?;
        info!("created input device '{INPUT_NAME}'");

        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl InputSink for UinputDevice {
    fn key(&self, key: HotKey) -> io::Result<()> {
        let code = key.key().code();
        let mut device = self.device.lock();
        // each emit is followed by its own SYN_REPORT
        device.emit(&[InputEvent::new(EventType::KEY, code, 1)])?;
        device.emit(&[InputEvent::new(EventType::KEY, code, 0)])
    }

    fn rfkill_switch(&self, on: bool) -> io::Result<()> {
        let event = InputEvent::new(
            EventType::SWITCH,
            SwitchType::SW_RFKILL_ALL.0,
            i32::from(on),
        );
        self.device.lock().emit(&[event])
    }
}

impl std::fmt::Debug for UinputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UinputDevice")
            .field("name", &INPUT_NAME)
            .finish_non_exhaustive()
    }
}

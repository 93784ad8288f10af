//! Boolean platform attributes (`fn_lock`, `silent_mode`, ...).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ec::{ByteRegisters, EcChannel, EcError};
use crate::core::features::Features;
use crate::core::regs::{
    BitField, AP_BIOS_BYTE_FN_LOCK_SWITCH, BIOS_CTRL_1_FN_LOCK_STATUS,
    BIOS_CTRL_3_FAN_ALWAYS_ON, BIOS_CTRL_3_FAN_REDUCED_DUTY_CYCLE, CTRL_1_MANUAL_MODE,
    DEVICE_STATUS_WIFI_ON, FAN_CTRL_SILENT_MODE, FAN_CTRL_TURBO, STATUS_1_SUPER_KEY_LOCK,
    TRIGGER_1, TRIGGER_1_SUPER_KEY_LOCK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformAttr {
    FnLock,
    FnLockSwitch,
    FanAlwaysOn,
    FanReducedDutyCycle,
    ManualControl,
    SuperKeyLock,
    SilentMode,
    TurboMode,
}

impl PlatformAttr {
    pub const ALL: [PlatformAttr; 8] = [
        PlatformAttr::FnLock,
        PlatformAttr::FnLockSwitch,
        PlatformAttr::FanAlwaysOn,
        PlatformAttr::FanReducedDutyCycle,
        PlatformAttr::ManualControl,
        PlatformAttr::SuperKeyLock,
        PlatformAttr::SilentMode,
        PlatformAttr::TurboMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PlatformAttr::FnLock => "fn_lock",
            PlatformAttr::FnLockSwitch => "fn_lock_switch",
            PlatformAttr::FanAlwaysOn => "fan_always_on",
            PlatformAttr::FanReducedDutyCycle => "fan_reduced_duty_cycle",
            PlatformAttr::ManualControl => "manual_control",
            PlatformAttr::SuperKeyLock => "super_key_lock",
            PlatformAttr::SilentMode => "silent_mode",
            PlatformAttr::TurboMode => "turbo_mode",
        }
    }

    /// Feature the attribute depends on; `None` means always visible.
    pub fn gate(self) -> Option<Features> {
        match self {
            PlatformAttr::FnLock | PlatformAttr::FnLockSwitch => Some(Features::FN_LOCK),
            PlatformAttr::FanAlwaysOn | PlatformAttr::FanReducedDutyCycle => {
                Some(Features::FAN_EXTRAS)
            }
            PlatformAttr::ManualControl => None,
            PlatformAttr::SuperKeyLock => Some(Features::SUPER_KEY_LOCK),
            PlatformAttr::SilentMode => Some(Features::SILENT_MODE),
            PlatformAttr::TurboMode => Some(Features::TURBO_MODE),
        }
    }

    /// Register bit read back for the attribute.
    fn field(self) -> BitField {
        match self {
            PlatformAttr::FnLock => BIOS_CTRL_1_FN_LOCK_STATUS,
            PlatformAttr::FnLockSwitch => AP_BIOS_BYTE_FN_LOCK_SWITCH,
            PlatformAttr::FanAlwaysOn => BIOS_CTRL_3_FAN_ALWAYS_ON,
            PlatformAttr::FanReducedDutyCycle => BIOS_CTRL_3_FAN_REDUCED_DUTY_CYCLE,
            PlatformAttr::ManualControl => CTRL_1_MANUAL_MODE,
            PlatformAttr::SuperKeyLock => STATUS_1_SUPER_KEY_LOCK,
            PlatformAttr::SilentMode => FAN_CTRL_SILENT_MODE,
            PlatformAttr::TurboMode => FAN_CTRL_TURBO,
        }
    }
}

impl fmt::Display for PlatformAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlatformAttr {
    type Err = EcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformAttr::ALL
            .into_iter()
            .find(|attr| attr.name() == s)
            .ok_or_else(|| EcError::invalid(format!("unknown attribute {s:?}")))
    }
}

/// The platform device's attribute group.
#[derive(Debug, Clone)]
pub struct PlatformAttrs {
    ec: Arc<EcChannel>,
    features: Features,
}

impl PlatformAttrs {
    pub fn new(ec: Arc<EcChannel>, features: Features) -> Self {
        Self { ec, features }
    }

    pub fn is_visible(&self, attr: PlatformAttr) -> bool {
        attr.gate().map_or(true, |gate| self.features.contains(gate))
    }

    pub fn visible(&self) -> Vec<PlatformAttr> {
        PlatformAttr::ALL
            .into_iter()
            .filter(|&attr| self.is_visible(attr))
            .collect()
    }

    pub fn get(&self, attr: PlatformAttr) -> Result<bool, EcError> {
        self.check(attr)?;
        match attr {
            PlatformAttr::FnLock => self.fn_lock(),
            other => self.ec.read_flag(other.field()),
        }
    }

    pub fn set(&self, attr: PlatformAttr, on: bool) -> Result<(), EcError> {
        self.check(attr)?;
        match attr {
            PlatformAttr::FnLock => self.set_fn_lock(on),
            PlatformAttr::SuperKeyLock => {
                // the lock is toggled through the trigger register
                if self.ec.read_flag(STATUS_1_SUPER_KEY_LOCK)? != on {
                    self.ec.write_byte(TRIGGER_1, TRIGGER_1_SUPER_KEY_LOCK)?;
                }
                Ok(())
            }
            other => self.ec.write_flag(other.field(), on),
        }
    }

    fn check(&self, attr: PlatformAttr) -> Result<(), EcError> {
        if self.is_visible(attr) {
            Ok(())
        } else {
            Err(EcError::Unsupported(attr.name()))
        }
    }

    // Fn lock and Wi-Fi state are also used by the hotkey handler, which
    // doesn't care about attribute visibility.

    pub fn fn_lock(&self) -> Result<bool, EcError> {
        self.ec.read_flag(BIOS_CTRL_1_FN_LOCK_STATUS)
    }

    pub fn set_fn_lock(&self, on: bool) -> Result<(), EcError> {
        self.ec.write_flag(BIOS_CTRL_1_FN_LOCK_STATUS, on)
    }

    pub fn wifi_state(&self) -> Result<bool, EcError> {
        self.ec.read_flag(DEVICE_STATUS_WIFI_ON)
    }
}

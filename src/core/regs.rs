//! EC register map for QC71-based laptops (Tongfang GK5CN6Z/GK7CP*, Slimbook
//! PROX, Avell A60, XMG Fusion 15 ...).
//!
//! Every register is addressed as `page << 8 | offset` inside the EC's RAM.
//! The addresses and bits come from reverse-engineering the vendor control
//! center. Several of them are only reachable through the debug register
//! table: writing arbitrary values to them can leave the firmware in a
//! strange state until the next power cycle.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Address and bit-field types
// ---------------------------------------------------------------------------

/// A 16-bit EC RAM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EcAddr(u16);

impl EcAddr {
    pub const fn new(page: u8, offset: u8) -> Self {
        Self(((page as u16) << 8) | offset as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn page(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn offset(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for EcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A contiguous group of bits inside one byte-wide register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub addr: EcAddr,
    pub mask: u8,
}

impl BitField {
    pub const fn new(addr: EcAddr, mask: u8) -> Self {
        Self { addr, mask }
    }

    pub const fn shift(self) -> u32 {
        self.mask.trailing_zeros()
    }

    /// Field value, shifted down to bit 0.
    pub const fn extract(self, register: u8) -> u8 {
        (register & self.mask) >> self.shift()
    }

    /// `register` with the field replaced by `value` (excess bits dropped).
    pub const fn insert(self, register: u8, value: u8) -> u8 {
        (register & !self.mask) | ((value << self.shift()) & self.mask)
    }

    pub const fn is_set(self, register: u8) -> bool {
        register & self.mask != 0
    }
}

const fn bit(n: u32) -> u8 {
    1 << n
}

const fn genmask(high: u32, low: u32) -> u8 {
    ((0xFFu16 >> (7 - high)) as u8) & !(bit(low) - 1)
}

// ---------------------------------------------------------------------------
// Lightbar
// ---------------------------------------------------------------------------

pub const LIGHTBAR_CTRL: EcAddr = EcAddr::new(0x07, 0x48);
pub const LIGHTBAR_CTRL_S0_OFF: BitField = BitField::new(LIGHTBAR_CTRL, bit(2));
pub const LIGHTBAR_CTRL_S3_OFF: BitField = BitField::new(LIGHTBAR_CTRL, bit(3));
pub const LIGHTBAR_CTRL_RAINBOW: BitField = BitField::new(LIGHTBAR_CTRL, bit(7));

pub const LIGHTBAR_RED: EcAddr = EcAddr::new(0x07, 0x49);
pub const LIGHTBAR_GREEN: EcAddr = EcAddr::new(0x07, 0x4A);
pub const LIGHTBAR_BLUE: EcAddr = EcAddr::new(0x07, 0x4B);

/// Lightbar channel registers in red, green, blue order.
pub const LIGHTBAR_COLOR_ADDRS: [EcAddr; 3] = [LIGHTBAR_RED, LIGHTBAR_GREEN, LIGHTBAR_BLUE];

/// Raw channel value for each of the ten brightness levels (`4 * level`).
pub const LIGHTBAR_LEVELS: [u8; 10] = [0, 4, 8, 12, 16, 20, 24, 28, 32, 36];

/// Inverse of [`LIGHTBAR_LEVELS`]; values off the table have no level.
pub fn lightbar_level(raw: u8) -> Option<u8> {
    LIGHTBAR_LEVELS
        .iter()
        .position(|&v| v == raw)
        .map(|level| level as u8)
}

// ---------------------------------------------------------------------------
// Fans
// ---------------------------------------------------------------------------

pub const FAN_CTRL: EcAddr = EcAddr::new(0x07, 0x51);
pub const FAN_CTRL_TURBO: BitField = BitField::new(FAN_CTRL, bit(4));
pub const FAN_CTRL_AUTO: BitField = BitField::new(FAN_CTRL, bit(5));
pub const FAN_CTRL_BOOST: BitField = BitField::new(FAN_CTRL, bit(6));
pub const FAN_CTRL_SILENT_MODE: BitField = BitField::new(FAN_CTRL, bit(7));

/// Written together with the auto bit when handing the fans back to the
/// firmware. Nobody knows what it means; the firmware ignores the auto bit
/// without it.
pub const FAN_CTRL_AUTO_HIGH: u8 = 0x80;

pub const FAN_RPM_1: EcAddr = EcAddr::new(0x04, 0x64);
pub const FAN_RPM_2: EcAddr = EcAddr::new(0x04, 0x6C);

pub const FAN_PWM_1: EcAddr = EcAddr::new(0x18, 0x04);
pub const FAN_PWM_2: EcAddr = EcAddr::new(0x18, 0x09);

/// Raw PWM value at full speed.
pub const FAN_MAX_PWM: u8 = 200;

// TODO: figure out the scale; the battery sensor looks like value / 10 + X
pub const FAN_TEMP_1: EcAddr = EcAddr::new(0x04, 0x3E);
pub const FAN_TEMP_2: EcAddr = EcAddr::new(0x04, 0x4F);

pub const FAN_RPM_ADDRS: [EcAddr; 2] = [FAN_RPM_1, FAN_RPM_2];
pub const FAN_PWM_ADDRS: [EcAddr; 2] = [FAN_PWM_1, FAN_PWM_2];
pub const FAN_TEMP_ADDRS: [EcAddr; 2] = [FAN_TEMP_1, FAN_TEMP_2];

pub const FAN_MODE_INDEX: EcAddr = EcAddr::new(0x07, 0xAB);

// ---------------------------------------------------------------------------
// Control registers
// ---------------------------------------------------------------------------

pub const CTRL_1: EcAddr = EcAddr::new(0x07, 0x41);
pub const CTRL_1_MANUAL_MODE: BitField = BitField::new(CTRL_1, bit(0));
pub const CTRL_1_FAN_ABNORMAL: BitField = BitField::new(CTRL_1, bit(5));

pub const CTRL_2: EcAddr = EcAddr::new(0x07, 0x8C);

pub const CTRL_3: EcAddr = EcAddr::new(0x07, 0xA5);

pub const CTRL_4: EcAddr = EcAddr::new(0x07, 0xA6);

// ---------------------------------------------------------------------------
// Capability, trigger and status registers
// ---------------------------------------------------------------------------

pub const SUPPORT_1: EcAddr = EcAddr::new(0x07, 0x65);
pub const SUPPORT_1_SUPER_KEY_LOCK: u8 = bit(5);
pub const SUPPORT_1_LIGHTBAR: u8 = bit(6);
pub const SUPPORT_1_FAN_BOOST: u8 = bit(7);

pub const SUPPORT_2: EcAddr = EcAddr::new(0x07, 0x66);

pub const SUPPORT_5: EcAddr = EcAddr::new(0x07, 0x42);

pub const TRIGGER_1: EcAddr = EcAddr::new(0x07, 0x67);
pub const TRIGGER_1_SUPER_KEY_LOCK: u8 = bit(0);

pub const TRIGGER_2: EcAddr = EcAddr::new(0x07, 0x5D);

pub const STATUS_1: EcAddr = EcAddr::new(0x07, 0x68);
pub const STATUS_1_SUPER_KEY_LOCK: BitField = BitField::new(STATUS_1, bit(0));

pub const BIOS_INFO_1: EcAddr = EcAddr::new(0x04, 0x9F);
pub const BIOS_INFO_5: EcAddr = EcAddr::new(0x04, 0x66);

pub const POWER_STATUS: EcAddr = EcAddr::new(0x04, 0x5E);
pub const POWER_SOURCE: EcAddr = EcAddr::new(0x04, 0x90);
pub const PLATFORM_ID: EcAddr = EcAddr::new(0x04, 0x56);
pub const PROJ_ID: EcAddr = EcAddr::new(0x07, 0x40);

pub const AP_BIOS_BYTE: EcAddr = EcAddr::new(0x07, 0xA4);
pub const AP_BIOS_BYTE_FN_LOCK_SWITCH: BitField = BitField::new(AP_BIOS_BYTE, bit(3));

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------

pub const BATT_CHARGE_CTRL: EcAddr = EcAddr::new(0x07, 0xB9);
pub const BATT_CHARGE_CTRL_VALUE: BitField = BitField::new(BATT_CHARGE_CTRL, genmask(6, 0));

pub const BATT_STATUS: EcAddr = EcAddr::new(0x04, 0x32);

/// Possibly `value / 10 + X` degrees Celsius.
pub const BATT_TEMP: EcAddr = EcAddr::new(0x04, 0xA2);

pub const BATT_ALERT: EcAddr = EcAddr::new(0x04, 0x94);

// ---------------------------------------------------------------------------
// BIOS control
// ---------------------------------------------------------------------------

pub const BIOS_CTRL_1: EcAddr = EcAddr::new(0x07, 0x4E);
pub const BIOS_CTRL_1_FN_LOCK_STATUS: BitField = BitField::new(BIOS_CTRL_1, bit(4));

pub const BIOS_CTRL_2: EcAddr = EcAddr::new(0x07, 0x82);

pub const BIOS_CTRL_3: EcAddr = EcAddr::new(0x07, 0xA3);
pub const BIOS_CTRL_3_FAN_REDUCED_DUTY_CYCLE: BitField = BitField::new(BIOS_CTRL_3, bit(5));
pub const BIOS_CTRL_3_FAN_ALWAYS_ON: BitField = BitField::new(BIOS_CTRL_3, bit(6));

pub const PL1: EcAddr = EcAddr::new(0x07, 0x83);
pub const PL2: EcAddr = EcAddr::new(0x07, 0x84);
pub const PL4: EcAddr = EcAddr::new(0x07, 0x85);

pub const DEVICE_STATUS: EcAddr = EcAddr::new(0x04, 0x7B);
// bit 5 follows the rfkill state too, possibly Bluetooth
pub const DEVICE_STATUS_WIFI_ON: BitField = BitField::new(DEVICE_STATUS, bit(7));

// ---------------------------------------------------------------------------
// Debug register table
// ---------------------------------------------------------------------------

/// Registers exposed by name for raw inspection.
pub const DEBUG_REGISTERS: &[(&str, EcAddr)] = &[
    ("1108", EcAddr::from_raw(1108)),
    ("1110", EcAddr::from_raw(1110)),
    ("ap_bios_byte", AP_BIOS_BYTE),
    ("batt_alert", BATT_ALERT),
    ("batt_charge_ctrl", BATT_CHARGE_CTRL),
    ("batt_status", BATT_STATUS),
    ("batt_temp", BATT_TEMP),
    ("bios_ctrl_1", BIOS_CTRL_1),
    ("bios_ctrl_2", BIOS_CTRL_2),
    ("bios_ctrl_3", BIOS_CTRL_3),
    ("bios_info_1", BIOS_INFO_1),
    ("bios_info_5", BIOS_INFO_5),
    ("ctrl_1", CTRL_1),
    ("ctrl_2", CTRL_2),
    ("ctrl_3", CTRL_3),
    ("ctrl_4", CTRL_4),
    ("device_status", DEVICE_STATUS),
    ("fan_ctrl", FAN_CTRL),
    ("fan_mode_index", FAN_MODE_INDEX),
    ("fan_temp_1", FAN_TEMP_1),
    ("fan_temp_2", FAN_TEMP_2),
    ("fan_pwm_1", FAN_PWM_1),
    ("fan_pwm_2", FAN_PWM_2),
    // writes to the level tables don't seem to stick
    ("fan_l1_pwm", EcAddr::new(0x07, 0x43)),
    ("fan_l2_pwm", EcAddr::new(0x07, 0x44)),
    ("fan_l3_pwm", EcAddr::new(0x07, 0x45)),
    ("fan_l4_pwm", EcAddr::new(0x07, 0x46)),
    ("fan_l5_pwm", EcAddr::new(0x07, 0x47)),
    ("fan_l1_pwm_default", EcAddr::new(0x07, 0x86)),
    ("fan_l2_pwm_default", EcAddr::new(0x07, 0x87)),
    ("fan_l3_pwm_default", EcAddr::new(0x07, 0x88)),
    ("fan_l4_pwm_default", EcAddr::new(0x07, 0x89)),
    ("fan_l5_pwm_default", EcAddr::new(0x07, 0x8A)),
    ("fan_min_speed", EcAddr::from_raw(1950)),
    ("fan_min_temp", EcAddr::from_raw(1951)),
    ("fan_extra_speed", EcAddr::from_raw(1952)),
    ("lightbar_ctrl", LIGHTBAR_CTRL),
    ("lightbar_red", LIGHTBAR_RED),
    ("lightbar_green", LIGHTBAR_GREEN),
    ("lightbar_blue", LIGHTBAR_BLUE),
    ("support_1", SUPPORT_1),
    ("support_2", SUPPORT_2),
    ("support_5", SUPPORT_5),
    ("status_1", STATUS_1),
    ("platform_id", PLATFORM_ID),
    ("power_source", POWER_SOURCE),
    ("project_id", PROJ_ID),
    ("power_status", POWER_STATUS),
    ("pl_1", PL1),
    ("pl_2", PL2),
    ("pl_4", PL4),
    ("trigger_1", TRIGGER_1),
    ("trigger_2", TRIGGER_2),
];

/// Look up a debug register by name.
pub fn debug_register(name: &str) -> Option<EcAddr> {
    DEBUG_REGISTERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, addr)| addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn address_is_page_then_offset() {
        assert_eq!(FAN_CTRL.raw(), 0x0751);
        assert_eq!(FAN_CTRL.page(), 0x07);
        assert_eq!(FAN_CTRL.offset(), 0x51);
        assert_eq!(FAN_PWM_2.raw(), 0x1809);
        assert_eq!(format!("{FAN_RPM_1}"), "0x0464");
    }

    #[test]
    fn genmask_matches_kernel_macro() {
        assert_eq!(genmask(2, 0), 0b0000_0111);
        assert_eq!(genmask(6, 0), 0x7F);
        assert_eq!(genmask(7, 4), 0xF0);
        assert_eq!(genmask(1, 0), 0b11);
    }

    #[test]
    fn bitfield_extract_and_insert() {
        let high = BitField::new(FAN_MODE_INDEX, genmask(7, 4));
        assert_eq!(high.shift(), 4);
        assert_eq!(high.extract(0xA5), 0x0A);
        assert_eq!(high.insert(0xA5, 0x03), 0x35);
        assert_eq!(BATT_CHARGE_CTRL_VALUE.insert(0x80 | 60, 80), 0x80 | 80);
        assert!(FAN_CTRL_BOOST.is_set(0x40));
        assert!(!FAN_CTRL_BOOST.is_set(0xBF));
    }

    #[test]
    fn lightbar_levels_invert() {
        for (level, &raw) in LIGHTBAR_LEVELS.iter().enumerate() {
            assert_eq!(lightbar_level(raw), Some(level as u8));
        }
        assert_eq!(lightbar_level(5), None);
        assert_eq!(lightbar_level(255), None);
    }

    #[test]
    fn debug_register_names_are_unique() {
        let names: HashSet<_> = DEBUG_REGISTERS.iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), DEBUG_REGISTERS.len());
        assert_eq!(debug_register("fan_ctrl"), Some(FAN_CTRL));
        assert_eq!(debug_register("fan_min_speed"), Some(EcAddr::new(0x07, 0x9E)));
        assert_eq!(debug_register("nope"), None);
    }
}

//! Newline-delimited JSON spoken between `qc71ctl` and the daemon.

use serde::{Deserialize, Serialize};

use crate::adapters::debug::RegisterInfo;
use crate::adapters::events::HotkeyEvent;
use crate::adapters::lightbar::LightbarState;
use crate::adapters::platform::PlatformAttr;
use crate::core::ec::EcError;
use crate::core::fan::FanMode;

/// Sensor snapshot. `None` marks a sensor that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub fan_rpm: [Option<u16>; 2],
    pub fan_pwm: [Option<u8>; 2],
    /// Raw EC bytes, not calibrated.
    pub fan_temp: [Option<u8>; 2],
    pub fan_fault: Option<bool>,
    pub fan_mode: Option<FanMode>,
    pub battery_temp: Option<u8>,
    pub charge_end_threshold: Option<u8>,
    pub rfkill: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrValue {
    pub attr: PlatformAttr,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwmonReading {
    pub channel: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightbarSetting {
    Brightness(bool),
    BrightnessS3(bool),
    RainbowMode(bool),
    Color(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    GetStatus,
    GetFeatures,
    ListAttrs,
    GetAttr(PlatformAttr),
    SetAttr(PlatformAttr, bool),
    GetFanMode,
    /// Numeric so out-of-range values reach the daemon's validation.
    SetFanMode(i64),
    GetPwm(usize),
    SetPwm(usize, u8),
    GetHwmon,
    ReadHwmon(String),
    WriteHwmon(String, i64),
    GetChargeThreshold,
    SetChargeThreshold(i64),
    GetLightbar,
    SetLightbar(LightbarSetting),
    ListRegisters,
    ReadRegister(String),
    WriteRegister(String, i64),
    RecentEvents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Status(Status),
    Features(Vec<String>),
    Attrs(Vec<AttrValue>),
    Bool(bool),
    Number(i64),
    FanMode(FanMode),
    Hwmon(Vec<HwmonReading>),
    Lightbar(LightbarState),
    Registers(Vec<RegisterInfo>),
    Events(Vec<HotkeyEvent>),
    /// `errno` is negative, as a sysfs handler would return it.
    Error { errno: i32, message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            errno: -22,
            message: message.into(),
        }
    }
}

impl From<EcError> for Response {
    fn from(err: EcError) -> Self {
        Response::Error {
            errno: err.errno(),
            message: err.to_string(),
        }
    }
}

impl<T: Into<Response>> From<Result<T, EcError>> for Response {
    fn from(result: Result<T, EcError>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => err.into(),
        }
    }
}

impl From<()> for Response {
    fn from(_: ()) -> Self {
        Response::Ok
    }
}

impl From<bool> for Response {
    fn from(value: bool) -> Self {
        Response::Bool(value)
    }
}

impl From<u8> for Response {
    fn from(value: u8) -> Self {
        Response::Number(i64::from(value))
    }
}

impl From<FanMode> for Response {
    fn from(mode: FanMode) -> Self {
        Response::FanMode(mode)
    }
}

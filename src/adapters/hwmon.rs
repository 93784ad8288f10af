//! hwmon-style sensor channels.
//!
//! Channel names follow the sysfs hwmon ABI (`fan1_input`, `pwm1_enable`,
//! `temp3_label`, ...). Temperatures are raw EC bytes scaled to the ABI's
//! millidegrees the same way the kernel driver does it; nobody knows the
//! real calibration, so treat them as uncalibrated.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ec::{ByteRegisters, EcChannel, EcError};
use crate::core::fan::FanControl;
use crate::core::regs::BATT_TEMP;

pub const HWMON_NAME: &str = "qc71_laptop";

const TEMP_LABELS: [&str; 3] = ["fan1_temp", "fan2_temp", "battery"];
const BATTERY_TEMP_CHANNEL: usize = 2;

/// One hwmon attribute. Indices are zero based, names one based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    FanInput(usize),
    FanFault(usize),
    PwmEnable,
    Pwm(usize),
    TempInput(usize),
    TempLabel(usize),
}

impl Sensor {
    pub fn all() -> Vec<Sensor> {
        let mut all = Vec::new();
        for i in 0..2 {
            all.push(Sensor::FanInput(i));
            all.push(Sensor::FanFault(i));
        }
        all.push(Sensor::PwmEnable);
        all.extend((0..2).map(Sensor::Pwm));
        for i in 0..TEMP_LABELS.len() {
            all.push(Sensor::TempInput(i));
            all.push(Sensor::TempLabel(i));
        }
        all
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Sensor::PwmEnable | Sensor::Pwm(_))
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Sensor::FanInput(i) => write!(f, "fan{}_input", i + 1),
            Sensor::FanFault(i) => write!(f, "fan{}_fault", i + 1),
            Sensor::PwmEnable => f.write_str("pwm1_enable"),
            Sensor::Pwm(i) => write!(f, "pwm{}", i + 1),
            Sensor::TempInput(i) => write!(f, "temp{}_input", i + 1),
            Sensor::TempLabel(i) => write!(f, "temp{}_label", i + 1),
        }
    }
}

impl FromStr for Sensor {
    type Err = EcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || EcError::invalid(format!("unknown hwmon channel {s:?}"));

        if s == "pwm1_enable" {
            return Ok(Sensor::PwmEnable);
        }

        let (kind, attr) = match s.split_once('_') {
            Some((kind, attr)) => (kind, Some(attr)),
            None => (s, None),
        };
        let split = kind
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(unknown)?;
        let (prefix, number) = kind.split_at(split);
        let index = number
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(unknown)?;

        match (prefix, attr) {
            ("fan", Some("input")) => Ok(Sensor::FanInput(index)),
            ("fan", Some("fault")) => Ok(Sensor::FanFault(index)),
            ("pwm", None) => Ok(Sensor::Pwm(index)),
            ("temp", Some("input")) => Ok(Sensor::TempInput(index)),
            ("temp", Some("label")) => Ok(Sensor::TempLabel(index)),
            _ => Err(unknown()),
        }
    }
}

/// Value of a channel: a number, or a label for `temp*_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(i64),
    Label(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{n}"),
            SensorValue::Label(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hwmon {
    fan: Arc<FanControl>,
    ec: Arc<EcChannel>,
}

impl Hwmon {
    pub fn new(fan: Arc<FanControl>, ec: Arc<EcChannel>) -> Self {
        Self { fan, ec }
    }

    pub fn read(&self, sensor: Sensor) -> Result<SensorValue, EcError> {
        let number = match sensor {
            Sensor::FanInput(i) => i64::from(self.fan.rpm(i)?),
            Sensor::FanFault(i) => {
                check_fan(i)?;
                i64::from(self.fan.fault()?)
            }
            Sensor::PwmEnable => i64::from(self.fan.mode()?.as_index()),
            Sensor::Pwm(i) => i64::from(self.fan.pwm(i)?),
            Sensor::TempInput(BATTERY_TEMP_CHANNEL) => {
                i64::from(self.ec.read_byte(BATT_TEMP)?) * 100
            }
            Sensor::TempInput(i) if i < BATTERY_TEMP_CHANNEL => {
                i64::from(self.fan.temperature(i)?) * 1000
            }
            Sensor::TempLabel(i) => {
                return TEMP_LABELS
                    .get(i)
                    .map(|label| SensorValue::Label(label.to_string()))
                    .ok_or(EcError::Unsupported("hwmon channel"));
            }
            Sensor::TempInput(_) => return Err(EcError::Unsupported("hwmon channel")),
        };
        Ok(SensorValue::Number(number))
    }

    pub fn write(&self, sensor: Sensor, value: i64) -> Result<(), EcError> {
        match sensor {
            Sensor::PwmEnable => self.fan.set_mode_value(value),
            Sensor::Pwm(i) => {
                let value = u8::try_from(value)
                    .map_err(|_| EcError::invalid(format!("pwm value {value}")))?;
                self.fan.set_pwm(i, value)
            }
            _ => Err(EcError::Unsupported("read-only hwmon channel")),
        }
    }

    /// Every readable channel with its value; failing channels are left out,
    /// the way hwmon readers see an unavailable sensor.
    pub fn snapshot(&self) -> Vec<(Sensor, SensorValue)> {
        Sensor::all()
            .into_iter()
            .filter_map(|sensor| self.read(sensor).ok().map(|value| (sensor, value)))
            .collect()
    }
}

fn check_fan(index: usize) -> Result<(), EcError> {
    if index < 2 {
        Ok(())
    } else {
        Err(EcError::invalid(format!("fan index {index}")))
    }
}

//! Fan control.
//!
//! The fan mode is never stored: every query derives it from CTRL_1 and
//! FAN_CTRL, and every transition is a short sequence of register writes.
//! Composite operations run under the fan lock so that two transitions never
//! interleave their transactions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ec::{ByteRegisters, EcChannel, EcError, Transact};
use super::lock::{Gate, Interrupt};
use super::regs::{
    EcAddr, CTRL_1_FAN_ABNORMAL, CTRL_1_MANUAL_MODE, FAN_CTRL, FAN_CTRL_AUTO, FAN_CTRL_AUTO_HIGH,
    FAN_CTRL_BOOST, FAN_MAX_PWM, FAN_PWM_ADDRS, FAN_RPM_ADDRS, FAN_TEMP_ADDRS,
};

/// Public PWM range is `0..=PWM_PUBLIC_MAX`.
pub const PWM_PUBLIC_MAX: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanMode {
    /// Boost at full PWM; the EC does not regulate the fan.
    Disengaged = 0,
    Manual = 1,
    Automatic = 2,
}

impl FanMode {
    pub fn as_index(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for FanMode {
    type Error = EcError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FanMode::Disengaged),
            1 => Ok(FanMode::Manual),
            2 => Ok(FanMode::Automatic),
            other => Err(EcError::invalid(format!("fan mode {other}"))),
        }
    }
}

impl std::fmt::Display for FanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FanMode::Disengaged => "disengaged",
            FanMode::Manual => "manual",
            FanMode::Automatic => "automatic",
        };
        f.write_str(name)
    }
}

/// Raw EC PWM (`0..=FAN_MAX_PWM`) to the public scale, rounded to nearest.
pub fn pwm_to_public(raw: u8) -> u8 {
    let max = u32::from(FAN_MAX_PWM);
    let value = (u32::from(raw) * u32::from(PWM_PUBLIC_MAX) + max / 2) / max;
    value.min(u32::from(PWM_PUBLIC_MAX)) as u8
}

/// Public PWM to the raw EC scale, rounded to nearest.
pub fn pwm_from_public(value: u8) -> u8 {
    let public_max = u32::from(PWM_PUBLIC_MAX);
    ((u32::from(value) * u32::from(FAN_MAX_PWM) + public_max / 2) / public_max) as u8
}

fn fan_addr(table: &[EcAddr; 2], index: usize) -> Result<EcAddr, EcError> {
    table
        .get(index)
        .copied()
        .ok_or_else(|| EcError::invalid(format!("fan index {index}")))
}

/// Fan operations over a shared EC channel.
#[derive(Debug)]
pub struct FanControl {
    ec: Arc<EcChannel>,
    lock: Gate,
    fan_boost: bool,
}

impl FanControl {
    /// `fan_boost` comes from feature detection; without it only automatic
    /// mode can be selected.
    pub fn new(ec: Arc<EcChannel>, fan_boost: bool, interrupt: &Interrupt) -> Self {
        Self {
            ec,
            lock: Gate::new("fan", interrupt),
            fan_boost,
        }
    }

    pub fn has_boost(&self) -> bool {
        self.fan_boost
    }

    pub fn count(&self) -> usize {
        FAN_RPM_ADDRS.len()
    }

    /// Fan speed in RPM, stored big-endian across the first two bytes.
    pub fn rpm(&self, index: usize) -> Result<u16, EcError> {
        let addr = fan_addr(&FAN_RPM_ADDRS, index)?;
        let result = self.ec.read(addr)?;
        Ok(u16::from(result.b1()) << 8 | u16::from(result.b2()))
    }

    /// Raw, uncalibrated temperature byte of the sensor next to fan `index`.
    pub fn temperature(&self, index: usize) -> Result<u8, EcError> {
        let addr = fan_addr(&FAN_TEMP_ADDRS, index)?;
        self.ec.read_byte(addr)
    }

    pub fn fault(&self) -> Result<bool, EcError> {
        self.ec.read_flag(CTRL_1_FAN_ABNORMAL)
    }

    /// PWM of fan `index` on the EC's own `0..=FAN_MAX_PWM` scale.
    pub fn raw_pwm(&self, index: usize) -> Result<u8, EcError> {
        let addr = fan_addr(&FAN_PWM_ADDRS, index)?;
        self.ec.read_byte(addr)
    }

    pub fn pwm(&self, index: usize) -> Result<u8, EcError> {
        self.raw_pwm(index).map(pwm_to_public)
    }

    pub fn set_pwm(&self, index: usize, value: u8) -> Result<(), EcError> {
        let addr = fan_addr(&FAN_PWM_ADDRS, index)?;
        if !self.fan_boost {
            return Err(EcError::Unsupported("fan boost"));
        }
        self.ec.write_byte(addr, pwm_from_public(value))
    }

    pub fn mode(&self) -> Result<FanMode, EcError> {
        let _guard = self.lock.lock()?;

        if !self.ec.read_flag(CTRL_1_MANUAL_MODE)? {
            return Ok(FanMode::Automatic);
        }

        let fan_ctrl = self.ec.read_byte(FAN_CTRL)?;
        if FAN_CTRL_BOOST.is_set(fan_ctrl) {
            let pwm = self.raw_pwm(0)?;
            if pwm == FAN_MAX_PWM {
                Ok(FanMode::Disengaged)
            } else {
                Ok(FanMode::Manual)
            }
        } else if FAN_CTRL_AUTO.is_set(fan_ctrl) {
            Ok(FanMode::Automatic)
        } else {
            Ok(FanMode::Manual)
        }
    }

    /// Numeric entry point used by attribute-style callers.
    pub fn set_mode_value(&self, value: i64) -> Result<(), EcError> {
        self.set_mode(FanMode::try_from(value)?)
    }

    pub fn set_mode(&self, mode: FanMode) -> Result<(), EcError> {
        if mode != FanMode::Automatic && !self.fan_boost {
            return Err(EcError::Unsupported("fan boost"));
        }

        let _guard = self.lock.lock()?;
        debug!(%mode, "setting fan mode");

        match mode {
            FanMode::Disengaged => {
                self.ec.write_byte(FAN_CTRL, FAN_CTRL_BOOST.mask)?;
                self.ec.write_byte(FAN_PWM_ADDRS[0], FAN_MAX_PWM)
            }
            FanMode::Manual => {
                let pwm = self.raw_pwm(0)?;
                self.ec.write_byte(FAN_CTRL, FAN_CTRL_BOOST.mask)?;

                if let Err(err) = self.ec.write_byte(FAN_PWM_ADDRS[0], pwm) {
                    warn!("restoring fan PWM failed, handing control back to the EC: {err}");
                    if let Err(fallback) = self.write_automatic() {
                        warn!("re-enabling automatic fan control failed: {fallback}");
                    }
                    return Err(err);
                }
                Ok(())
            }
            FanMode::Automatic => self.write_automatic(),
        }
    }

    fn write_automatic(&self) -> Result<(), EcError> {
        self.ec
            .write_byte(FAN_CTRL, FAN_CTRL_AUTO_HIGH | FAN_CTRL_AUTO.mask)
    }
}

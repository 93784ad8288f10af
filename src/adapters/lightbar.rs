//! The `qc71_laptop::lightbar` LED: on/off in S0 and S3, rainbow mode and
//! a ten-level colour per channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ec::{set_bit, ByteRegisters, EcChannel, EcError};
use crate::core::regs::{
    lightbar_level, BitField, LIGHTBAR_COLOR_ADDRS, LIGHTBAR_CTRL, LIGHTBAR_CTRL_RAINBOW,
    LIGHTBAR_CTRL_S0_OFF, LIGHTBAR_CTRL_S3_OFF, LIGHTBAR_LEVELS,
};

pub const LED_NAME: &str = "qc71_laptop::lightbar";

/// Largest value accepted by [`Lightbar::set_color`].
pub const COLOR_MAX: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightbarChannel {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl LightbarChannel {
    pub const ALL: [LightbarChannel; 3] = [
        LightbarChannel::Red,
        LightbarChannel::Green,
        LightbarChannel::Blue,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightbarState {
    pub brightness: bool,
    pub brightness_s3: bool,
    pub rainbow_mode: bool,
    pub color: u16,
}

#[derive(Debug, Clone)]
pub struct Lightbar {
    ec: Arc<EcChannel>,
}

impl Lightbar {
    pub fn new(ec: Arc<EcChannel>) -> Self {
        Self { ec }
    }

    pub fn brightness(&self) -> Result<bool, EcError> {
        Ok(!self.ec.read_flag(LIGHTBAR_CTRL_S0_OFF)?)
    }

    pub fn set_brightness(&self, on: bool) -> Result<(), EcError> {
        self.switch(LIGHTBAR_CTRL_S0_OFF, on)
    }

    /// Whether the lightbar stays lit while suspended.
    pub fn brightness_s3(&self) -> Result<bool, EcError> {
        Ok(!self.ec.read_flag(LIGHTBAR_CTRL_S3_OFF)?)
    }

    pub fn set_brightness_s3(&self, on: bool) -> Result<(), EcError> {
        self.switch(LIGHTBAR_CTRL_S3_OFF, on)
    }

    pub fn rainbow_mode(&self) -> Result<bool, EcError> {
        self.ec.read_flag(LIGHTBAR_CTRL_RAINBOW)
    }

    pub fn set_rainbow_mode(&self, on: bool) -> Result<(), EcError> {
        self.ec.write_flag(LIGHTBAR_CTRL_RAINBOW, on)
    }

    /// Turn one of the two power-state "off" bits on or off; the bits are
    /// active low so `on` clears them.
    pub fn switch(&self, field: BitField, on: bool) -> Result<(), EcError> {
        if field != LIGHTBAR_CTRL_S0_OFF && field != LIGHTBAR_CTRL_S3_OFF {
            return Err(EcError::invalid(format!(
                "lightbar switch mask {:#04x}",
                field.mask
            )));
        }
        let ctrl = self.ec.read_byte(LIGHTBAR_CTRL)?;
        self.ec.write_byte(LIGHTBAR_CTRL, set_bit(ctrl, field.mask, !on))
    }

    /// Channel level `0..=9`; raw values off the level table read as 0.
    pub fn color_level(&self, channel: LightbarChannel) -> Result<u8, EcError> {
        let raw = self.ec.read_byte(LIGHTBAR_COLOR_ADDRS[channel as usize])?;
        Ok(lightbar_level(raw).unwrap_or(0))
    }

    pub fn set_color_level(&self, channel: LightbarChannel, level: u8) -> Result<(), EcError> {
        let raw = LIGHTBAR_LEVELS
            .get(usize::from(level))
            .copied()
            .ok_or_else(|| EcError::invalid(format!("lightbar level {level}")))?;
        self.ec.write_byte(LIGHTBAR_COLOR_ADDRS[channel as usize], raw)
    }

    /// Colour as three decimal digits `RGB`, one level per channel.
    pub fn color(&self) -> Result<u16, EcError> {
        LightbarChannel::ALL
            .into_iter()
            .try_fold(0u16, |color, channel| -> Result<u16, EcError> {
                Ok(color * 10 + u16::from(self.color_level(channel)?))
            })
    }

    /// Inverse of [`Lightbar::color`]. Channels are written blue first; the
    /// first failure stops the sequence.
    pub fn set_color(&self, color: u32) -> Result<(), EcError> {
        if color > COLOR_MAX {
            return Err(EcError::invalid(format!("lightbar color {color}")));
        }

        let mut rest = color;
        for channel in LightbarChannel::ALL.into_iter().rev() {
            self.set_color_level(channel, (rest % 10) as u8)?;
            rest /= 10;
        }
        Ok(())
    }

    pub fn state(&self) -> Result<LightbarState, EcError> {
        Ok(LightbarState {
            brightness: self.brightness()?,
            brightness_s3: self.brightness_s3()?,
            rainbow_mode: self.rainbow_mode()?,
            color: self.color()?,
        })
    }
}

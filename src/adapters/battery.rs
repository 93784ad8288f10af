//! Battery charge limit (`charge_control_end_threshold` of BAT0).

use std::sync::Arc;

use crate::core::ec::{ByteRegisters, EcChannel, EcError};
use crate::core::regs::BATT_CHARGE_CTRL_VALUE;

/// The EC stores "no limit" as 0.
const NO_LIMIT: u8 = 0;

#[derive(Debug, Clone)]
pub struct Battery {
    ec: Arc<EcChannel>,
}

impl Battery {
    pub fn new(ec: Arc<EcChannel>) -> Self {
        Self { ec }
    }

    /// Charge stops at this percentage; 100 means no limit.
    pub fn charge_end_threshold(&self) -> Result<u8, EcError> {
        let value = self.ec.read_field(BATT_CHARGE_CTRL_VALUE)?;
        Ok(if value == NO_LIMIT { 100 } else { value })
    }

    /// Accepts `1..=100`. The upper bits of the control register are kept.
    pub fn set_charge_end_threshold(&self, percent: i64) -> Result<(), EcError> {
        let value = match percent {
            100 => NO_LIMIT,
            1..=99 => percent as u8,
            _ => return Err(EcError::invalid(format!("charge threshold {percent}"))),
        };
        self.ec.write_field(BATT_CHARGE_CTRL_VALUE, value)
    }
}

//! Raw access to the named debug registers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ec::{ByteRegisters, EcChannel, EcError};
use crate::core::regs::{debug_register, EcAddr, DEBUG_REGISTERS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    pub name: String,
    pub addr: EcAddr,
}

#[derive(Debug, Clone)]
pub struct DebugRegisters {
    ec: Arc<EcChannel>,
}

impl DebugRegisters {
    pub fn new(ec: Arc<EcChannel>) -> Self {
        Self { ec }
    }

    pub fn list(&self) -> Vec<RegisterInfo> {
        DEBUG_REGISTERS
            .iter()
            .map(|&(name, addr)| RegisterInfo {
                name: name.to_string(),
                addr,
            })
            .collect()
    }

    pub fn read(&self, name: &str) -> Result<u8, EcError> {
        self.ec.read_byte(lookup(name)?)
    }

    pub fn write(&self, name: &str, value: i64) -> Result<(), EcError> {
        let addr = lookup(name)?;
        let value =
            u8::try_from(value).map_err(|_| EcError::invalid(format!("register value {value}")))?;
        self.ec.write_byte(addr, value)
    }
}

fn lookup(name: &str) -> Result<EcAddr, EcError> {
    debug_register(name).ok_or_else(|| EcError::invalid(format!("unknown register {name:?}")))
}

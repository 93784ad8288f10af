//! EC transaction channel.
//!
//! Every EC access is one evaluation of the WMBC method with an 8-byte
//! request:
//!
//! ```text
//!   0      1      2      3      4     5       6     7
//! +------+------+------+------+-----+-------+-----+-----+
//! | addr (LE)   | data (LE)   |  0  | read? |  0  |  0  |
//! +------+------+------+------+-----+-------+-----+-----+
//! ```
//!
//! The firmware answers with a buffer (40 bytes on the machines seen so far)
//! of which only the first four bytes carry anything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::lock::{Gate, Interrupt, Interrupted};
use super::regs::{BitField, EcAddr};
use super::wmi::{AcpiObject, WmiBus, WmiError, WMBC_GETSETULONG_ID, WMBC_GUID, WMBC_INSTANCE};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during EC operations.
#[derive(Debug, Error)]
pub enum EcError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("EC I/O error: {0}")]
    Io(#[from] WmiError),

    #[error("EC returned no usable data")]
    NoData,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

impl EcError {
    /// Matching negative errno, as a sysfs handler would return it.
    pub fn errno(&self) -> i32 {
        match self {
            EcError::Interrupted(_) => -4,     // EINTR
            EcError::Io(_) => -5,              // EIO
            EcError::NoData => -61,            // ENODATA
            EcError::InvalidArgument(_) => -22, // EINVAL
            EcError::Unsupported(_) => -95,    // EOPNOTSUPP
        }
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        EcError::InvalidArgument(what.into())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// One EC request as sent to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcRequest {
    pub addr: EcAddr,
    pub data: u16,
    pub read: bool,
}

impl EcRequest {
    pub const LEN: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [a0, a1] = self.addr.raw().to_le_bytes();
        let [d0, d1] = self.data.to_le_bytes();
        [a0, a1, d0, d1, 0, u8::from(self.read), 0, 0]
    }

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            addr: EcAddr::from_raw(u16::from_le_bytes([bytes[0], bytes[1]])),
            data: u16::from_le_bytes([bytes[2], bytes[3]]),
            read: bytes[5] != 0,
        }
    }
}

/// First four bytes of the firmware's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EcResult([u8; 4]);

impl EcResult {
    pub const LEN: usize = 4;

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Takes a fixed-size prefix; `None` if the buffer is too short.
    pub fn from_response(buf: &[u8]) -> Option<Self> {
        let head: [u8; 4] = buf.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(head))
    }

    pub fn bytes(self) -> [u8; 4] {
        self.0
    }

    pub fn b1(self) -> u8 {
        self.0[0]
    }

    pub fn b2(self) -> u8 {
        self.0[1]
    }

    pub fn b3(self) -> u8 {
        self.0[2]
    }

    pub fn b4(self) -> u8 {
        self.0[3]
    }

    pub fn w1(self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    pub fn w2(self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    pub fn dword(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

// ---------------------------------------------------------------------------
// Accessor traits
// ---------------------------------------------------------------------------

/// Raw EC transaction.
pub trait Transact {
    /// Run one transaction. `Ok(Some(_))` only when `want_result` is set.
    fn transaction(
        &self,
        addr: EcAddr,
        data: u16,
        want_result: bool,
        read: bool,
    ) -> Result<Option<EcResult>, EcError>;

    fn read(&self, addr: EcAddr) -> Result<EcResult, EcError> {
        self.transaction(addr, 0, true, true)?
            .ok_or(EcError::NoData)
    }

    fn write(&self, addr: EcAddr, data: u16) -> Result<(), EcError> {
        self.transaction(addr, data, false, false).map(|_| ())
    }
}

/// `value` with `mask` set or cleared.
pub const fn set_bit(value: u8, mask: u8, on: bool) -> u8 {
    if on {
        value | mask
    } else {
        value & !mask
    }
}

/// Byte-wide helpers on top of [`Transact`].
///
/// `update_bit` and `write_field` are plain read-modify-write sequences:
/// two of them racing on the same register can lose one of the updates.
pub trait ByteRegisters: Transact {
    fn read_byte(&self, addr: EcAddr) -> Result<u8, EcError> {
        let result = self.read(addr)?;
        debug!(
            %addr,
            "read byte: {:#04x} {:#04x} {:#04x} {:#04x}",
            result.b1(),
            result.b2(),
            result.b3(),
            result.b4()
        );
        Ok(result.b1())
    }

    fn write_byte(&self, addr: EcAddr, value: u8) -> Result<(), EcError> {
        self.write(addr, u16::from(value))
    }

    fn update_bit(&self, addr: EcAddr, mask: u8, on: bool) -> Result<(), EcError> {
        let value = self.read_byte(addr)?;
        self.write_byte(addr, set_bit(value, mask, on))
    }

    fn read_flag(&self, field: BitField) -> Result<bool, EcError> {
        Ok(field.is_set(self.read_byte(field.addr)?))
    }

    fn write_flag(&self, field: BitField, on: bool) -> Result<(), EcError> {
        self.update_bit(field.addr, field.mask, on)
    }

    fn read_field(&self, field: BitField) -> Result<u8, EcError> {
        Ok(field.extract(self.read_byte(field.addr)?))
    }

    fn write_field(&self, field: BitField, value: u8) -> Result<(), EcError> {
        let register = self.read_byte(field.addr)?;
        self.write_byte(field.addr, field.insert(register, value))
    }
}

impl<T: Transact + ?Sized> ByteRegisters for T {}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// How the EC lock is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockDiscipline {
    /// Every transaction is exclusive.
    #[default]
    Exclusive,
    /// Reads share the lock, writes are exclusive.
    SharedReads,
}

/// Handle for communicating with the EC.
pub struct EcChannel {
    wmi: Arc<dyn WmiBus>,
    lock: Gate,
    discipline: LockDiscipline,
}

impl EcChannel {
    pub fn new(wmi: Arc<dyn WmiBus>, discipline: LockDiscipline, interrupt: &Interrupt) -> Self {
        Self {
            wmi,
            lock: Gate::new("ec", interrupt),
            discipline,
        }
    }

    pub fn wmi(&self) -> &Arc<dyn WmiBus> {
        &self.wmi
    }

    pub fn discipline(&self) -> LockDiscipline {
        self.discipline
    }

    fn evaluate(&self, request: EcRequest) -> Result<Option<AcpiObject>, EcError> {
        let _guard = match (self.discipline, request.read) {
            (LockDiscipline::SharedReads, true) => self.lock.lock_shared()?,
            _ => self.lock.lock()?,
        };

        let output = self.wmi.evaluate_method(
            WMBC_GUID,
            WMBC_INSTANCE,
            WMBC_GETSETULONG_ID,
            &request.to_bytes(),
        )?;
        Ok(output)
    }
}

impl Transact for EcChannel {
    fn transaction(
        &self,
        addr: EcAddr,
        data: u16,
        want_result: bool,
        read: bool,
    ) -> Result<Option<EcResult>, EcError> {
        let request = EcRequest { addr, data, read };

        // the lock is released before the response is looked at
        let result = self.evaluate(request).and_then(|output| {
            if !want_result {
                return Ok(None);
            }
            match output {
                Some(AcpiObject::Buffer(buf)) => {
                    EcResult::from_response(&buf).map(Some).ok_or(EcError::NoData)
                }
                _ => Err(EcError::NoData),
            }
        });

        debug!(
            %addr,
            data = format_args!("{data:#06x}"),
            want_result,
            read,
            "ec transaction: {result:?}"
        );

        result
    }
}

impl std::fmt::Debug for EcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcChannel")
            .field("discipline", &self.discipline)
            .finish_non_exhaustive()
    }
}

//! The narrow slice of the ACPI-WMI interface this crate needs: evaluate one
//! method of one GUID-scoped block, and fetch the data attached to a WMI
//! notification.

use std::io;

use thiserror::Error;

/// `AcpiTest_MULong` block; method [`WMBC_GETSETULONG_ID`] is the EC gateway.
pub const WMBC_GUID: &str = "ABBC0F6F-8EA1-11D1-00A0-C90629100000";
pub const WMBC_GETSETULONG_ID: u32 = 4;
pub const WMBC_INSTANCE: u8 = 0;

/// `AcpiTest_EventULong`
pub const EVENT0_GUID: &str = "ABBC0F72-8EA1-11D1-00A0-C90629100000";
/// `AcpiTest_EventString`
pub const EVENT1_GUID: &str = "ABBC0F71-8EA1-11D1-00A0-C90629100000";
/// `AcpiTest_EventPackage`
pub const EVENT2_GUID: &str = "ABBC0F70-8EA1-11D1-00A0-C90629100000";

/// Decoded ACPI object returned by a method evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcpiObject {
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<AcpiObject>),
}

#[derive(Debug, Error)]
pub enum WmiError {
    #[error("WMI block {0} not present")]
    GuidNotFound(String),

    #[error("evaluating {method} failed: {status}")]
    Acpi { method: String, status: String },

    #[error("acpi_call I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected acpi_call output: {0:?}")]
    Parse(String),

    #[error("cannot load kernel module {module}: {reason}")]
    Module { module: &'static str, reason: String },

    #[error("operation not provided by this WMI backend")]
    Unsupported,
}

/// Firmware management interface used by the EC channel.
///
/// Implementations must be callable from several threads; the EC channel
/// provides its own serialization on top.
pub trait WmiBus: Send + Sync {
    fn has_guid(&self, guid: &str) -> bool;

    /// Evaluate `method_id` of `guid`/`instance` with `input` as the buffer
    /// argument. `Ok(None)` means the method returned nothing.
    fn evaluate_method(
        &self,
        guid: &str,
        instance: u8,
        method_id: u32,
        input: &[u8],
    ) -> Result<Option<AcpiObject>, WmiError>;

    /// Data attached to notification `notify_id` (`_WED`).
    fn event_data(&self, notify_id: u32) -> Result<Option<AcpiObject>, WmiError> {
        let _ = notify_id;
        Err(WmiError::Unsupported)
    }
}

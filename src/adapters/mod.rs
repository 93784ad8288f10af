//! Attribute-shaped views of the EC.
//!
//! Each adapter is a thin layer over the byte accessors or the fan state
//! machine. Visibility follows the probed [`Features`](crate::core::features::Features);
//! an adapter that is not built simply isn't there, and the platform
//! attributes answer [`EcError::Unsupported`] for the ones that are hidden.

use crate::core::ec::EcError;

pub mod battery;
pub mod debug;
pub mod events;
pub mod hwmon;
pub mod input;
pub mod lightbar;
pub mod platform;

/// Boolean parsing with the kernel's `kstrtobool` rules: `1 y t` and `on`
/// are true, `0 n f` and `off` are false, case-insensitive, only the first
/// one or two characters count.
pub fn parse_bool(input: &str) -> Result<bool, EcError> {
    let bytes = input.trim().as_bytes();
    let invalid = || EcError::invalid(format!("boolean {input:?}"));

    match bytes.first().map(u8::to_ascii_lowercase) {
        Some(b'1' | b'y' | b't') => Ok(true),
        Some(b'0' | b'n' | b'f') => Ok(false),
        Some(b'o') => match bytes.get(1).map(u8::to_ascii_lowercase) {
            Some(b'n') => Ok(true),
            Some(b'f') => Ok(false),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kstrtobool_rules() {
        for s in ["1", "y", "Yes", "true", "T", "on", "ON\n"] {
            assert!(parse_bool(s).unwrap(), "{s}");
        }
        for s in ["0", "n", "No", "false", "F", "off", "Off"] {
            assert!(!parse_bool(s).unwrap(), "{s}");
        }
        for s in ["", "o", "2", "maybe", "oz"] {
            assert!(matches!(parse_bool(s), Err(EcError::InvalidArgument(_))), "{s}");
        }
    }
}

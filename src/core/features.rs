//! One-time capability probe.
//!
//! Two independent sources: the SUPPORT_1 byte of the EC, and the DMI
//! tables (machine match, BIOS version and OEM string 18). Neither probe is
//! fatal; a failure is logged and the corresponding features stay off.

use std::fs;
use std::path::PathBuf;

use bitflags::bitflags;
use thiserror::Error;
use tracing::{info, warn};

use super::ec::{ByteRegisters, EcError, Transact};
use super::regs::{
    SUPPORT_1, SUPPORT_1_FAN_BOOST, SUPPORT_1_LIGHTBAR, SUPPORT_1_SUPER_KEY_LOCK,
};

bitflags! {
    /// What this particular machine supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u16 {
        const SUPER_KEY_LOCK    = 1 << 0;
        const LIGHTBAR          = 1 << 1;
        const FAN_BOOST         = 1 << 2;
        const FN_LOCK           = 1 << 3;
        const BATT_CHARGE_LIMIT = 1 << 4;
        const FAN_EXTRAS        = 1 << 5;
        const SILENT_MODE       = 1 << 6;
        const TURBO_MODE        = 1 << 7;
        const KBD_BACKLIGHT_RGB = 1 << 8;
    }
}

const FEATURE_NAMES: &[(&str, Features)] = &[
    ("super-key-lock", Features::SUPER_KEY_LOCK),
    ("lightbar", Features::LIGHTBAR),
    ("fan-boost", Features::FAN_BOOST),
    ("fn-lock", Features::FN_LOCK),
    ("battery-charge-limit", Features::BATT_CHARGE_LIMIT),
    ("fan-extras", Features::FAN_EXTRAS),
    ("silent-mode", Features::SILENT_MODE),
    ("turbo-mode", Features::TURBO_MODE),
    ("rgb-keyboard", Features::KBD_BACKLIGHT_RGB),
];

impl Features {
    /// Decode the capability bits of the SUPPORT_1 register.
    pub fn from_support_1(value: u8) -> Self {
        let mut features = Features::empty();
        features.set(
            Features::SUPER_KEY_LOCK,
            value & SUPPORT_1_SUPER_KEY_LOCK != 0,
        );
        features.set(Features::LIGHTBAR, value & SUPPORT_1_LIGHTBAR != 0);
        features.set(Features::FAN_BOOST, value & SUPPORT_1_FAN_BOOST != 0);
        features
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FEATURE_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, flag)| flag)
    }

    /// Names of all set flags, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        FEATURE_NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|&(name, _)| name)
            .collect()
    }

    pub fn all_names() -> impl Iterator<Item = &'static str> {
        FEATURE_NAMES.iter().map(|&(name, _)| name)
    }
}

impl std::fmt::Display for Features {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// DMI
// ---------------------------------------------------------------------------

/// BIOS build from which OEM string 18 carries the extra feature flag.
pub const OEM_FEATURES_MIN_BIOS: u32 = 114;
/// Zero-based index of the OEM string holding the flag.
pub const OEM_FEATURES_STRING: usize = 18;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no DMI match")]
    NoMatch,

    #[error("DMI field {0} not available")]
    MissingField(&'static str),

    #[error("cannot parse BIOS version {0:?}")]
    BadVersion(String),

    #[error("OEM string {0} not present")]
    NoOemString(usize),
}

/// Source of DMI (SMBIOS) information.
pub trait DmiInfo {
    fn board_name(&self) -> Option<String>;
    fn chassis_vendor(&self) -> Option<String>;
    fn product_name(&self) -> Option<String>;
    fn bios_version(&self) -> Option<String>;
    /// OEM string `index` (zero based) from the type 11 structures.
    fn oem_string(&self, index: usize) -> Option<String>;
}

/// [`DmiInfo`] backed by `/sys/class/dmi/id` and `/sys/firmware/dmi/entries`.
#[derive(Debug, Clone)]
pub struct SysfsDmi {
    id_dir: PathBuf,
    entries_dir: PathBuf,
}

impl Default for SysfsDmi {
    fn default() -> Self {
        Self {
            id_dir: PathBuf::from("/sys/class/dmi/id"),
            entries_dir: PathBuf::from("/sys/firmware/dmi/entries"),
        }
    }
}

impl SysfsDmi {
    pub fn with_root(id_dir: impl Into<PathBuf>, entries_dir: impl Into<PathBuf>) -> Self {
        Self {
            id_dir: id_dir.into(),
            entries_dir: entries_dir.into(),
        }
    }

    fn field(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.id_dir.join(name))
            .ok()
            .map(|s| s.trim_end_matches('\n').to_string())
    }
}

impl DmiInfo for SysfsDmi {
    fn board_name(&self) -> Option<String> {
        self.field("board_name")
    }

    fn chassis_vendor(&self) -> Option<String> {
        self.field("chassis_vendor")
    }

    fn product_name(&self) -> Option<String> {
        self.field("product_name")
    }

    fn bios_version(&self) -> Option<String> {
        self.field("bios_version")
    }

    fn oem_string(&self, index: usize) -> Option<String> {
        // 11-0, 11-1, ... until one is missing
        (0..)
            .map(|n| self.entries_dir.join(format!("11-{n}")).join("raw"))
            .map_while(|path| fs::read(path).ok())
            .find_map(|raw| oem_string_from_raw(&raw, index))
    }
}

/// Extract OEM string `index` from a raw SMBIOS type 11 structure.
///
/// The walk stops early at the end of the string set, so a structure that
/// declares the string but ends before it yields an empty string.
pub fn oem_string_from_raw(raw: &[u8], index: usize) -> Option<String> {
    let (&kind, &length) = (raw.first()?, raw.get(1)?);
    if kind != 11 || length < 5 {
        return None;
    }

    let count = usize::from(*raw.get(4)?);
    if index >= count {
        return None;
    }

    let mut strings = raw.get(usize::from(length)..)?;
    let mut skipped = 0;
    while skipped < index && strings.first().is_some_and(|&b| b != 0) {
        let end = strings.iter().position(|&b| b == 0)?;
        strings = &strings[end + 1..];
        skipped += 1;
    }

    let end = strings.iter().position(|&b| b == 0).unwrap_or(strings.len());
    Some(String::from_utf8_lossy(&strings[..end]).into_owned())
}

/// `QCCFL357.0062.2020.0313.1530` -> `62`
pub fn parse_bios_version(version: &str) -> Result<u32, ProbeError> {
    let bad = || ProbeError::BadVersion(version.to_string());

    let mut parts = version.splitn(3, '.');
    let _prefix = parts.next();
    let build = parts.next().ok_or_else(bad)?;
    if parts.next().is_none() {
        return Err(bad());
    }

    if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    build.parse().map_err(|_| bad())
}

struct DmiMatch {
    board_name: Option<&'static str>,
    chassis_vendor: Option<&'static str>,
    product_name: Option<&'static str>,
    extra: Features,
}

const SLIMBOOK_EXTRA: Features = Features::FN_LOCK.union(Features::SILENT_MODE);

const DMI_TABLE: &[DmiMatch] = &[
    DmiMatch {
        board_name: Some("LAPQC71"),
        chassis_vendor: None,
        product_name: None,
        extra: Features::empty(),
    },
    DmiMatch {
        board_name: None,
        chassis_vendor: Some("Avell High Performance"),
        product_name: Some("A60 MUV"),
        extra: Features::empty(),
    },
    DmiMatch {
        board_name: None,
        chassis_vendor: None,
        product_name: Some("PROX-AMD"),
        extra: SLIMBOOK_EXTRA,
    },
    DmiMatch {
        board_name: None,
        chassis_vendor: None,
        product_name: Some("PROX15-AMD"),
        extra: SLIMBOOK_EXTRA,
    },
    DmiMatch {
        board_name: None,
        chassis_vendor: None,
        product_name: Some("PROX-AMD5"),
        extra: SLIMBOOK_EXTRA,
    },
    DmiMatch {
        board_name: None,
        chassis_vendor: None,
        product_name: Some("PROX15-AMD5"),
        extra: SLIMBOOK_EXTRA,
    },
];

impl DmiMatch {
    fn matches(&self, dmi: &dyn DmiInfo) -> bool {
        // board name is a substring match, the others are exact
        let board = self
            .board_name
            .map_or(true, |want| dmi.board_name().is_some_and(|b| b.contains(want)));
        let vendor = self
            .chassis_vendor
            .map_or(true, |want| dmi.chassis_vendor().as_deref() == Some(want));
        let product = self
            .product_name
            .map_or(true, |want| dmi.product_name().as_deref() == Some(want));
        board && vendor && product
    }
}

/// Whether the machine is one of the known QC71 models at all.
pub fn dmi_matches(dmi: &dyn DmiInfo) -> bool {
    DMI_TABLE.iter().any(|entry| entry.matches(dmi))
}

fn probe_dmi(dmi: &dyn DmiInfo) -> Result<Features, ProbeError> {
    let mut features = Features::empty();

    let mut matched = false;
    for entry in DMI_TABLE.iter().filter(|entry| entry.matches(dmi)) {
        matched = true;
        features |= entry.extra;
    }
    if !matched {
        return Err(ProbeError::NoMatch);
    }

    let version_str = dmi
        .bios_version()
        .ok_or(ProbeError::MissingField("bios_version"))?;
    info!("BIOS version string: '{version_str}'");

    let version = parse_bios_version(&version_str)?;
    info!("BIOS version: {version:04}");

    if version >= OEM_FEATURES_MIN_BIOS {
        let oem = dmi
            .oem_string(OEM_FEATURES_STRING)
            .ok_or(ProbeError::NoOemString(OEM_FEATURES_STRING))?;
        info!("OEM_STRING({OEM_FEATURES_STRING}) = '{oem}'");

        if oem.bytes().all(|b| b == b' ') {
            features |= Features::FN_LOCK | Features::BATT_CHARGE_LIMIT | Features::FAN_EXTRAS;
        } else {
            warn!("cannot extract supported features from OEM string");
        }
    }

    Ok(features)
}

fn probe_ec<E: Transact + ?Sized>(ec: &E) -> Result<Features, EcError> {
    ec.read_byte(SUPPORT_1).map(Features::from_support_1)
}

/// Run both probes. Failures only cost the features they would have found.
///
/// Features the DMI probe keeps from a partial run (the Slimbook extras) are
/// kept even when a later step of that probe fails.
pub fn probe<E: Transact + ?Sized>(ec: &E, dmi: &dyn DmiInfo) -> Features {
    let mut features = match probe_ec(ec) {
        Ok(features) => features,
        Err(err) => {
            warn!("failed to query support_1 byte: {err}");
            Features::empty()
        }
    };

    match probe_dmi(dmi) {
        Ok(found) => features |= found,
        Err(ProbeError::NoMatch) => warn!("no DMI match"),
        Err(err) => {
            warn!("BIOS feature probe failed: {err}");
            // machine extras are applied as soon as the table matches
            for entry in DMI_TABLE.iter().filter(|entry| entry.matches(dmi)) {
                features |= entry.extra;
            }
        }
    }

    features
}

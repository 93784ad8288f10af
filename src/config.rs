//! Daemon configuration.
//!
//! Read once at start-up from `/etc/qc71/qc71.toml`. Every key is optional
//! and a missing file means all defaults, so a fresh install works without
//! one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::acpi_call::{AcpiCallOptions, DEFAULT_ACPI_CALL_PATH, DEFAULT_WMI_SYSFS};
use crate::core::ec::LockDiscipline;
use crate::core::features::Features;

pub const CONFIG_DIR: &str = "/etc/qc71";
pub const CONFIG_FILE: &str = "qc71.toml";

pub const DEFAULT_SOCKET_PATH: &str = "/run/qc71.sock";
pub const DEFAULT_ACPID_SOCKET: &str = "/var/run/acpid.socket";

pub fn default_config_path() -> PathBuf {
    Path::new(CONFIG_DIR).join(CONFIG_FILE)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown feature {0:?} in [features]")]
    UnknownFeature(String),
}

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub socket_path: PathBuf,
    pub lock_discipline: LockDiscipline,
    /// Full ACPI path of the WMI method, e.g. `\_SB.WMID.WMBC`.
    pub acpi_method: Option<String>,
    pub acpi_call_path: PathBuf,
    pub wmi_sysfs: PathBuf,
    pub acpid_socket: PathBuf,
    pub adapters: AdapterConfig,
    pub features: FeatureOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            lock_discipline: LockDiscipline::default(),
            acpi_method: None,
            acpi_call_path: PathBuf::from(DEFAULT_ACPI_CALL_PATH),
            wmi_sysfs: PathBuf::from(DEFAULT_WMI_SYSFS),
            acpid_socket: PathBuf::from(DEFAULT_ACPID_SOCKET),
            adapters: AdapterConfig::default(),
            features: FeatureOverrides::default(),
        }
    }
}

/// Which optional adapters to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    pub hwmon: bool,
    pub battery: bool,
    pub lightbar: bool,
    pub events: bool,
    /// Report hotkeys through a uinput device. Only used with `events`.
    pub input: bool,
    /// Raw register access by name. Off unless asked for.
    pub debug_registers: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            hwmon: true,
            battery: true,
            lightbar: true,
            events: true,
            input: true,
            debug_registers: false,
        }
    }
}

/// Manual corrections to the probed feature set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureOverrides {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}

impl FeatureOverrides {
    /// `probed` with `enable` added and then `disable` removed.
    pub fn apply(&self, probed: Features) -> Result<Features, ConfigError> {
        let lookup = |name: &String| {
            Features::from_name(name).ok_or_else(|| ConfigError::UnknownFeature(name.clone()))
        };

        let mut features = probed;
        for name in &self.enable {
            features |= lookup(name)?;
        }
        for name in &self.disable {
            features -= lookup(name)?;
        }
        Ok(features)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                info!(path = %path.display(), "loaded configuration");
                Self::from_toml(path, &content)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Like [`Config::load`] but never fails; errors are logged.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            warn!("{err}, using defaults");
            Self::default()
        })
    }

    pub fn acpi_call_options(&self) -> AcpiCallOptions {
        AcpiCallOptions {
            call_path: self.acpi_call_path.clone(),
            wmi_sysfs: self.wmi_sysfs.clone(),
            method_override: self.acpi_method.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = Config::from_toml(Path::new("x.toml"), "").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.socket_path, PathBuf::from("/run/qc71.sock"));
        assert!(cfg.adapters.hwmon && cfg.adapters.events && cfg.adapters.input);
        assert!(!cfg.adapters.debug_registers);
        assert_eq!(cfg.lock_discipline, LockDiscipline::Exclusive);
    }

    #[test]
    fn parses_all_sections() {
        let cfg = Config::from_toml(
            Path::new("x.toml"),
            r#"
                socket_path = "/tmp/qc71.sock"
                lock_discipline = "shared-reads"
                acpi_method = '\_SB.WMID.WMBC'

                [adapters]
                lightbar = false
                debug_registers = true

                [features]
                enable = ["turbo-mode"]
                disable = ["lightbar"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/qc71.sock"));
        assert_eq!(cfg.lock_discipline, LockDiscipline::SharedReads);
        assert_eq!(cfg.acpi_method.as_deref(), Some(r"\_SB.WMID.WMBC"));
        assert!(!cfg.adapters.lightbar && cfg.adapters.battery);
        assert!(cfg.adapters.debug_registers);
        assert_eq!(
            cfg.acpi_call_options().method_override.as_deref(),
            Some(r"\_SB.WMID.WMBC")
        );

        let features = cfg
            .features
            .apply(Features::LIGHTBAR | Features::FAN_BOOST)
            .unwrap();
        assert_eq!(features, Features::FAN_BOOST | Features::TURBO_MODE);
    }

    #[test]
    fn rejects_unknown_keys_and_features() {
        assert!(matches!(
            Config::from_toml(Path::new("x.toml"), "sockett = 1"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::from_toml(Path::new("x.toml"), "lock_discipline = \"none\""),
            Err(ConfigError::Parse { .. })
        ));

        let overrides = FeatureOverrides {
            enable: vec!["hyperdrive".into()],
            disable: vec![],
        };
        assert!(matches!(
            overrides.apply(Features::empty()),
            Err(ConfigError::UnknownFeature(name)) if name == "hyperdrive"
        ));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load(&missing).unwrap(), Config::default());

        let path = dir.path().join("qc71.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[adapters]\nhwmon = false").unwrap();
        drop(file);
        assert!(!Config::load(&path).unwrap().adapters.hwmon);

        fs::write(&path, "adapters = 3").unwrap();
        assert!(Config::load(&path).is_err());
        assert_eq!(Config::load_or_default(&path), Config::default());
    }
}

//! The driver context: built once when the daemon attaches to the machine,
//! dropped when it exits.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::battery::Battery;
use crate::adapters::debug::DebugRegisters;
use crate::adapters::events::EventHandler;
use crate::adapters::input::{InputSink, UinputDevice};
use crate::adapters::hwmon::Hwmon;
use crate::adapters::lightbar::Lightbar;
use crate::adapters::platform::PlatformAttrs;
use crate::config::{AdapterConfig, Config, ConfigError};
use crate::core::ec::{EcChannel, EcError, LockDiscipline};
use crate::core::fan::FanControl;
use crate::core::features::{self, DmiInfo, Features};
use crate::core::lock::Interrupt;
use crate::core::wmi::{WmiBus, WMBC_GUID};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("WMI block {0} not found, is this a QC71 laptop?")]
    NoWmbc(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything the daemon serves, sharing one EC channel.
pub struct Platform {
    interrupt: Interrupt,
    ec: Arc<EcChannel>,
    features: Features,
    fan: Arc<FanControl>,
    attrs: PlatformAttrs,
    hwmon: Option<Hwmon>,
    battery: Option<Battery>,
    lightbar: Option<Lightbar>,
    debug: Option<DebugRegisters>,
    events: Option<EventHandler>,
}

/// Knobs for [`Platform::attach`], usually taken from the [`Config`].
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub lock_discipline: LockDiscipline,
    pub adapters: AdapterConfig,
    pub overrides: crate::config::FeatureOverrides,
    /// Create the uinput device for hotkeys. Off by default.
    pub input_device: bool,
}

impl From<&Config> for AttachOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            lock_discipline: cfg.lock_discipline,
            adapters: cfg.adapters,
            overrides: cfg.features.clone(),
            input_device: cfg.adapters.input,
        }
    }
}

/// A failed input device only costs the key reports.
fn create_input_device() -> Option<Box<dyn InputSink>> {
    match UinputDevice::create() {
        Ok(device) => Some(Box::new(device)),
        Err(err) => {
            warn!("cannot create input device: {err}");
            None
        }
    }
}

impl Platform {
    /// Probe the machine and build the adapters it supports.
    pub fn attach(
        wmi: Arc<dyn WmiBus>,
        dmi: &dyn DmiInfo,
        opts: &AttachOptions,
        interrupt: &Interrupt,
    ) -> Result<Self, AttachError> {
        if !wmi.has_guid(WMBC_GUID) {
            return Err(AttachError::NoWmbc(WMBC_GUID));
        }

        let ec = Arc::new(EcChannel::new(
            Arc::clone(&wmi),
            opts.lock_discipline,
            interrupt,
        ));

        let probed = features::probe(ec.as_ref(), dmi);
        let features = opts.overrides.apply(probed)?;
        info!("supported features: {features}");

        let fan = Arc::new(FanControl::new(
            Arc::clone(&ec),
            features.contains(Features::FAN_BOOST),
            interrupt,
        ));
        let attrs = PlatformAttrs::new(Arc::clone(&ec), features);

        let adapters = &opts.adapters;
        let hwmon = adapters
            .hwmon
            .then(|| Hwmon::new(Arc::clone(&fan), Arc::clone(&ec)));
        let battery = (adapters.battery && features.contains(Features::BATT_CHARGE_LIMIT))
            .then(|| Battery::new(Arc::clone(&ec)));
        let lightbar = (adapters.lightbar && features.contains(Features::LIGHTBAR))
            .then(|| Lightbar::new(Arc::clone(&ec)));
        let debug = adapters
            .debug_registers
            .then(|| DebugRegisters::new(Arc::clone(&ec)));
        let events = adapters.events.then(|| {
            let input = opts.input_device.then(create_input_device).flatten();
            EventHandler::new(Arc::clone(&wmi), attrs.clone(), input)
        });

        for (name, present) in [
            ("hwmon", hwmon.is_some()),
            ("battery", battery.is_some()),
            ("lightbar", lightbar.is_some()),
            ("debug registers", debug.is_some()),
            ("events", events.is_some()),
        ] {
            if present {
                info!("{name} adapter enabled");
            } else {
                warn!("{name} adapter not available");
            }
        }

        Ok(Self {
            interrupt: interrupt.clone(),
            ec,
            features,
            fan,
            attrs,
            hwmon,
            battery,
            lightbar,
            debug,
            events,
        })
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn ec(&self) -> &Arc<EcChannel> {
        &self.ec
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn fan(&self) -> &FanControl {
        &self.fan
    }

    pub fn attrs(&self) -> &PlatformAttrs {
        &self.attrs
    }

    pub fn hwmon(&self) -> Result<&Hwmon, EcError> {
        self.hwmon.as_ref().ok_or(EcError::Unsupported("hwmon"))
    }

    pub fn battery(&self) -> Result<&Battery, EcError> {
        self.battery.as_ref().ok_or(EcError::Unsupported("battery"))
    }

    pub fn lightbar(&self) -> Result<&Lightbar, EcError> {
        self.lightbar.as_ref().ok_or(EcError::Unsupported("lightbar"))
    }

    pub fn debug_registers(&self) -> Result<&DebugRegisters, EcError> {
        self.debug
            .as_ref()
            .ok_or(EcError::Unsupported("debug registers"))
    }

    pub fn events(&self) -> Option<&EventHandler> {
        self.events.as_ref()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("features", &self.features)
            .field("hwmon", &self.hwmon.is_some())
            .field("battery", &self.battery.is_some())
            .field("lightbar", &self.lightbar.is_some())
            .field("debug", &self.debug.is_some())
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

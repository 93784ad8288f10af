use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::adapters::hwmon::{Sensor, SensorValue};
use crate::config::Config;
use crate::core::acpi_call::AcpiCallBus;
use crate::core::ec::{ByteRegisters, EcError};
use crate::core::features::SysfsDmi;
use crate::core::lock::Interrupt;
use crate::core::regs::BATT_TEMP;
use crate::platform::{AttachOptions, Platform};
use crate::protocol::{AttrValue, HwmonReading, LightbarSetting, Request, Response, Status};

/// Serve one request against the platform.
pub fn handle_request(platform: &Platform, req: Request) -> Response {
    debug!(?req, "request");
    match req {
        Request::GetStatus => Response::Status(status(platform)),
        Request::GetFeatures => Response::Features(
            platform
                .features()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        ),
        Request::ListAttrs => {
            let attrs = platform.attrs();
            let mut values = Vec::new();
            for attr in attrs.visible() {
                match attrs.get(attr) {
                    Ok(value) => values.push(AttrValue { attr, value }),
                    Err(err) => return err.into(),
                }
            }
            Response::Attrs(values)
        }
        Request::GetAttr(attr) => platform.attrs().get(attr).into(),
        Request::SetAttr(attr, on) => platform.attrs().set(attr, on).into(),
        Request::GetFanMode => platform.fan().mode().into(),
        Request::SetFanMode(mode) => platform.fan().set_mode_value(mode).into(),
        Request::GetPwm(index) => platform.fan().pwm(index).into(),
        Request::SetPwm(index, value) => platform.fan().set_pwm(index, value).into(),
        Request::GetHwmon => match platform.hwmon() {
            Ok(hwmon) => Response::Hwmon(
                hwmon
                    .snapshot()
                    .into_iter()
                    .map(|(sensor, value)| HwmonReading {
                        channel: sensor.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            ),
            Err(err) => err.into(),
        },
        Request::ReadHwmon(channel) => match read_hwmon(platform, &channel) {
            Ok(SensorValue::Number(n)) => Response::Number(n),
            Ok(SensorValue::Label(label)) => Response::Hwmon(vec![HwmonReading {
                channel,
                value: label,
            }]),
            Err(err) => err.into(),
        },
        Request::WriteHwmon(channel, value) => write_hwmon(platform, &channel, value).into(),
        Request::GetChargeThreshold => platform
            .battery()
            .and_then(|battery| battery.charge_end_threshold())
            .into(),
        Request::SetChargeThreshold(value) => platform
            .battery()
            .and_then(|battery| battery.set_charge_end_threshold(value))
            .into(),
        Request::GetLightbar => match platform.lightbar().and_then(|lb| lb.state()) {
            Ok(state) => Response::Lightbar(state),
            Err(err) => err.into(),
        },
        Request::SetLightbar(setting) => platform
            .lightbar()
            .and_then(|lightbar| match setting {
                LightbarSetting::Brightness(on) => lightbar.set_brightness(on),
                LightbarSetting::BrightnessS3(on) => lightbar.set_brightness_s3(on),
                LightbarSetting::RainbowMode(on) => lightbar.set_rainbow_mode(on),
                LightbarSetting::Color(color) => lightbar.set_color(color),
            })
            .into(),
        Request::ListRegisters => match platform.debug_registers() {
            Ok(regs) => Response::Registers(regs.list()),
            Err(err) => err.into(),
        },
        Request::ReadRegister(name) => platform
            .debug_registers()
            .and_then(|regs| regs.read(&name))
            .into(),
        Request::WriteRegister(name, value) => platform
            .debug_registers()
            .and_then(|regs| regs.write(&name, value))
            .into(),
        Request::RecentEvents => match platform.events() {
            Some(events) => Response::Events(events.recent()),
            None => EcError::Unsupported("events").into(),
        },
    }
}

fn read_hwmon(platform: &Platform, channel: &str) -> Result<SensorValue, EcError> {
    let sensor: Sensor = channel.parse()?;
    platform.hwmon()?.read(sensor)
}

fn write_hwmon(platform: &Platform, channel: &str, value: i64) -> Result<(), EcError> {
    let sensor: Sensor = channel.parse()?;
    platform.hwmon()?.write(sensor, value)
}

/// Unreadable sensors show up as missing, not as an error.
fn ok<T>(what: &str, result: Result<T, EcError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("{what} unavailable: {err}");
            None
        }
    }
}

fn status(platform: &Platform) -> Status {
    let fan = platform.fan();

    Status {
        fan_rpm: [ok("fan1 rpm", fan.rpm(0)), ok("fan2 rpm", fan.rpm(1))],
        fan_pwm: [ok("pwm1", fan.pwm(0)), ok("pwm2", fan.pwm(1))],
        fan_temp: [
            ok("fan1 temp", fan.temperature(0)),
            ok("fan2 temp", fan.temperature(1)),
        ],
        fan_fault: ok("fan fault", fan.fault()),
        fan_mode: ok("fan mode", fan.mode()),
        battery_temp: ok("battery temp", platform.ec().read_byte(BATT_TEMP)),
        charge_end_threshold: ok(
            "charge threshold",
            platform.battery().and_then(|b| b.charge_end_threshold()),
        ),
        rfkill: platform.events().map(|events| events.rfkill_switch()),
    }
}

fn handle_client(stream: UnixStream, platform: &Platform) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => handle_request(platform, req),
            Err(err) => Response::error(format!("bad request: {err}")),
        };

        let mut out = serde_json::to_string(&resp)?;
        out.push('\n');
        writer.write_all(out.as_bytes())?;
    }
    Ok(())
}

fn remove_socket(path: &Path) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => info!(socket = %path.display(), "socket removed"),
            Err(err) => warn!(socket = %path.display(), "cannot remove socket: {err}"),
        }
    }
}

fn spawn_event_listener(platform: &Arc<Platform>, acpid_socket: PathBuf) {
    if platform.events().is_none() {
        return;
    }

    let platform = Arc::clone(platform);
    let spawned = thread::Builder::new()
        .name("qc71-events".into())
        .spawn(move || {
            let Some(handler) = platform.events() else {
                return;
            };
            if let Err(err) =
                crate::adapters::events::listen(&acpid_socket, handler, platform.interrupt())
            {
                warn!(socket = %acpid_socket.display(), "hotkey listener stopped: {err}");
            }
        });

    if let Err(err) = spawned {
        warn!("cannot start hotkey listener: {err}");
    }
}

/// Attach to the machine and serve clients until SIGINT/SIGTERM.
pub fn run_daemon(config: &Config) -> Result<()> {
    info!("starting qc71 daemon");

    let interrupt = Interrupt::new();

    let wmi = AcpiCallBus::open(&config.acpi_call_options())
        .context("cannot set up the WMI backend (are you root?)")?;
    let platform = Platform::attach(
        Arc::new(wmi),
        &SysfsDmi::default(),
        &AttachOptions::from(config),
        &interrupt,
    )
    .context("cannot attach to the platform")?;
    let platform = Arc::new(platform);

    let socket = config.socket_path.clone();
    if socket.exists() {
        // a previous instance died without cleaning up
        fs::remove_file(&socket)
            .with_context(|| format!("cannot remove stale socket {}", socket.display()))?;
        info!("removed stale socket file");
    }

    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("cannot bind {}", socket.display()))?;

    // any user may talk to the daemon
    if let Err(err) = fs::set_permissions(&socket, fs::Permissions::from_mode(0o666)) {
        warn!("cannot set socket permissions: {err}");
    }

    {
        let socket = socket.clone();
        let interrupt = interrupt.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal, cleaning up");
            interrupt.raise();
            wake(&socket);
        })
        .context("cannot install signal handler")?;
    }

    spawn_event_listener(&platform, config.acpid_socket.clone());

    info!(socket = %socket.display(), "qc71 daemon started");
    serve(&listener, &platform);

    remove_socket(&socket);
    info!("qc71 daemon stopped");
    Ok(())
}

/// Accept clients, one thread each, until the platform's interrupt is
/// raised. The loop only notices after its next accept; see [`wake`].
pub fn serve(listener: &UnixListener, platform: &Arc<Platform>) {
    for stream in listener.incoming() {
        if platform.interrupt().is_raised() {
            break;
        }
        match stream {
            Ok(stream) => {
                let platform = Arc::clone(platform);
                let spawned = thread::Builder::new()
                    .name("qc71-client".into())
                    .spawn(move || {
                        if let Err(err) = handle_client(stream, &platform) {
                            debug!("client disconnected: {err}");
                        }
                    });
                if let Err(err) = spawned {
                    error!("cannot spawn client thread: {err}");
                }
            }
            Err(err) => error!("connection failed: {err}"),
        }
    }
}

/// Connect once to `socket` so a [`serve`] loop blocked in accept returns.
pub fn wake(socket: &Path) {
    if let Err(err) = UnixStream::connect(socket) {
        debug!(socket = %socket.display(), "cannot wake the accept loop: {err}");
    }
}

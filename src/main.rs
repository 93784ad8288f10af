//! qc71ctl - QC71 laptop control
//!
//! `qc71ctl daemon` runs the privileged daemon; every other subcommand sends
//! one request to it over the Unix socket.

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qc71_laptop::adapters::parse_bool;
use qc71_laptop::adapters::platform::PlatformAttr;
use qc71_laptop::client::Client;
use qc71_laptop::config::{default_config_path, Config};
use qc71_laptop::core::fan::FanMode;
use qc71_laptop::daemon;
use qc71_laptop::protocol::{LightbarSetting, Request, Response};

#[derive(Parser)]
#[command(name = "qc71ctl")]
#[command(about = "Fan, battery and lightbar control for QC71 laptops")]
#[command(version)]
struct Cli {
    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file
    #[arg(long, global = true, env = "QC71_CONFIG")]
    config: Option<PathBuf>,

    /// Daemon socket, overrides the configuration file
    #[arg(long, global = true, env = "QC71_SOCKET")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (needs root)
    Daemon,

    /// Fan speeds, temperatures and mode
    Status,

    /// Features detected on this machine
    Features,

    /// Show or change the fan mode
    FanMode {
        #[arg(value_enum)]
        mode: Option<FanModeArg>,
    },

    /// Show or set fan PWM on the 0-255 scale
    Pwm {
        /// Fan number, 1 or 2
        fan: usize,
        value: Option<u8>,
    },

    /// Platform attributes (fn_lock, silent_mode, ...)
    Attr {
        /// Attribute name; lists all visible attributes if omitted
        name: Option<String>,
        /// New value: 1/0, on/off, yes/no
        value: Option<String>,
    },

    /// Raw hwmon channels
    Hwmon {
        channel: Option<String>,
        value: Option<i64>,
    },

    /// Battery charge end threshold in percent
    ChargeLimit { percent: Option<i64> },

    /// Lightbar settings
    #[command(subcommand)]
    Lightbar(LightbarCommands),

    /// Named EC registers (needs debug_registers in the config)
    #[command(subcommand)]
    Reg(RegCommands),

    /// Recently handled hotkeys
    Events,
}

#[derive(Subcommand)]
enum LightbarCommands {
    /// Show the lightbar state
    Show,
    /// Turn the lightbar on or off
    Power { value: String },
    /// Keep the lightbar lit while suspended
    Sleep { value: String },
    /// Rainbow animation
    Rainbow { value: String },
    /// Colour as three digits RGB, each 0-9
    Color { rgb: u32 },
}

#[derive(Subcommand)]
enum RegCommands {
    List,
    Read { name: String },
    Write { name: String, value: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum FanModeArg {
    Disengaged,
    Manual,
    Automatic,
}

impl From<FanModeArg> for FanMode {
    fn from(arg: FanModeArg) -> Self {
        match arg {
            FanModeArg::Disengaged => FanMode::Disengaged,
            FanModeArg::Manual => FanMode::Manual,
            FanModeArg::Automatic => FanMode::Automatic,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_env("QC71_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| format!("qc71_laptop={level},qc71ctl={level}").into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn fan_index(fan: usize) -> Result<usize> {
    match fan {
        1 | 2 => Ok(fan - 1),
        _ => bail!("fan must be 1 or 2"),
    }
}

fn lightbar_request(cmd: LightbarCommands) -> Result<Request> {
    let setting = match cmd {
        LightbarCommands::Show => return Ok(Request::GetLightbar),
        LightbarCommands::Power { value } => LightbarSetting::Brightness(parse_bool(&value)?),
        LightbarCommands::Sleep { value } => LightbarSetting::BrightnessS3(parse_bool(&value)?),
        LightbarCommands::Rainbow { value } => LightbarSetting::RainbowMode(parse_bool(&value)?),
        LightbarCommands::Color { rgb } => LightbarSetting::Color(rgb),
    };
    Ok(Request::SetLightbar(setting))
}

fn build_request(command: Commands) -> Result<Request> {
    let req = match command {
        Commands::Daemon => bail!("daemon is not a client command"),
        Commands::Status => Request::GetStatus,
        Commands::Features => Request::GetFeatures,
        Commands::FanMode { mode: None } => Request::GetFanMode,
        Commands::FanMode { mode: Some(mode) } => {
            Request::SetFanMode(i64::from(FanMode::from(mode).as_index()))
        }
        Commands::Pwm { fan, value: None } => Request::GetPwm(fan_index(fan)?),
        Commands::Pwm {
            fan,
            value: Some(value),
        } => Request::SetPwm(fan_index(fan)?, value),
        Commands::Attr { name: None, .. } => Request::ListAttrs,
        Commands::Attr {
            name: Some(name),
            value,
        } => {
            let attr: PlatformAttr = name.parse()?;
            match value {
                Some(value) => Request::SetAttr(attr, parse_bool(&value)?),
                None => Request::GetAttr(attr),
            }
        }
        Commands::Hwmon { channel: None, .. } => Request::GetHwmon,
        Commands::Hwmon {
            channel: Some(channel),
            value: None,
        } => Request::ReadHwmon(channel),
        Commands::Hwmon {
            channel: Some(channel),
            value: Some(value),
        } => Request::WriteHwmon(channel, value),
        Commands::ChargeLimit { percent: None } => Request::GetChargeThreshold,
        Commands::ChargeLimit {
            percent: Some(percent),
        } => Request::SetChargeThreshold(percent),
        Commands::Lightbar(cmd) => lightbar_request(cmd)?,
        Commands::Reg(RegCommands::List) => Request::ListRegisters,
        Commands::Reg(RegCommands::Read { name }) => Request::ReadRegister(name),
        Commands::Reg(RegCommands::Write { name, value }) => Request::WriteRegister(name, value),
        Commands::Events => Request::RecentEvents,
    };
    Ok(req)
}

fn opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "n/a".to_string(), ToString::to_string)
}

fn print_response(resp: &Response) {
    match resp {
        Response::Ok => {}
        Response::Status(s) => {
            for i in 0..2 {
                println!(
                    "fan{}: {} rpm, pwm {}, temp {} (raw)",
                    i + 1,
                    opt(&s.fan_rpm[i]),
                    opt(&s.fan_pwm[i]),
                    opt(&s.fan_temp[i])
                );
            }
            println!("fan mode:       {}", opt(&s.fan_mode));
            println!("fan fault:      {}", opt(&s.fan_fault));
            println!("battery temp:   {} (raw)", opt(&s.battery_temp));
            println!("charge limit:   {}", opt(&s.charge_end_threshold));
            println!("rfkill switch:  {}", opt(&s.rfkill));
        }
        Response::Features(names) if names.is_empty() => println!("none"),
        Response::Features(names) => {
            for name in names {
                println!("{name}");
            }
        }
        Response::Attrs(values) => {
            for v in values {
                println!("{}: {}", v.attr, u8::from(v.value));
            }
        }
        Response::Bool(value) => println!("{}", u8::from(*value)),
        Response::Number(n) => println!("{n}"),
        Response::FanMode(mode) => println!("{mode} ({})", mode.as_index()),
        Response::Hwmon(readings) => {
            for r in readings {
                println!("{}: {}", r.channel, r.value);
            }
        }
        Response::Lightbar(state) => {
            println!("brightness:    {}", u8::from(state.brightness));
            println!("brightness_s3: {}", u8::from(state.brightness_s3));
            println!("rainbow_mode:  {}", u8::from(state.rainbow_mode));
            println!("color:         {:03}", state.color);
        }
        Response::Registers(regs) => {
            for r in regs {
                println!("{:<20} {}", r.name, r.addr);
            }
        }
        Response::Events(events) => {
            for e in events {
                println!(
                    "{:>3} {} {}",
                    e.code,
                    e.key.as_deref().unwrap_or("-"),
                    e.description.as_deref().unwrap_or("")
                );
            }
        }
        Response::Error { .. } => {}
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Daemon = cli.command {
        let config = Config::load(&config_path)?;
        return daemon::run_daemon(&config);
    }

    let socket = match cli.socket {
        Some(socket) => socket,
        None => Config::load_or_default(&config_path).socket_path,
    };

    let req = build_request(cli.command)?;
    let mut client = Client::connect(&socket)?;
    let resp = client.send(&req)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        print_response(&resp);
    }

    if let Response::Error { errno, message } = resp {
        bail!("{message} (errno {errno})");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("qc71ctl: {err:#}");
        process::exit(1);
    }
}

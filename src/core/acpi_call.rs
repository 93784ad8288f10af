//! [`WmiBus`] backend built on the `acpi_call` kernel module.
//!
//! The kernel's WMI bus publishes every block under
//! `/sys/bus/wmi/devices/<GUID>` with its two-letter `object_id`; the method
//! implementing a block is `WM<object_id>` on the parent PNP0C14 ACPI
//! device. `acpi_call` lets us evaluate exactly that method from userspace:
//! write `"<path> <args...>"` to `/proc/acpi/call`, then read the result
//! back from the same file.

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::wmi::{AcpiObject, WmiBus, WmiError, WMBC_GUID};

pub const DEFAULT_ACPI_CALL_PATH: &str = "/proc/acpi/call";
pub const DEFAULT_WMI_SYSFS: &str = "/sys/bus/wmi/devices";

const ACPI_CALL_MODULE: &str = "acpi_call";

/// Where to find things; all of it is overridable from the config file.
#[derive(Debug, Clone)]
pub struct AcpiCallOptions {
    pub call_path: PathBuf,
    pub wmi_sysfs: PathBuf,
    /// Full ACPI path of the WMBC method, skips sysfs discovery.
    pub method_override: Option<String>,
}

impl Default for AcpiCallOptions {
    fn default() -> Self {
        Self {
            call_path: PathBuf::from(DEFAULT_ACPI_CALL_PATH),
            wmi_sysfs: PathBuf::from(DEFAULT_WMI_SYSFS),
            method_override: None,
        }
    }
}

/// Handle for evaluating the QC71 WMI methods through `acpi_call`.
#[derive(Debug)]
pub struct AcpiCallBus {
    call_path: PathBuf,
    device: String,
    method: String,
    guids: Vec<String>,
    // acpi_call keeps a single result buffer for the whole system
    file: Mutex<()>,
}

impl AcpiCallBus {
    /// Make sure `acpi_call` is loaded and locate the WMBC method.
    pub fn open(opts: &AcpiCallOptions) -> Result<Self, WmiError> {
        ensure_acpi_call(&opts.call_path)?;

        let mut guids = list_wmi_guids(&opts.wmi_sysfs);

        let (device, method) = match &opts.method_override {
            Some(method) => {
                if !guids.iter().any(|g| g == WMBC_GUID) {
                    guids.push(WMBC_GUID.to_string());
                }
                let device = method
                    .rsplit_once('.')
                    .map(|(device, _)| device.to_string())
                    .ok_or_else(|| WmiError::Parse(method.clone()))?;
                (device, method.clone())
            }
            None => discover_method(&opts.wmi_sysfs, WMBC_GUID)?,
        };

        info!(%method, "using WMI method through acpi_call");

        Ok(Self {
            call_path: opts.call_path.clone(),
            device,
            method,
            guids,
            file: Mutex::new(()),
        })
    }

    pub fn method_path(&self) -> &str {
        &self.method
    }

    fn call(&self, command: &str) -> Result<Option<AcpiObject>, WmiError> {
        let output = {
            let _file = self.file.lock();

            OpenOptions::new()
                .write(true)
                .open(&self.call_path)?
                .write_all(command.as_bytes())?;

            let mut output = String::new();
            OpenOptions::new()
                .read(true)
                .open(&self.call_path)?
                .read_to_string(&mut output)?;
            output
        };

        debug!(command, output = output.trim_end_matches('\0').trim(), "acpi_call");

        parse_output(&output).map_err(|err| match err {
            WmiError::Acpi { status, .. } => WmiError::Acpi {
                method: command.to_string(),
                status,
            },
            other => other,
        })
    }
}

impl WmiBus for AcpiCallBus {
    fn has_guid(&self, guid: &str) -> bool {
        self.guids.iter().any(|g| g.eq_ignore_ascii_case(guid))
    }

    fn evaluate_method(
        &self,
        guid: &str,
        instance: u8,
        method_id: u32,
        input: &[u8],
    ) -> Result<Option<AcpiObject>, WmiError> {
        if !guid.eq_ignore_ascii_case(WMBC_GUID) {
            return Err(WmiError::GuidNotFound(guid.to_string()));
        }

        let hex: String = input.iter().map(|b| format!("{b:02x}")).collect();
        let command = format!("{} {instance:#x} {method_id:#x} b{hex}", self.method);

        self.call(&command)
    }

    fn event_data(&self, notify_id: u32) -> Result<Option<AcpiObject>, WmiError> {
        self.call(&format!("{}._WED {notify_id:#x}", self.device))
    }
}

// -- kernel module / sysfs helpers ------------------------------------------

fn ensure_acpi_call(call_path: &Path) -> Result<(), WmiError> {
    if call_path.exists() {
        return Ok(());
    }

    info!("{} missing, loading '{ACPI_CALL_MODULE}'", call_path.display());
    load_module(ACPI_CALL_MODULE)?;

    if call_path.exists() {
        info!("loaded '{ACPI_CALL_MODULE}' module successfully");
        Ok(())
    } else {
        Err(WmiError::Module {
            module: ACPI_CALL_MODULE,
            reason: format!("{} still missing after loading", call_path.display()),
        })
    }
}

fn load_module(name: &'static str) -> Result<(), WmiError> {
    let module_err = |reason: String| WmiError::Module {
        module: name,
        reason,
    };

    let ctx = kmod::Context::new().map_err(|e| module_err(e.to_string()))?;
    let modules = ctx
        .module_new_from_lookup(OsStr::new(name))
        .map_err(|e| module_err(e.to_string()))?;

    let mut found = false;
    for module in modules {
        found = true;
        module
            .insert_module(0, &[])
            .map_err(|e| module_err(e.to_string()))?;
    }

    if found {
        Ok(())
    } else {
        Err(module_err("not in the module index".into()))
    }
}

/// GUIDs of all WMI blocks the kernel knows about. Duplicate blocks show up
/// as `<GUID>-<n>`.
fn list_wmi_guids(wmi_sysfs: &Path) -> Vec<String> {
    let entries = match fs::read_dir(wmi_sysfs) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot list {}: {e}", wmi_sysfs.display());
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            name.get(..36).map(str::to_ascii_uppercase)
        })
        .collect()
}

/// Resolve `(device path, method path)` for `guid`.
fn discover_method(wmi_sysfs: &Path, guid: &str) -> Result<(String, String), WmiError> {
    let entry = fs::read_dir(wmi_sysfs)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(OsStr::to_str)
                .and_then(|name| name.get(..36))
                .is_some_and(|name| name.eq_ignore_ascii_case(guid))
        })
        .ok_or_else(|| WmiError::GuidNotFound(guid.to_string()))?;

    let object_id = fs::read_to_string(entry.join("object_id"))?;
    let object_id = object_id.trim();
    if object_id.len() != 2 {
        return Err(WmiError::Parse(format!("object_id {object_id:?}")));
    }

    let real = fs::canonicalize(&entry)?;
    let device = real
        .ancestors()
        .skip(1)
        .map(|dir| dir.join("firmware_node").join("path"))
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|path| path.trim().to_string())
        .ok_or_else(|| WmiError::Parse(format!("no ACPI node above {}", real.display())))?;

    let method = format!("{device}.WM{object_id}");
    Ok((device, method))
}

// -- output parsing ---------------------------------------------------------

/// Decode what `acpi_call` left in its result buffer.
pub fn parse_output(raw: &str) -> Result<Option<AcpiObject>, WmiError> {
    let text = raw.trim_end_matches('\0').trim();

    if let Some(status) = text.strip_prefix("Error:") {
        return Err(WmiError::Acpi {
            method: String::new(),
            status: status.trim().to_string(),
        });
    }
    if text.is_empty() {
        return Ok(None);
    }
    if text == "not called" {
        return Err(WmiError::Parse(text.to_string()));
    }

    let mut parser = Parser { rest: text };
    let object = parser.value()?;
    parser.skip_ws();
    if !parser.rest.is_empty() {
        return Err(WmiError::Parse(text.to_string()));
    }
    Ok(Some(object))
}

struct Parser<'a> {
    rest: &'a str,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn error(&self) -> WmiError {
        WmiError::Parse(self.rest.to_string())
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn value(&mut self) -> Result<AcpiObject, WmiError> {
        self.skip_ws();
        if self.eat('"') {
            let rest = self.rest;
            let end = rest.find('"').ok_or_else(|| self.error())?;
            self.rest = &rest[end + 1..];
            Ok(AcpiObject::String(rest[..end].to_string()))
        } else if self.eat('{') {
            let mut bytes = Vec::new();
            for item in self.list('}')? {
                match item {
                    AcpiObject::Integer(v) => {
                        bytes.push(u8::try_from(v).map_err(|_| self.error())?)
                    }
                    _ => return Err(self.error()),
                }
            }
            Ok(AcpiObject::Buffer(bytes))
        } else if self.eat('[') {
            Ok(AcpiObject::Package(self.list(']')?))
        } else {
            self.integer()
        }
    }

    fn list(&mut self, close: char) -> Result<Vec<AcpiObject>, WmiError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.value()?);
            if self.eat(close) {
                return Ok(items);
            }
            if !self.eat(',') {
                return Err(self.error());
            }
        }
    }

    fn integer(&mut self) -> Result<AcpiObject, WmiError> {
        self.skip_ws();
        let rest = self.rest;
        let digits = rest
            .strip_prefix("0x")
            .or_else(|| rest.strip_prefix("0X"))
            .ok_or_else(|| self.error())?;
        let end = digits
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(digits.len());
        let value = u64::from_str_radix(&digits[..end], 16).map_err(|_| self.error())?;
        self.rest = &digits[end..];
        Ok(AcpiObject::Integer(value))
    }
}

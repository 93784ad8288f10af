//! Fake QC71 firmware: a byte-wide register file behind the WMBC method,
//! with a call log and switchable failure modes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use qc71_laptop::core::ec::{EcChannel, EcRequest, LockDiscipline};
use qc71_laptop::core::features::DmiInfo;
use qc71_laptop::core::lock::Interrupt;
use qc71_laptop::core::regs::EcAddr;
use qc71_laptop::core::wmi::{
    AcpiObject, WmiBus, WmiError, WMBC_GETSETULONG_ID, WMBC_GUID, WMBC_INSTANCE,
};

/// Size of the buffer real machines answer with.
pub const RESPONSE_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub thread: ThreadId,
    pub request: EcRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Buffer,
    Short,
    Integer,
    Nothing,
}

struct State {
    regs: HashMap<u16, u8>,
    calls: Vec<Call>,
    fail_all: bool,
    fail_writes_to: Option<u16>,
    reply: Reply,
    delay: Duration,
    events: HashMap<u32, AcpiObject>,
    guid_present: bool,
    held: bool,
}

pub struct FakeFirmware {
    state: Mutex<State>,
    released: Condvar,
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                regs: HashMap::new(),
                calls: Vec::new(),
                fail_all: false,
                fail_writes_to: None,
                reply: Reply::Buffer,
                delay: Duration::ZERO,
                events: HashMap::new(),
                guid_present: true,
                held: false,
            }),
            released: Condvar::new(),
        }
    }
}

impl FakeFirmware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_regs(regs: &[(EcAddr, u8)]) -> Arc<Self> {
        let fw = Self::new();
        for &(addr, value) in regs {
            fw.poke(addr, value);
        }
        fw
    }

    pub fn poke(&self, addr: EcAddr, value: u8) {
        self.state.lock().regs.insert(addr.raw(), value);
    }

    pub fn peek(&self, addr: EcAddr) -> u8 {
        self.state.lock().regs.get(&addr.raw()).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn requests(&self) -> Vec<EcRequest> {
        self.calls().into_iter().map(|c| c.request).collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    pub fn fail_writes_to(&self, addr: Option<EcAddr>) {
        self.state.lock().fail_writes_to = addr.map(EcAddr::raw);
    }

    pub fn reply_with(&self, reply: Reply) {
        self.state.lock().reply = reply;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn set_event(&self, notify_id: u32, data: AcpiObject) {
        self.state.lock().events.insert(notify_id, data);
    }

    pub fn remove_guid(&self) {
        self.state.lock().guid_present = false;
    }

    /// While held, every call is logged and then blocks until released.
    pub fn hold(&self, held: bool) {
        self.state.lock().held = held;
        if !held {
            self.released.notify_all();
        }
    }
}

impl WmiBus for FakeFirmware {
    fn has_guid(&self, guid: &str) -> bool {
        guid == WMBC_GUID && self.state.lock().guid_present
    }

    fn evaluate_method(
        &self,
        guid: &str,
        instance: u8,
        method_id: u32,
        input: &[u8],
    ) -> Result<Option<AcpiObject>, WmiError> {
        assert_eq!(guid, WMBC_GUID);
        assert_eq!(instance, WMBC_INSTANCE);
        assert_eq!(method_id, WMBC_GETSETULONG_ID);
        let bytes: &[u8; EcRequest::LEN] = input.try_into().expect("8-byte request");
        let request = EcRequest::from_bytes(bytes);

        let delay = {
            let mut state = self.state.lock();
            state.calls.push(Call {
                thread: thread::current().id(),
                request,
            });
            while state.held {
                self.released.wait(&mut state);
            }
            state.delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        let write_fails = !request.read && state.fail_writes_to == Some(request.addr.raw());
        if state.fail_all || write_fails {
            return Err(WmiError::Acpi {
                method: "\\_SB.WMID.WMBC".into(),
                status: "AE_ERROR".into(),
            });
        }

        let value = if request.read {
            state.regs.get(&request.addr.raw()).copied().unwrap_or(0)
        } else {
            state.regs.insert(request.addr.raw(), request.data as u8);
            0
        };

        Ok(match state.reply {
            Reply::Buffer => {
                let mut buf = vec![0u8; RESPONSE_LEN];
                buf[0] = value;
                // padding bytes are garbage on real hardware
                buf[1..4].copy_from_slice(&[0xA5, 0x5A, 0xFF]);
                Some(AcpiObject::Buffer(buf))
            }
            Reply::Short => Some(AcpiObject::Buffer(vec![value, 0])),
            Reply::Integer => Some(AcpiObject::Integer(u64::from(value))),
            Reply::Nothing => None,
        })
    }

    fn event_data(&self, notify_id: u32) -> Result<Option<AcpiObject>, WmiError> {
        Ok(self.state.lock().events.get(&notify_id).cloned())
    }
}

pub fn channel(fw: &Arc<FakeFirmware>, interrupt: &Interrupt) -> Arc<EcChannel> {
    let wmi: Arc<dyn WmiBus> = fw.clone();
    Arc::new(EcChannel::new(wmi, LockDiscipline::Exclusive, interrupt))
}

#[derive(Debug, Clone, Default)]
pub struct FakeDmi {
    pub board: Option<&'static str>,
    pub vendor: Option<&'static str>,
    pub product: Option<&'static str>,
    pub bios: Option<&'static str>,
    pub oem18: Option<&'static str>,
}

impl FakeDmi {
    /// A QC71 board on a BIOS new enough for the OEM string flag.
    pub fn qc71_with_blank_oem() -> Self {
        Self {
            board: Some("LAPQC71A"),
            bios: Some("QCCFL357.0114.2021.0512.1015"),
            oem18: Some("  "),
            ..Self::default()
        }
    }
}

impl DmiInfo for FakeDmi {
    fn board_name(&self) -> Option<String> {
        self.board.map(str::to_string)
    }

    fn chassis_vendor(&self) -> Option<String> {
        self.vendor.map(str::to_string)
    }

    fn product_name(&self) -> Option<String> {
        self.product.map(str::to_string)
    }

    fn bios_version(&self) -> Option<String> {
        self.bios.map(str::to_string)
    }

    fn oem_string(&self, index: usize) -> Option<String> {
        if index == 18 {
            self.oem18.map(str::to_string)
        } else {
            None
        }
    }
}

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{channel, FakeFirmware, Reply};
use qc71_laptop::core::ec::{ByteRegisters, EcChannel, EcError, LockDiscipline, Transact};
use qc71_laptop::core::lock::Interrupt;
use qc71_laptop::core::regs::{
    EcAddr, BATT_CHARGE_CTRL, DEBUG_REGISTERS, FAN_CTRL, FAN_CTRL_AUTO, SUPPORT_1,
};
use qc71_laptop::core::wmi::WmiBus;

#[test]
fn write_then_read_round_trips_every_named_register() {
    let fw = FakeFirmware::new();
    let ec = channel(&fw, &Interrupt::new());

    for (i, &(name, addr)) in DEBUG_REGISTERS.iter().enumerate() {
        let value = (i as u8).wrapping_mul(37) ^ 0x5A;
        ec.write_byte(addr, value).unwrap();
        assert_eq!(ec.read_byte(addr).unwrap(), value, "register {name}");
    }
}

#[test]
fn requests_use_the_documented_layout() {
    let fw = FakeFirmware::new();
    let ec = channel(&fw, &Interrupt::new());

    ec.write(EcAddr::from_raw(0x0751), 0x00A0).unwrap();
    ec.read(EcAddr::from_raw(0x0765)).unwrap();

    let reqs = fw.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].to_bytes(), [0x51, 0x07, 0xA0, 0x00, 0, 0, 0, 0]);
    assert_eq!(reqs[1].to_bytes(), [0x65, 0x07, 0x00, 0x00, 0, 1, 0, 0]);
}

#[test]
fn read_returns_first_four_bytes_of_the_buffer() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0xE0)]);
    let ec = channel(&fw, &Interrupt::new());

    let result = ec.read(SUPPORT_1).unwrap();
    assert_eq!(result.bytes(), [0xE0, 0xA5, 0x5A, 0xFF]);
    assert_eq!(ec.read_byte(SUPPORT_1).unwrap(), 0xE0);
}

#[test]
fn firmware_failure_is_io_and_not_retried() {
    let fw = FakeFirmware::new();
    let ec = channel(&fw, &Interrupt::new());
    fw.fail_all(true);

    let err = ec.read(SUPPORT_1).unwrap_err();
    assert!(matches!(err, EcError::Io(_)));
    assert_eq!(err.errno(), -5);
    assert_eq!(fw.call_count(), 1);

    assert!(matches!(ec.write_byte(FAN_CTRL, 0xA0), Err(EcError::Io(_))));
    assert_eq!(fw.call_count(), 2);
}

#[test]
fn short_or_missing_response_is_no_data() {
    let fw = FakeFirmware::new();
    let ec = channel(&fw, &Interrupt::new());

    fw.reply_with(Reply::Short);
    assert!(matches!(ec.read(SUPPORT_1), Err(EcError::NoData)));

    fw.reply_with(Reply::Integer);
    assert!(matches!(ec.read(SUPPORT_1), Err(EcError::NoData)));

    fw.reply_with(Reply::Nothing);
    assert!(matches!(ec.read_byte(SUPPORT_1), Err(EcError::NoData)));
    assert_eq!(EcError::NoData.errno(), -61);
}

#[test]
fn writes_ignore_the_response() {
    let fw = FakeFirmware::new();
    let ec = channel(&fw, &Interrupt::new());

    fw.reply_with(Reply::Nothing);
    ec.write_byte(BATT_CHARGE_CTRL, 80).unwrap();
    assert_eq!(fw.peek(BATT_CHARGE_CTRL), 80);
}

#[test]
fn update_bit_keeps_the_other_bits() {
    let fw = FakeFirmware::with_regs(&[(FAN_CTRL, 0b1000_0011)]);
    let ec = channel(&fw, &Interrupt::new());

    ec.write_flag(FAN_CTRL_AUTO, true).unwrap();
    assert_eq!(fw.peek(FAN_CTRL), 0b1010_0011);
    ec.write_flag(FAN_CTRL_AUTO, false).unwrap();
    assert_eq!(fw.peek(FAN_CTRL), 0b1000_0011);

    // one read and one write each
    assert_eq!(fw.call_count(), 4);
}

#[test]
fn raised_interrupt_stops_transactions() {
    let fw = FakeFirmware::new();
    let interrupt = Interrupt::new();
    let ec = channel(&fw, &interrupt);

    interrupt.raise();
    let err = ec.read_byte(SUPPORT_1).unwrap_err();
    assert!(matches!(err, EcError::Interrupted(_)));
    assert_eq!(err.errno(), -4);
    assert_eq!(fw.call_count(), 0);
}

#[test]
fn shared_reads_discipline_serves_concurrent_readers() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0x40), (FAN_CTRL, 0xA0)]);
    fw.set_delay(Duration::from_millis(2));
    let wmi: Arc<dyn WmiBus> = fw.clone();
    let ec = EcChannel::new(wmi, LockDiscipline::SharedReads, &Interrupt::new());
    assert_eq!(ec.discipline(), LockDiscipline::SharedReads);

    thread::scope(|s| {
        let a = s.spawn(|| (0..10).map(|_| ec.read_byte(SUPPORT_1).unwrap()).collect::<Vec<_>>());
        let b = s.spawn(|| (0..10).map(|_| ec.read_byte(FAN_CTRL).unwrap()).collect::<Vec<_>>());
        assert!(a.join().unwrap().iter().all(|&v| v == 0x40));
        assert!(b.join().unwrap().iter().all(|&v| v == 0xA0));
    });

    ec.write_byte(FAN_CTRL, 0x40).unwrap();
    assert_eq!(fw.peek(FAN_CTRL), 0x40);
}

mod common;

use std::io;
use std::sync::Arc;

use common::{FakeDmi, FakeFirmware};
use parking_lot::Mutex;
use qc71_laptop::adapters::events::EventHandler;
use qc71_laptop::adapters::input::{HotKey, InputSink};
use qc71_laptop::adapters::platform::PlatformAttr;
use qc71_laptop::config::{AdapterConfig, FeatureOverrides};
use qc71_laptop::core::ec::EcError;
use qc71_laptop::core::features::Features;
use qc71_laptop::core::lock::Interrupt;
use qc71_laptop::core::regs::{
    BATT_CHARGE_CTRL, BIOS_CTRL_1, BIOS_CTRL_3, DEVICE_STATUS, LIGHTBAR_BLUE, LIGHTBAR_CTRL,
    LIGHTBAR_GREEN, LIGHTBAR_RED, STATUS_1, SUPPORT_1, TRIGGER_1,
};
use qc71_laptop::core::wmi::{AcpiObject, WmiBus};
use qc71_laptop::platform::{AttachError, AttachOptions, Platform};

fn attach(fw: &Arc<FakeFirmware>, dmi: &FakeDmi) -> Platform {
    attach_with(fw, dmi, &AttachOptions::default())
}

fn attach_with(fw: &Arc<FakeFirmware>, dmi: &FakeDmi, opts: &AttachOptions) -> Platform {
    let wmi: Arc<dyn WmiBus> = fw.clone();
    Platform::attach(wmi, dmi, opts, &Interrupt::new()).unwrap()
}

#[test]
fn support_byte_alone_enables_three_features() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b1110_0000)]);
    let platform = attach(&fw, &FakeDmi::default());

    assert_eq!(
        platform.features(),
        Features::SUPER_KEY_LOCK | Features::LIGHTBAR | Features::FAN_BOOST
    );
    assert!(platform.fan().has_boost());
    assert!(platform.lightbar().is_ok());
    assert!(matches!(platform.battery(), Err(EcError::Unsupported(_))));
    assert!(!platform.attrs().is_visible(PlatformAttr::FnLock));
    assert!(platform.attrs().is_visible(PlatformAttr::SuperKeyLock));
    assert!(platform.attrs().is_visible(PlatformAttr::ManualControl));
}

#[test]
fn blank_oem_string_on_new_bios_adds_the_oem_features() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b1110_0000)]);
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());

    let features = platform.features();
    assert!(features.contains(Features::FN_LOCK));
    assert!(features.contains(Features::BATT_CHARGE_LIMIT));
    assert!(features.contains(Features::FAN_EXTRAS));
    assert!(!features.contains(Features::SILENT_MODE));
    assert!(platform.battery().is_ok());
}

#[test]
fn old_bios_skips_the_oem_string() {
    let fw = FakeFirmware::new();
    let dmi = FakeDmi {
        bios: Some("QCCFL357.0062.2020.0313.1530"),
        oem18: None,
        ..FakeDmi::qc71_with_blank_oem()
    };
    let platform = attach(&fw, &dmi);
    assert_eq!(platform.features(), Features::empty());
}

#[test]
fn slimbook_extras_survive_a_missing_bios_version() {
    let fw = FakeFirmware::new();
    let dmi = FakeDmi {
        product: Some("PROX15-AMD"),
        ..FakeDmi::default()
    };
    let platform = attach(&fw, &dmi);
    assert_eq!(
        platform.features(),
        Features::FN_LOCK | Features::SILENT_MODE
    );
}

#[test]
fn failed_support_probe_is_not_fatal() {
    let fw = FakeFirmware::new();
    fw.fail_all(true);
    let platform = attach(&fw, &FakeDmi::default());
    assert_eq!(platform.features(), Features::empty());
    assert!(!platform.fan().has_boost());
}

#[test]
fn attach_needs_the_wmbc_block() {
    let fw = FakeFirmware::new();
    fw.remove_guid();
    let wmi: Arc<dyn WmiBus> = fw.clone();
    let err = Platform::attach(
        wmi,
        &FakeDmi::default(),
        &AttachOptions::default(),
        &Interrupt::new(),
    )
    .unwrap_err();
    assert!(matches!(err, AttachError::NoWmbc(_)));
    assert_eq!(fw.call_count(), 0);
}

#[test]
fn overrides_adjust_the_probed_set() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b1110_0000)]);
    let opts = AttachOptions {
        overrides: FeatureOverrides {
            enable: vec!["turbo-mode".into()],
            disable: vec!["lightbar".into()],
        },
        ..AttachOptions::default()
    };
    let platform = attach_with(&fw, &FakeDmi::default(), &opts);

    assert!(platform.features().contains(Features::TURBO_MODE));
    assert!(!platform.features().contains(Features::LIGHTBAR));
    assert!(platform.lightbar().is_err());

    let bad = AttachOptions {
        overrides: FeatureOverrides {
            enable: vec!["warp-drive".into()],
            disable: Vec::new(),
        },
        ..AttachOptions::default()
    };
    let wmi: Arc<dyn WmiBus> = fw.clone();
    let err = Platform::attach(wmi, &FakeDmi::default(), &bad, &Interrupt::new()).unwrap_err();
    assert!(matches!(err, AttachError::Config(_)));
}

#[test]
fn disabled_adapters_are_not_built() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b1110_0000)]);
    let opts = AttachOptions {
        adapters: AdapterConfig {
            hwmon: false,
            lightbar: false,
            events: false,
            debug_registers: true,
            ..AdapterConfig::default()
        },
        ..AttachOptions::default()
    };
    let platform = attach_with(&fw, &FakeDmi::default(), &opts);

    assert!(platform.hwmon().is_err());
    assert!(platform.lightbar().is_err());
    assert!(platform.events().is_none());
    assert!(platform.debug_registers().is_ok());
}

#[test]
fn hidden_attributes_are_unsupported() {
    let fw = FakeFirmware::new();
    let platform = attach(&fw, &FakeDmi::default());
    fw.clear_calls();

    assert!(matches!(
        platform.attrs().get(PlatformAttr::SilentMode),
        Err(EcError::Unsupported(_))
    ));
    assert!(matches!(
        platform.attrs().set(PlatformAttr::FnLock, true),
        Err(EcError::Unsupported(_))
    ));
    assert_eq!(fw.call_count(), 0);
}

#[test]
fn attribute_bits_are_read_and_written_in_place() {
    let fw = FakeFirmware::new();
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());
    let attrs = platform.attrs();

    fw.poke(BIOS_CTRL_3, 0b0000_0001);
    attrs.set(PlatformAttr::FanAlwaysOn, true).unwrap();
    assert_eq!(fw.peek(BIOS_CTRL_3), 0b0100_0001);
    assert!(attrs.get(PlatformAttr::FanAlwaysOn).unwrap());
    assert!(!attrs.get(PlatformAttr::FanReducedDutyCycle).unwrap());

    attrs.set(PlatformAttr::FnLock, true).unwrap();
    assert_eq!(fw.peek(BIOS_CTRL_1), 0b0001_0000);
    assert!(attrs.get(PlatformAttr::FnLock).unwrap());
}

#[test]
fn super_key_lock_is_toggled_through_the_trigger() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b0010_0000)]);
    let platform = attach(&fw, &FakeDmi::default());
    let attrs = platform.attrs();

    fw.poke(STATUS_1, 0);
    attrs.set(PlatformAttr::SuperKeyLock, false).unwrap();
    assert_eq!(fw.peek(TRIGGER_1), 0);

    attrs.set(PlatformAttr::SuperKeyLock, true).unwrap();
    assert_eq!(fw.peek(TRIGGER_1), 0x01);
}

#[test]
fn charge_threshold_maps_no_limit_to_100() {
    let fw = FakeFirmware::new();
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());
    let battery = platform.battery().unwrap();

    fw.poke(BATT_CHARGE_CTRL, 0x80);
    assert_eq!(battery.charge_end_threshold().unwrap(), 100);

    battery.set_charge_end_threshold(80).unwrap();
    assert_eq!(fw.peek(BATT_CHARGE_CTRL), 0x80 | 80);
    assert_eq!(battery.charge_end_threshold().unwrap(), 80);

    battery.set_charge_end_threshold(100).unwrap();
    assert_eq!(fw.peek(BATT_CHARGE_CTRL), 0x80);

    for bad in [0, 101, -5] {
        assert!(matches!(
            battery.set_charge_end_threshold(bad),
            Err(EcError::InvalidArgument(_))
        ));
    }
}

#[test]
fn lightbar_colour_and_switches() {
    let fw = FakeFirmware::with_regs(&[(SUPPORT_1, 0b0100_0000)]);
    let platform = attach(&fw, &FakeDmi::default());
    let lightbar = platform.lightbar().unwrap();

    fw.clear_calls();
    lightbar.set_color(123).unwrap();
    let writes: Vec<_> = fw.requests().into_iter().map(|r| (r.addr, r.data)).collect();
    assert_eq!(
        writes,
        vec![(LIGHTBAR_BLUE, 12), (LIGHTBAR_GREEN, 8), (LIGHTBAR_RED, 4)]
    );
    assert_eq!(lightbar.color().unwrap(), 123);

    // off-table raw value reads as level 0
    fw.poke(LIGHTBAR_GREEN, 5);
    assert_eq!(lightbar.color().unwrap(), 103);

    assert!(matches!(
        lightbar.set_color(1000),
        Err(EcError::InvalidArgument(_))
    ));

    fw.poke(LIGHTBAR_CTRL, 0b0000_1100);
    assert!(!lightbar.brightness().unwrap());
    lightbar.set_brightness(true).unwrap();
    assert_eq!(fw.peek(LIGHTBAR_CTRL), 0b0000_1000);
    assert!(lightbar.brightness().unwrap());
    assert!(!lightbar.brightness_s3().unwrap());

    lightbar.set_rainbow_mode(true).unwrap();
    assert_eq!(fw.peek(LIGHTBAR_CTRL), 0b1000_1000);
}

#[test]
fn fn_esc_writes_the_fn_lock_state_back() {
    let fw = FakeFirmware::with_regs(&[(DEVICE_STATUS, 0x80)]);
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());
    let events = platform.events().unwrap();
    assert!(events.rfkill_switch());

    // EC already flipped the state when the event arrives
    fw.poke(BIOS_CTRL_1, 0b0001_0000);
    fw.clear_calls();
    fw.set_event(0xd2, AcpiObject::Integer(184));
    events.handle_notify(0xd2).unwrap();

    let reqs = fw.requests();
    let last = reqs.last().unwrap();
    assert!(!last.read);
    assert_eq!((last.addr, last.data), (BIOS_CTRL_1, 0b0001_0000));

    let recent = events.recent();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].code, 184);
    assert_eq!(recent[0].key.as_deref(), Some("fn_esc"));
}

#[test]
fn radio_codes_set_the_rfkill_switch() {
    let fw = FakeFirmware::new();
    let platform = attach(&fw, &FakeDmi::default());
    let events = platform.events().unwrap();

    // wifi bit clear
    assert!(!events.rfkill_switch());
    events.handle_code(0x1a);
    assert!(events.rfkill_switch());
    events.handle_code(0x1b);
    assert!(!events.rfkill_switch());

    // ignored keys leave no trace
    assert!(events.handle_code(0x35).is_none());
    assert_eq!(events.recent().len(), 2);

    let unknown = events.handle_code(250).unwrap();
    assert_eq!(unknown.key, None);
    assert_eq!(unknown.description, None);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reported {
    Key(HotKey),
    Switch(bool),
}

struct RecordingInput {
    reported: Arc<Mutex<Vec<Reported>>>,
    fail: bool,
}

impl InputSink for RecordingInput {
    fn key(&self, key: HotKey) -> io::Result<()> {
        self.reported.lock().push(Reported::Key(key));
        if self.fail {
            return Err(io::Error::other("uinput gone"));
        }
        Ok(())
    }

    fn rfkill_switch(&self, on: bool) -> io::Result<()> {
        self.reported.lock().push(Reported::Switch(on));
        Ok(())
    }
}

fn handler_with_input(
    fw: &Arc<FakeFirmware>,
    platform: &Platform,
    fail: bool,
) -> (EventHandler, Arc<Mutex<Vec<Reported>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let input = RecordingInput {
        reported: Arc::clone(&reported),
        fail,
    };
    let wmi: Arc<dyn WmiBus> = fw.clone();
    let handler = EventHandler::new(wmi, platform.attrs().clone(), Some(Box::new(input)));
    (handler, reported)
}

#[test]
fn mapped_hotkeys_are_reported_as_input_events() {
    let fw = FakeFirmware::with_regs(&[(DEVICE_STATUS, 0x80)]);
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());
    // attaching without `input_device` leaves uinput alone
    assert!(!platform.events().unwrap().has_input());

    let (events, reported) = handler_with_input(&fw, &platform, false);
    assert!(events.has_input());

    for code in [0xb1, 0x35, 0x1b, 0xa4, 250, 0xb2, 0xb8] {
        events.handle_code(code);
    }

    assert_eq!(
        *reported.lock(),
        vec![
            // initial switch position from the wifi bit
            Reported::Switch(true),
            Reported::Key(HotKey::KbdIllumDown),
            Reported::Switch(false),
            Reported::Key(HotKey::Rfkill),
            Reported::Key(HotKey::KbdIllumUp),
            Reported::Key(HotKey::FnEsc),
        ]
    );
}

#[test]
fn input_errors_do_not_stop_event_handling() {
    let fw = FakeFirmware::new();
    let platform = attach(&fw, &FakeDmi::qc71_with_blank_oem());
    let (events, reported) = handler_with_input(&fw, &platform, true);

    let event = events.handle_code(0xb1).unwrap();
    assert_eq!(event.key.as_deref(), Some("kbd_illum_down"));
    assert_eq!(events.recent().len(), 1);
    assert_eq!(reported.lock().len(), 2);
}

//! End-to-end tests: register model and flash programmer over the simulated stub

use std::time::Duration;

use svdlink_core::access::{BitBand, MemoryAccess};
use svdlink_core::config::{ConnectionConfig, ScanKind};
use svdlink_core::flash::NoProgress;
use svdlink_core::svd::Device;
use svdlink_core::Error;
use svdlink_rsp::protocol::{reg, signal, NVIC_ICER, NVIC_ICPR};
use svdlink_rsp::{select_target, SharedTarget, Target};

use super::*;

const SVD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<device>
  <name>SIM</name>
  <peripherals>
    <peripheral>
      <name>GPIO</name>
      <baseAddress>0x40000000</baseAddress>
      <registers>
        <register>
          <name>ODR</name>
          <description>Output data</description>
          <addressOffset>0x4</addressOffset>
          <fields>
            <field><name>PIN0</name><bitOffset>0</bitOffset><bitWidth>1</bitWidth></field>
          </fields>
        </register>
      </registers>
    </peripheral>
  </peripherals>
</device>"#;

const MEMORY_MAP: &str = r#"<?xml version="1.0"?>
<!DOCTYPE memory-map PUBLIC "+//IDN gnu.org//DTD GDB Memory Map V1.0//EN" "http://sourceware.org/gdb/gdb-memory-map.dtd">
<memory-map>
  <memory type="flash" start="0x08000000" length="0x800">
    <property name="blocksize">0x400</property>
  </memory>
  <memory type="ram" start="0x20000000" length="0x2000"/>
</memory-map>"#;

fn target(config: DummyConfig) -> Target<DummyStub> {
    let mut target = Target::new(DummyStub::new(config)).unwrap();
    target.set_timeout(Duration::from_millis(200));
    target
}

fn stub(target: &mut Target<DummyStub>) -> &mut DummyStub {
    target.rsp_mut().transport_mut()
}

fn with_memory_map() -> DummyConfig {
    DummyConfig {
        memory_map_xml: Some(MEMORY_MAP.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_field_read_write_over_rsp() {
    let device = Device::from_svd_str(SVD).unwrap();
    let mut target = target(DummyConfig {
        default_word: 1,
        ..Default::default()
    });

    {
        let mut bound = device.bind(&mut target);
        assert_eq!(bound.read("GPIO.ODR.PIN0").unwrap().value, 1);
    }

    stub(&mut target).clear_requests();
    device.bind(&mut target).write("GPIO.ODR.PIN0", 0).unwrap();
    assert_eq!(stub(&mut target).count_requests(b"X"), 1);
    assert_eq!(stub(&mut target).word(0x4000_0004), 0);

    assert_eq!(
        device.bind(&mut target).read("GPIO.ODR.PIN0").unwrap().value,
        0
    );
}

#[test]
fn test_bit_band_write_is_single_alias_access() {
    let device = Device::from_svd_str(SVD).unwrap();
    let mut target = target(DummyConfig::default());
    stub(&mut target).clear_requests();

    device
        .bind(BitBand::new(&mut target))
        .write("GPIO.ODR.PIN0", 1)
        .unwrap();

    let requests = stub(&mut target).requests().to_vec();
    assert_eq!(requests.len(), 1);
    // 0x42000000 + 4 * 32 + 0 * 4
    assert!(requests[0].starts_with(b"X42000080,00000004:"));
}

#[test]
fn test_dump_over_rsp() {
    let device = Device::from_svd_str(SVD).unwrap();
    let mut target = target(DummyConfig {
        default_word: 0x0000_0001,
        ..Default::default()
    });
    let text = device.bind(&mut target).dump("GPIO").unwrap();
    assert!(text.contains("GPIO.ODR"));
    assert!(text.contains("PIN0 = 0x1"));
}

#[test]
fn test_corrupted_replies_are_retried() {
    let mut target = target(DummyConfig::default());
    stub(&mut target).poke(0x2000_0000, &[0x78, 0x56, 0x34, 0x12]);
    stub(&mut target).corrupt_next_replies(2);
    assert_eq!(target.read_u32(0x2000_0000).unwrap(), 0x1234_5678);
}

#[test]
fn test_read_fault_is_address_tagged() {
    let mut target = target(DummyConfig::default());
    stub(&mut target).fail_reads(0x3000_0000..0x3000_0100);
    match target.read_memory(0x3000_0000, 8) {
        Err(Error::TargetMemory { addr, .. }) => assert_eq!(addr, 0x3000_0000),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_large_read_is_chunked() {
    let mut target = target(DummyConfig {
        packet_size: 0x40,
        ..Default::default()
    });
    let data: Vec<u8> = (0..100u8).collect();
    target.write_memory(0x2000_0000, &data).unwrap();
    assert_eq!(target.read_memory(0x2000_0000, 100).unwrap(), data);
    // 0x40 / 2 = 32 bytes per read
    assert_eq!(stub(&mut target).count_requests(b"m"), 4);
    // 0x40 - 44 = 20 bytes per write
    assert_eq!(stub(&mut target).count_requests(b"X"), 5);
}

#[test]
fn test_flash_write_hex() {
    let mut target = target(with_memory_map());
    let hex = ":0404000001020304EE\n:00000001FF\n";
    let ((low, high), summaries) = target
        .flash_write_hex(
            &format!(":020000040800F2\n{}", hex),
            true,
            &mut NoProgress,
        )
        .unwrap();
    assert_eq!((low, high), (0x0800_0400, 0x0800_0404));
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].blocks_written, 1);

    let sim = stub(&mut target);
    assert_eq!(sim.peek(0x0800_0400, 5), [1, 2, 3, 4, 0xFF]);
    assert_eq!(sim.count_requests(b"vFlashErase:08000400,00000400"), 1);
    assert_eq!(sim.count_requests(b"vFlashDone"), 1);

    // Nothing staged: no flash traffic at all
    sim.clear_requests();
    target.flash_commit(true, &mut NoProgress).unwrap();
    assert_eq!(stub(&mut target).count_requests(b"vFlash"), 0);
}

#[test]
fn test_flash_without_erase_keeps_cleared_bits() {
    let mut target = target(with_memory_map());
    target.probe().unwrap();
    target.flash_stage(0x0800_0000, &[0x0F]).unwrap();
    target.flash_commit(true, &mut NoProgress).unwrap();
    target.flash_stage(0x0800_0000, &[0xF0]).unwrap();
    target.flash_commit(false, &mut NoProgress).unwrap();
    assert_eq!(stub(&mut target).peek(0x0800_0000, 1), [0x00]);
}

#[test]
fn test_run_stub_sets_up_core() {
    let mut target = target(with_memory_map());
    target.probe().unwrap();
    let code = [0x00, 0xBE, 0x00, 0xBE];
    target
        .run_stub(&code, 0x2000_0100, &[1, 2, 3], None)
        .unwrap();

    let sim = stub(&mut target);
    assert_eq!(sim.peek(0x2000_0100, 4), code);
    assert_eq!(sim.word(NVIC_ICER), 0xFFFF_FFFF);
    assert_eq!(sim.word(NVIC_ICPR + 28), 0xFFFF_FFFF);
    let regs = sim.registers();
    assert_eq!(&regs[..3], &[1, 2, 3]);
    assert_eq!(regs[reg::PC], 0x2000_0100);
    assert_eq!(regs[reg::MSP], 0x2000_2000);
    assert_eq!(regs[reg::PSP], 0x2000_2000);
    assert_eq!(sim.count_requests(b"X"), 3);

    // Same binary at the same address is not reloaded
    target.run_stub(&code, 0x2000_0100, &[], None).unwrap();
    assert_eq!(stub(&mut target).count_requests(b"X"), 3);
    assert_eq!(stub(&mut target).count_requests(b"c"), 2);

    // A different binary is
    target.run_stub(&[0; 8], 0x2000_0100, &[], None).unwrap();
    assert_eq!(stub(&mut target).count_requests(b"X"), 6);
}

#[test]
fn test_run_stub_skips_console_output() {
    let mut target = target(with_memory_map());
    target.probe().unwrap();
    stub(&mut target).queue_console_output("hello\n");
    target.run_stub(&[0; 4], 0x2000_0000, &[], None).unwrap();
}

#[test]
fn test_stub_fault_is_reported() {
    let mut target = target(DummyConfig {
        stop_signal: Some(signal::SIGSEGV),
        ..with_memory_map()
    });
    target.probe().unwrap();
    match target.run_stub(&[0; 4], 0x2000_0000, &[], None) {
        Err(Error::StubResponse {
            expected, received, ..
        }) => {
            assert_eq!(expected, signal::SIGTRAP);
            assert_eq!(received, Some(signal::SIGSEGV));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_hung_stub_times_out_then_interrupts() {
    let mut target = target(DummyConfig {
        stop_signal: None,
        ..with_memory_map()
    });
    target.probe().unwrap();
    assert!(matches!(
        target.run_stub(&[0; 4], 0x2000_0000, &[], Some(Duration::from_millis(50))),
        Err(Error::Timeout)
    ));
    assert!(stub(&mut target).is_running());

    target.interrupt().unwrap();
    assert!(!stub(&mut target).is_running());

    // The interrupt forgot the resident stub
    stub(&mut target).clear_requests();
    let _ = target.run_stub(&[0; 4], 0x2000_0000, &[], Some(Duration::from_millis(50)));
    assert_eq!(stub(&mut target).count_requests(b"X"), 3);
}

#[test]
fn test_scan_and_attach() {
    let mut target = target(DummyConfig {
        targets: vec!["STM32F1 medium density M3".to_string(), "Other".to_string()],
        ..Default::default()
    });
    assert_eq!(target.target_name().unwrap(), None);

    let config = ConnectionConfig {
        scan: Some(ScanKind::Swd),
        ..Default::default()
    };
    select_target(&mut target, &config).unwrap();
    assert_eq!(stub(&mut target).attached(), Some(1));
    assert_eq!(
        target.target_name().unwrap().as_deref(),
        Some("STM32F1 medium density M3")
    );

    let targets = target.targets().unwrap();
    assert_eq!(targets.len(), 2);
    assert!(targets[0].connected && !targets[1].connected);

    assert!(matches!(target.attach(7), Err(Error::ConnectionFailed(_))));
    target.detach().unwrap();
    assert_eq!(stub(&mut target).attached(), None);
}

#[test]
fn test_shared_target_across_threads() {
    let shared = SharedTarget::new(target(DummyConfig::default()));
    let handles: Vec<_> = (0..4u8)
        .map(|bit| {
            let mut t = shared.clone();
            std::thread::spawn(move || t.set_bit(0x2000_0000, bit))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    let mut t = shared.clone();
    assert_eq!(t.read_u32(0x2000_0000).unwrap(), 0xF);
}

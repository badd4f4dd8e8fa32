//! VPU 设备生命周期测试
//!
//! 引用计数、最后一次关闭时的强制关闭、紧急停止与全局恢复

mod common;

use std::thread;
use std::time::Duration;

use common::{setup, setup_with, test_config, wait_until};
use vm_vpu::{BusPriority, ForceCloseReport, VpuConfig, VpuError, VpuOp};

#[test]
fn test_refcount_powers_hardware_once() {
    let (sim, vpu) = setup();

    let first = vpu.open_device().unwrap();
    let second = vpu.open_device().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(vpu.open_count(), 2);
    assert_eq!(sim.clock_enable_count(), 1);
    assert_eq!(sim.bus_priority(), BusPriority::Codec);

    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();

    vpu.close_device(first);
    assert_eq!(vpu.open_count(), 1);
    assert!(sim.clocks_enabled());
    assert!(!vpu.instance(0).unwrap().closed);

    vpu.close_device(second);
    assert_eq!(vpu.open_count(), 0);
    assert!(vpu.instance(0).unwrap().closed);
    assert!(!sim.clocks_enabled());
    assert!(!sim.irq_enabled());
    assert!(!sim.device_pool_ready());
    assert_eq!(sim.bus_priority(), BusPriority::Default);
}

#[test]
fn test_concurrent_open_close() {
    let (sim, vpu) = setup();

    thread::scope(|s| {
        for _ in 0..8 {
            let vpu = &vpu;
            s.spawn(move || {
                let token = vpu.open_device().unwrap();
                assert!(vpu.is_open());
                vpu.close_device(token);
            });
        }
    });

    assert_eq!(vpu.open_count(), 0);
    assert!(!sim.clocks_enabled());
    assert_eq!(sim.clock_enable_count(), sim.clock_disable_count());
}

#[test]
fn test_open_fails_when_pool_unavailable() {
    let (sim, vpu) = setup();
    sim.set_device_pool_unavailable(true);

    assert!(matches!(vpu.open_device(), Err(VpuError::NoMemory(_))));
    assert_eq!(vpu.open_count(), 0);
    assert!(!sim.clocks_enabled());

    sim.set_device_pool_unavailable(false);
    let token = vpu.open_device().unwrap();
    assert_eq!(vpu.open_count(), 1);
    vpu.close_device(token);
}

#[test]
fn test_last_close_closes_open_instances() {
    let (sim, vpu) = setup();
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 3, Vec::new()).unwrap();

    vpu.close_device(token);

    let closes = sim
        .calls()
        .into_iter()
        .filter(|call| call.op == VpuOp::Close)
        .count();
    assert_eq!(closes, 2);
    assert_eq!(vpu.open_instances(), 0);
    assert!(sim.allocated_pools().is_empty());
    assert_eq!(sim.reset_count(), 0);
}

#[test]
fn test_close_after_forced_close_is_safe() {
    let (sim, vpu) = setup();
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();

    assert!(vpu.recover());
    vpu.close_device(token);

    assert_eq!(vpu.open_count(), 0);
    assert!(!sim.clocks_enabled());
    assert_eq!(sim.reset_count(), 1);
}

#[test]
fn test_recover_is_idempotent_until_reopen() {
    let (sim, vpu) = setup();
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 1, Vec::new()).unwrap();

    assert!(vpu.recover());
    assert_eq!(vpu.open_instances(), 0);
    assert!(sim.allocated_pools().is_empty());
    assert_eq!(sim.reset_count(), 1);

    assert!(!vpu.recover());
    assert_eq!(sim.reset_count(), 1);
    assert_eq!(vpu.stats().recoveries, 1);

    // 新打开的实例清除强制关闭标志
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    assert!(vpu.recover());
    assert_eq!(sim.reset_count(), 2);

    vpu.close_device(token);
}

#[test]
fn test_emergency_stop_closes_through_worker() {
    let (sim, vpu) = setup();
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 1, Vec::new()).unwrap();

    let report = vpu.emergency_stop();
    assert_eq!(
        report,
        ForceCloseReport {
            requested: 2,
            closed_by_command: 2,
            forced: 0,
            hardware_reset: false,
        }
    );
    assert_eq!(vpu.open_instances(), 0);
    assert!(sim.allocated_pools().is_empty());
    assert_eq!(vpu.stats().emergency_stops, 1);

    assert_eq!(vpu.emergency_stop(), ForceCloseReport::default());

    vpu.submit(VpuOp::Init, 2, Vec::new()).unwrap();
    assert_eq!(vpu.emergency_stop().requested, 1);

    vpu.close_device(token);
}

#[test]
fn test_emergency_stop_with_stuck_hardware() {
    let config = VpuConfig {
        hw_timeout_ms: 500,
        force_close_timeout_ms: 50,
        ..test_config()
    };
    let (sim, vpu) = setup_with(config);
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 1, Vec::new()).unwrap();

    sim.hang_next(1);
    thread::scope(|s| {
        let vpu = &vpu;
        let stuck = s.spawn(move || vpu.submit(VpuOp::Decode, 0, Vec::new()));
        assert!(wait_until(Duration::from_secs(1), || sim.in_flight() == 1));

        let report = vpu.emergency_stop();
        assert_eq!(report.requested, 2);
        assert_eq!(report.closed_by_command, 0);
        assert_eq!(report.forced, 2);
        assert!(report.hardware_reset);
        assert_eq!(vpu.open_instances(), 0);
        assert_eq!(sim.reset_count(), 1);

        assert!(matches!(
            stuck.join().unwrap(),
            Err(VpuError::FatalTimeout { .. })
        ));
    });

    // 超时已由强制关闭处理，不会再触发一次恢复
    assert_eq!(sim.reset_count(), 1);
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Decode, 0, Vec::new()).unwrap();

    vpu.close_device(token);
}

#[test]
fn test_timeout_during_emergency_stop_resets_hardware() {
    let config = VpuConfig {
        hw_timeout_ms: 50,
        force_close_timeout_ms: 500,
        ..test_config()
    };
    let (sim, vpu) = setup_with(config);
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 1, Vec::new()).unwrap();

    sim.hang_next(1);
    thread::scope(|s| {
        let vpu = &vpu;
        let stuck = s.spawn(move || vpu.submit(VpuOp::Decode, 0, Vec::new()));
        assert!(wait_until(Duration::from_secs(1), || sim.in_flight() == 1));

        // Close 排在挂死的 Decode 之后，超时后不再送往硬件
        let report = vpu.emergency_stop();
        assert_eq!(report.requested, 2);
        assert_eq!(report.closed_by_command, 0);
        assert_eq!(report.forced, 2);
        assert!(report.hardware_reset);

        assert!(matches!(
            stuck.join().unwrap(),
            Err(VpuError::FatalTimeout { .. })
        ));
    });

    assert_eq!(sim.reset_count(), 1);
    assert_eq!(vpu.open_instances(), 0);
    assert!(sim.allocated_pools().is_empty());
    let closes = sim
        .calls()
        .into_iter()
        .filter(|call| call.op == VpuOp::Close)
        .count();
    assert_eq!(closes, 0);

    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Decode, 0, Vec::new()).unwrap();
    assert_eq!(sim.max_in_flight(), 1);

    vpu.close_device(token);
}

#[test]
fn test_timeout_during_last_close_resets_hardware() {
    let config = VpuConfig {
        hw_timeout_ms: 50,
        close_wait_ms: 500,
        ..test_config()
    };
    let (sim, vpu) = setup_with(config);
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Init, 1, Vec::new()).unwrap();

    sim.hang_next(1);
    thread::scope(|s| {
        let vpu = &vpu;
        let stuck = s.spawn(move || vpu.submit(VpuOp::Decode, 1, Vec::new()));
        assert!(wait_until(Duration::from_secs(1), || sim.in_flight() == 1));

        vpu.close_device(token);
        assert!(matches!(
            stuck.join().unwrap(),
            Err(VpuError::FatalTimeout { .. })
        ));
    });

    assert_eq!(vpu.open_count(), 0);
    assert_eq!(vpu.open_instances(), 0);
    assert_eq!(sim.reset_count(), 1);
    assert_eq!(sim.in_flight(), 0);
    assert!(!sim.clocks_enabled());
    assert!(sim.allocated_pools().is_empty());

    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Decode, 0, Vec::new()).unwrap();
    assert_eq!(sim.max_in_flight(), 1);
    vpu.close_device(token);
}

#[test]
fn test_timeout_after_recovery_still_resets() {
    let (sim, vpu) = setup();
    let token = vpu.open_device().unwrap();
    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();

    assert!(vpu.recover());
    assert_eq!(sim.reset_count(), 1);
    assert!(vpu.is_force_closed());

    // 没有成功的 Init，强制关闭标志仍然置位
    sim.hang_next(1);
    assert!(matches!(
        vpu.submit(VpuOp::Init, 0, Vec::new()),
        Err(VpuError::FatalTimeout { op: VpuOp::Init, .. })
    ));
    assert_eq!(sim.reset_count(), 2);
    assert_eq!(vpu.stats().recoveries, 2);
    assert!(sim.allocated_pools().is_empty());

    vpu.submit(VpuOp::Init, 0, Vec::new()).unwrap();
    vpu.submit(VpuOp::Decode, 0, Vec::new()).unwrap();
    assert_eq!(sim.max_in_flight(), 1);

    vpu.close_device(token);
}

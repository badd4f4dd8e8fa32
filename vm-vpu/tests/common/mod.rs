//! VPU 集成测试公共工具

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use vm_vpu::{Platform, SimVpu, VpuConfig, VpuDevice};

/// 测试用的短超时配置
pub fn test_config() -> VpuConfig {
    VpuConfig {
        hw_timeout_ms: 50,
        idle_poll_ms: 5,
        force_close_timeout_ms: 200,
        close_wait_ms: 200,
        worker_name: "vpu-test-worker".to_string(),
        ..Default::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 创建使用模拟硬件的 VPU
pub fn setup() -> (Arc<SimVpu>, VpuDevice) {
    setup_with(test_config())
}

pub fn setup_with(config: VpuConfig) -> (Arc<SimVpu>, VpuDevice) {
    init_logging();
    let sim = Arc::new(SimVpu::new());
    let vpu = VpuDevice::new(config, Platform::from_single(Arc::clone(&sim)))
        .expect("failed to create VPU");
    (sim, vpu)
}

/// 轮询等待条件成立
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

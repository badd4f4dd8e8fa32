//! 硬件网关
//!
//! 对 Worker 而言是同步调用：发起一次硬件操作，然后带超时等待完成中断。
//! 超时意味着整个硬件块被认为已挂死：网关置位 `fatal_pending` 并返回 [`HwOutcome::Fatal`]，
//! 由上层触发全局恢复。复位之前的调用都被短路，不会送往挂死的硬件；等待期间硬件已被复位的超时不再置位。

use std::sync::Arc;
use std::time::Duration;

use crate::command::{HwResponse, HwStatus, InstanceHandle, VpuOp};
use crate::completion::IrqEvent;
use crate::lifecycle::DeviceState;
use crate::platform::{CodecEngine, InterruptSource};

/// 一次硬件调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwOutcome {
    /// 中断按时到达（或硬件拒绝启动），携带硬件状态
    Completed(HwResponse),
    /// 超时未收到中断，或恢复进行中被短路
    Fatal,
}

/// 硬件网关
pub struct HardwareGateway {
    engine: Arc<dyn CodecEngine>,
    irq: Arc<dyn InterruptSource>,
    event: Arc<IrqEvent>,
    device: Arc<DeviceState>,
    timeout: Duration,
}

impl HardwareGateway {
    /// 创建硬件网关
    pub fn new(
        engine: Arc<dyn CodecEngine>,
        irq: Arc<dyn InterruptSource>,
        device: Arc<DeviceState>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            irq,
            event: Arc::new(IrqEvent::new()),
            device,
            timeout,
        }
    }

    /// 订阅并使能完成中断
    pub fn attach(&self) {
        self.event.arm();
        self.irq.subscribe(Arc::clone(&self.event));
        self.irq.enable();
    }

    /// 关闭并退订完成中断
    pub fn detach(&self) {
        self.irq.disable();
        self.irq.unsubscribe();
    }

    /// 等待中断的超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行一次硬件调用
    pub fn execute(&self, op: VpuOp, handle: Option<InstanceHandle>, args: &[u8]) -> HwOutcome {
        if self.device.is_shutting_down() || self.device.is_fatal_pending() {
            log::warn!("VPU gateway: {} short-circuited, hardware awaiting reset", op);
            return HwOutcome::Fatal;
        }

        let epoch = self.device.reset_epoch();
        self.event.arm();
        if let Err(code) = self.engine.start(op, handle, args) {
            log::debug!("VPU gateway: {} refused to start, status {:#x}", op, code);
            return HwOutcome::Completed(HwResponse::with_status(HwStatus::Failed(code)));
        }

        if !self.event.wait_timeout(self.timeout) {
            log::warn!(
                "VPU gateway: no completion interrupt for {} within {} ms",
                op,
                self.timeout.as_millis()
            );
            // 等待期间硬件块已被复位，这次调用随复位一起终止
            if self.device.reset_epoch() == epoch {
                self.device.set_fatal_pending(true);
            }
            return HwOutcome::Fatal;
        }

        let response = self.engine.finish(op, handle);
        if response.status == HwStatus::InsufficientInput {
            log::debug!("VPU gateway: {} needs more input", op);
        }
        HwOutcome::Completed(response)
    }
}

//! 平台协作者接口
//!
//! VPU 核心只依赖这些接口，不关心寄存器布局和时钟树细节：
//! - [`CodecEngine`]：发起一次硬件调用，中断到达后读回结果
//! - [`ClockController`]：总线/外设时钟开关、复位线、总线优先级
//! - [`MemoryPool`]：设备级和实例级内存池
//! - [`InterruptSource`]：完成中断的订阅与使能

use std::fmt;
use std::sync::Arc;

use crate::command::{HwResponse, InstanceHandle, InstanceId, VpuOp};
use crate::completion::IrqEvent;
use crate::error::PoolError;

/// 编解码引擎
pub trait CodecEngine: Send + Sync {
    /// 发起一次硬件调用，立即返回；完成时由中断源触发 [`IrqEvent`]
    ///
    /// 返回 `Err(code)` 表示硬件拒绝启动，不会产生中断。
    fn start(&self, op: VpuOp, handle: Option<InstanceHandle>, args: &[u8]) -> Result<(), u32>;

    /// 中断到达后读回状态、句柄和输出数据
    fn finish(&self, op: VpuOp, handle: Option<InstanceHandle>) -> HwResponse;
}

/// 总线优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusPriority {
    /// 复位默认值
    #[default]
    Default,
    /// 解码期间提升的优先级
    Codec,
}

/// 时钟与复位控制器
pub trait ClockController: Send + Sync {
    fn enable_clocks(&self);
    fn disable_clocks(&self);
    fn assert_reset(&self);
    fn deassert_reset(&self);
    fn set_bus_priority(&self, priority: BusPriority);
}

/// 内存池分配器
pub trait MemoryPool: Send + Sync {
    /// 初始化设备级后备内存池
    fn init_device(&self) -> Result<(), PoolError>;
    /// 释放设备级后备内存池
    fn free_device(&self);
    /// 为实例分配内存池
    fn pool_init(&self, instance: InstanceId) -> Result<(), PoolError>;
    /// 释放实例内存池
    fn pool_free(&self, instance: InstanceId);
}

/// 完成中断源
pub trait InterruptSource: Send + Sync {
    /// 订阅完成中断，每次真实的硬件完成触发一次 `event`
    fn subscribe(&self, event: Arc<IrqEvent>);
    fn unsubscribe(&self);
    fn enable(&self);
    fn disable(&self);
}

/// 平台协作者集合
#[derive(Clone)]
pub struct Platform {
    pub engine: Arc<dyn CodecEngine>,
    pub clocks: Arc<dyn ClockController>,
    pub pool: Arc<dyn MemoryPool>,
    pub irq: Arc<dyn InterruptSource>,
}

impl Platform {
    /// 由单一对象实现全部接口的平台（例如模拟器）
    pub fn from_single<T>(device: Arc<T>) -> Self
    where
        T: CodecEngine + ClockController + MemoryPool + InterruptSource + 'static,
    {
        Self {
            engine: device.clone(),
            clocks: device.clone(),
            pool: device.clone(),
            irq: device,
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

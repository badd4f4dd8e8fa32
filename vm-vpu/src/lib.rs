//! # vm-vpu - VPU 编解码作业调度
//!
//! 多个逻辑解码实例共享同一个物理 VPU 硬件块。所有命令进入一个 FIFO 队列，
//! 由唯一的 Worker 线程逐条送往硬件，提交者阻塞等待自己的结果。
//!
//! - [`VpuDevice`]：子系统入口，打开/关闭设备、提交命令、紧急停止
//! - [`JobQueue`] / [`Worker`]：FIFO 队列与单线程调度
//! - [`HardwareGateway`]：一次硬件调用 + 带超时的完成中断等待
//! - [`LifecycleManager`]：设备引用计数、全局恢复、强制关闭
//! - [`platform`]：时钟、内存池、中断源、编解码引擎接口；[`SimVpu`] 为内存模拟实现
//!
//! ```no_run
//! use std::sync::Arc;
//! use vm_vpu::{Platform, SimVpu, VpuConfig, VpuDevice, VpuOp};
//!
//! let sim = Arc::new(SimVpu::new());
//! let vpu = VpuDevice::new(VpuConfig::default(), Platform::from_single(sim))?;
//! let token = vpu.open_device()?;
//! let reply = vpu.submit(VpuOp::Init, 0, Vec::new())?;
//! assert!(reply.handle.is_some());
//! vpu.submit(VpuOp::Close, 0, Vec::new())?;
//! vpu.close_device(token);
//! # Ok::<(), vm_vpu::VpuError>(())
//! ```

pub mod command;
pub mod completion;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod instance;
pub mod lifecycle;
pub mod platform;
pub mod queue;
pub mod sim;
pub mod stats;
pub mod worker;

pub use command::{
    Command, CommandResult, HwResponse, HwStatus, InstanceHandle, InstanceId, Reply, Ticket, VpuOp,
};
pub use completion::{Completion, IrqEvent};
pub use config::{MAX_INSTANCE_SLOTS, VpuConfig};
pub use device::{DeviceToken, VpuDevice};
pub use error::{PoolError, VpuError, VpuResult};
pub use gateway::{HardwareGateway, HwOutcome};
pub use instance::{InstanceSnapshot, InstanceTable};
pub use lifecycle::{DeviceState, ForceCloseReport, LifecycleManager, WaitBudget};
pub use platform::{BusPriority, ClockController, CodecEngine, InterruptSource, MemoryPool, Platform};
pub use queue::JobQueue;
pub use sim::{SIM_VERSION, SimCall, SimVpu};
pub use stats::{StatsRecorder, VpuStats};
pub use worker::{Worker, WorkerContext, WorkerState};

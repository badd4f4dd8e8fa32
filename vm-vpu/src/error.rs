//! VPU 错误类型
//!
//! 命令结果与设备生命周期共用的错误分类：
//! - 拒绝类：设备未打开、目标实例无效、未知操作码
//! - 硬件状态：一次完成的硬件调用返回的非成功状态码
//! - 致命超时：硬件在规定时间内没有发出完成中断，触发全局恢复
//! - 分配失败：实例或设备内存池耗尽

use thiserror::Error;

use crate::command::{InstanceId, VpuOp};

/// VPU 操作结果
pub type VpuResult<T> = Result<T, VpuError>;

/// VPU 子系统错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VpuError {
    #[error("VPU device is not open")]
    NotOpen,

    #[error("Invalid target instance: {0}")]
    InvalidTarget(InstanceId),

    #[error("Unknown VPU operation code: {0:#x}")]
    UnknownOp(u32),

    #[error("Hardware returned status {code:#x} for {op:?}")]
    Hardware { op: VpuOp, code: u32 },

    #[error("Hardware did not complete {op:?} within {timeout_ms} ms")]
    FatalTimeout { op: VpuOp, timeout_ms: u64 },

    #[error("Instance memory allocation failed: {0}")]
    AllocationFailed(String),

    #[error("VPU memory pool unavailable: {0}")]
    NoMemory(String),

    #[error("VPU subsystem is busy or shutting down")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VpuError {
    /// 是否为致命超时（需要全局恢复）
    pub fn is_fatal(&self) -> bool {
        matches!(self, VpuError::FatalTimeout { .. })
    }

    /// 是否为提交阶段的拒绝（没有触及硬件）
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            VpuError::NotOpen | VpuError::InvalidTarget(_) | VpuError::UnknownOp(_) | VpuError::Busy
        )
    }
}

/// 内存池分配器错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Memory pool exhausted")]
    Exhausted,

    #[error("Memory pool unavailable: {0}")]
    Unavailable(String),
}

impl From<PoolError> for VpuError {
    fn from(err: PoolError) -> Self {
        VpuError::AllocationFailed(err.to_string())
    }
}

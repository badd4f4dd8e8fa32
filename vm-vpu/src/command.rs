//! VPU 命令
//!
//! 命令是排队执行的工作单元：操作、目标实例、实例句柄和不透明参数。
//! 提交者持有 [`Ticket`] 等待结果，命令本身在队列和 Worker 之间按所有权移动，
//! 因此同一条命令不可能在队列中出现两次。

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::completion::Completion;
use crate::error::{VpuError, VpuResult};

/// 实例ID（0..N-1）
pub type InstanceId = u32;

/// 命令执行结果
pub type CommandResult = VpuResult<Reply>;

/// VPU 操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpuOp {
    /// 打开解码实例，硬件返回实例句柄
    Init,
    /// 解析码流序列头
    QuerySequenceHeader,
    /// 注册帧缓冲区
    RegisterFrameBuffers,
    /// 解码一帧
    Decode,
    /// 清除显示缓冲区标志
    ClearBufferFlag,
    /// 冲刷输出
    FlushOutput,
    /// 关闭实例
    Close,
    /// 读取硬件版本
    GetVersion,
    /// 实例级软复位
    SoftReset,
    /// 更新码流缓冲区写指针
    UpdateBitstream,
    /// 读取输出帧信息
    GetOutputInfo,
}

impl VpuOp {
    /// 所有操作
    pub const ALL: [VpuOp; 11] = [
        VpuOp::Init,
        VpuOp::QuerySequenceHeader,
        VpuOp::RegisterFrameBuffers,
        VpuOp::Decode,
        VpuOp::ClearBufferFlag,
        VpuOp::FlushOutput,
        VpuOp::Close,
        VpuOp::GetVersion,
        VpuOp::SoftReset,
        VpuOp::UpdateBitstream,
        VpuOp::GetOutputInfo,
    ];

    /// 操作码
    pub fn code(self) -> u32 {
        match self {
            VpuOp::Init => 0x01,
            VpuOp::QuerySequenceHeader => 0x02,
            VpuOp::RegisterFrameBuffers => 0x03,
            VpuOp::Decode => 0x04,
            VpuOp::ClearBufferFlag => 0x05,
            VpuOp::FlushOutput => 0x06,
            VpuOp::Close => 0x07,
            VpuOp::GetVersion => 0x08,
            VpuOp::SoftReset => 0x09,
            VpuOp::UpdateBitstream => 0x0a,
            VpuOp::GetOutputInfo => 0x0b,
        }
    }

    /// 获取操作名称
    pub fn name(self) -> &'static str {
        match self {
            VpuOp::Init => "init",
            VpuOp::QuerySequenceHeader => "query-sequence-header",
            VpuOp::RegisterFrameBuffers => "register-frame-buffers",
            VpuOp::Decode => "decode",
            VpuOp::ClearBufferFlag => "clear-buffer-flag",
            VpuOp::FlushOutput => "flush-output",
            VpuOp::Close => "close",
            VpuOp::GetVersion => "get-version",
            VpuOp::SoftReset => "soft-reset",
            VpuOp::UpdateBitstream => "update-bitstream",
            VpuOp::GetOutputInfo => "get-output-info",
        }
    }

    /// 是否要求目标实例处于打开状态（只有 `Init` 作用于关闭的实例）
    pub fn requires_open_target(self) -> bool {
        self != VpuOp::Init
    }

    /// 是否需要与实例当前句柄匹配的句柄
    ///
    /// `GetVersion` 不读实例上下文，只要求目标实例打开。
    pub fn requires_handle(self) -> bool {
        !matches!(self, VpuOp::Init | VpuOp::GetVersion)
    }
}

impl TryFrom<u32> for VpuOp {
    type Error = VpuError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        VpuOp::ALL
            .into_iter()
            .find(|op| op.code() == code)
            .ok_or(VpuError::UnknownOp(code))
    }
}

impl fmt::Display for VpuOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 硬件实例句柄（非零）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(NonZeroU64);

impl InstanceHandle {
    /// 从硬件返回的原始值构造，零值（空句柄）返回 None
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// 原始值
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// 硬件状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwStatus {
    /// 成功
    Ok,
    /// 输入数据不足（不是错误，只反馈给调用者）
    InsufficientInput,
    /// 硬件返回错误码
    Failed(u32),
}

impl HwStatus {
    /// 是否为成功完成（包括输入不足）
    pub fn is_success(self) -> bool {
        !matches!(self, HwStatus::Failed(_))
    }
}

/// 硬件完成后读回的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwResponse {
    /// 状态
    pub status: HwStatus,
    /// `Init` 返回的实例句柄原始值（0 表示空句柄）
    pub handle: u64,
    /// 输出数据
    pub data: Vec<u8>,
}

impl HwResponse {
    /// 成功且无输出
    pub fn ok() -> Self {
        Self::with_status(HwStatus::Ok)
    }

    /// 指定状态
    pub fn with_status(status: HwStatus) -> Self {
        Self {
            status,
            handle: 0,
            data: Vec::new(),
        }
    }
}

/// 命令成功时的回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// 硬件状态（`Ok` 或 `InsufficientInput`）
    pub status: HwStatus,
    /// 实例句柄（`Init` 成功后有效）
    pub handle: Option<InstanceHandle>,
    /// 输出数据
    pub data: Vec<u8>,
}

impl Reply {
    /// 硬件是否需要更多输入
    pub fn needs_more_input(&self) -> bool {
        self.status == HwStatus::InsufficientInput
    }
}

/// VPU 命令
pub struct Command {
    /// 操作
    pub op: VpuOp,
    /// 目标实例
    pub target: InstanceId,
    /// 提交时绑定的实例句柄
    pub handle: Option<InstanceHandle>,
    /// 不透明参数
    pub args: Vec<u8>,
    /// 入队序号（由队列分配）
    pub(crate) seq: u64,
    submit_time: Instant,
    completion: Arc<Completion<CommandResult>>,
}

impl Command {
    /// 创建命令，返回命令和对应的等待票据
    pub fn new(
        op: VpuOp,
        target: InstanceId,
        handle: Option<InstanceHandle>,
        args: Vec<u8>,
    ) -> (Self, Ticket) {
        let completion = Arc::new(Completion::new());
        let ticket = Ticket {
            completion: Arc::clone(&completion),
        };
        let command = Self {
            op,
            target,
            handle,
            args,
            seq: 0,
            submit_time: Instant::now(),
            completion,
        };
        (command, ticket)
    }

    /// 入队序号
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// 自创建以来经过的时间
    pub fn age(&self) -> Duration {
        self.submit_time.elapsed()
    }

    /// 写入结果并唤醒提交者，命令随之销毁
    pub fn resolve(self, result: CommandResult) {
        self.completion.complete(result);
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        // 未被处理就被丢弃的命令也必须给出结果
        self.completion.complete(Err(VpuError::InvalidTarget(self.target)));
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("op", &self.op)
            .field("target", &self.target)
            .field("handle", &self.handle)
            .field("args_len", &self.args.len())
            .field("seq", &self.seq)
            .finish()
    }
}

/// 命令等待票据
#[derive(Debug)]
pub struct Ticket {
    completion: Arc<Completion<CommandResult>>,
}

impl Ticket {
    /// 阻塞直到命令完成
    pub fn wait(self) -> CommandResult {
        self.completion.wait()
    }

    /// 带超时等待，超时返回 None
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandResult> {
        self.completion.wait_timeout(timeout)
    }

    /// 命令是否已完成
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }
}

//! VPU Worker
//!
//! 唯一允许调用硬件的线程。严格按 FIFO 顺序逐条处理命令：
//! 校验目标实例 → 调用硬件网关 → 更新实例表 → 写入结果并唤醒提交者。
//! 硬件超时会在写入结果前触发全局恢复；恢复没能立即执行时，处理下一条命令前再次尝试。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::{Command, CommandResult, HwStatus, InstanceHandle, Reply, VpuOp};
use crate::error::{VpuError, VpuResult};
use crate::gateway::{HardwareGateway, HwOutcome};
use crate::instance::InstanceTable;
use crate::lifecycle::{DeviceState, LifecycleManager};
use crate::queue::JobQueue;
use crate::stats::StatsRecorder;

/// Worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// 队列为空，等待唤醒
    Idle = 0,
    /// 正在取出命令
    Draining = 1,
    /// 正在处理一条命令
    Processing = 2,
    /// 已退出
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Draining,
            2 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }
}

/// Worker 运行所需的共享对象
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub instances: Arc<InstanceTable>,
    pub gateway: Arc<HardwareGateway>,
    pub lifecycle: Arc<LifecycleManager>,
    pub device: Arc<DeviceState>,
    pub stats: Arc<StatsRecorder>,
    /// 空闲轮询间隔
    pub idle_poll: Duration,
}

/// Worker 线程句柄
pub struct Worker {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    queue: Arc<JobQueue>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// 启动 Worker 线程
    pub fn spawn(name: &str, context: WorkerContext) -> VpuResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));
        let queue = Arc::clone(&context.queue);

        let worker_loop = WorkerLoop {
            context,
            stop: Arc::clone(&stop),
            state: Arc::clone(&state),
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop.run())
            .map_err(|e| {
                log::error!("Failed to spawn VPU worker: {}", e);
                VpuError::Busy
            })?;

        Ok(Self {
            stop,
            state,
            queue,
            handle: Some(handle),
        })
    }

    /// 当前状态
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// 是否仍在运行
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 请求停止并等待线程退出，剩余命令以 `InvalidTarget` 结束
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        self.queue.notify_all();
        if handle.join().is_err() {
            log::error!("VPU worker panicked");
            self.state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerLoop {
    context: WorkerContext,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl WorkerLoop {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn run(self) {
        log::debug!("VPU worker started");
        while !self.stop.load(Ordering::SeqCst) {
            match self.context.queue.dequeue() {
                Some(command) => {
                    self.set_state(WorkerState::Processing);
                    self.process(command);
                    self.set_state(WorkerState::Draining);
                }
                None => {
                    self.set_state(WorkerState::Idle);
                    // 超时只是为了定期检查停止请求
                    if self.context.queue.wait_for_work(self.context.idle_poll) {
                        self.set_state(WorkerState::Draining);
                    }
                }
            }
        }

        let abandoned = self.context.queue.drain();
        if !abandoned.is_empty() {
            log::warn!("VPU worker stopping, abandoning {} queued command(s)", abandoned.len());
        }
        for command in abandoned {
            self.context.stats.record_invalid_target();
            let target = command.target;
            command.resolve(Err(VpuError::InvalidTarget(target)));
        }

        self.set_state(WorkerState::Stopped);
        log::debug!("VPU worker stopped");
    }

    fn process(&self, command: Command) {
        let result = self.execute(&command);
        log::debug!(
            "VPU worker: #{} {} on instance {} -> {:?}",
            command.seq(),
            command.op,
            command.target,
            result.as_ref().map(|reply| reply.status)
        );

        let stats = &self.context.stats;
        match &result {
            Err(VpuError::InvalidTarget(_)) | Err(VpuError::NotOpen) => stats.record_invalid_target(),
            Err(VpuError::Hardware { .. }) => stats.record_hardware_error(),
            Err(VpuError::FatalTimeout { .. }) => stats.record_fatal_timeout(),
            _ => {}
        }
        stats.record_completed(u64::try_from(command.age().as_micros()).unwrap_or(u64::MAX));
        command.resolve(result);
    }

    fn execute(&self, command: &Command) -> CommandResult {
        let ctx = &self.context;
        let target = command.target;

        if !ctx.device.is_open() {
            return Err(VpuError::NotOpen);
        }
        if !ctx.instances.contains(target) {
            return Err(VpuError::InvalidTarget(target));
        }
        if ctx.device.is_fatal_pending() {
            ctx.lifecycle.try_recover();
        }

        let valid = match command.op {
            VpuOp::Init => !ctx.instances.is_open(target),
            op if op.requires_handle() => ctx.instances.validate(target, command.handle),
            _ => ctx.instances.is_open(target),
        };
        if !valid {
            return Err(VpuError::InvalidTarget(target));
        }
        if command.op == VpuOp::Init {
            return self.init_instance(command);
        }

        let outcome = ctx.gateway.execute(command.op, command.handle, &command.args);
        if command.op == VpuOp::Close {
            // 无论硬件结果如何，Close 之后实例都处于关闭状态
            ctx.lifecycle.release_instance(target);
        } else {
            ctx.instances.record_command(target);
        }
        self.complete(command.op, outcome)
    }

    fn init_instance(&self, command: &Command) -> CommandResult {
        let ctx = &self.context;
        let target = command.target;

        ctx.lifecycle.acquire_instance(target)?;
        let outcome = ctx.gateway.execute(VpuOp::Init, None, &command.args);

        if let HwOutcome::Completed(response) = &outcome
            && response.status.is_success()
        {
            let Some(handle) = InstanceHandle::new(response.handle) else {
                log::error!("VPU instance {}: hardware returned a null handle", target);
                ctx.lifecycle.discard_instance(target);
                return Err(VpuError::AllocationFailed(
                    "hardware returned a null instance handle".to_string(),
                ));
            };
            ctx.instances.mark_open(target, handle);
            ctx.device.set_force_closed(false);
            log::info!("VPU instance {} opened with handle {}", target, handle);
            return self.complete(VpuOp::Init, outcome);
        }

        ctx.lifecycle.discard_instance(target);
        self.complete(VpuOp::Init, outcome)
    }

    fn complete(&self, op: VpuOp, outcome: HwOutcome) -> CommandResult {
        match outcome {
            HwOutcome::Completed(response) => match response.status {
                HwStatus::Failed(code) => Err(VpuError::Hardware { op, code }),
                status => Ok(Reply {
                    status,
                    handle: InstanceHandle::new(response.handle),
                    data: response.data,
                }),
            },
            HwOutcome::Fatal => {
                let ctx = &self.context;
                ctx.lifecycle.try_recover();
                Err(VpuError::FatalTimeout {
                    op,
                    timeout_ms: u64::try_from(ctx.gateway.timeout().as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

//! VPU 设备入口
//!
//! 面向驱动胶水层的边界：打开/关闭设备、阻塞提交命令、紧急停止。
//! 所有状态都挂在 [`VpuDevice`] 上，测试可以创建互相独立的子系统。

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::command::{Command, CommandResult, InstanceId, VpuOp};
use crate::config::VpuConfig;
use crate::error::{VpuError, VpuResult};
use crate::gateway::HardwareGateway;
use crate::instance::{InstanceSnapshot, InstanceTable};
use crate::lifecycle::{DeviceState, ForceCloseReport, LifecycleManager};
use crate::platform::Platform;
use crate::queue::JobQueue;
use crate::stats::{StatsRecorder, VpuStats};
use crate::worker::{Worker, WorkerContext, WorkerState};

/// 打开设备得到的令牌，必须交还给 [`VpuDevice::close_device`]
#[derive(Debug, PartialEq, Eq)]
#[must_use = "every open_device() must be paired with close_device()"]
pub struct DeviceToken {
    id: u64,
}

impl DeviceToken {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// VPU 设备
pub struct VpuDevice {
    config: VpuConfig,
    device: Arc<DeviceState>,
    instances: Arc<InstanceTable>,
    queue: Arc<JobQueue>,
    lifecycle: Arc<LifecycleManager>,
    stats: Arc<StatsRecorder>,
    worker: Mutex<Option<Worker>>,
    next_token: AtomicU64,
}

impl VpuDevice {
    /// 创建 VPU 子系统并启动 Worker
    pub fn new(config: VpuConfig, platform: Platform) -> VpuResult<Self> {
        config.validate()?;

        let device = Arc::new(DeviceState::new());
        let stats = Arc::new(StatsRecorder::new());
        let instances = Arc::new(InstanceTable::new(config.max_instances));
        let queue = Arc::new(JobQueue::new(Arc::clone(&device), Arc::clone(&stats)));
        let gateway = Arc::new(HardwareGateway::new(
            Arc::clone(&platform.engine),
            Arc::clone(&platform.irq),
            Arc::clone(&device),
            config.hw_timeout(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            config.clone(),
            Arc::clone(&device),
            Arc::clone(&instances),
            Arc::clone(&queue),
            Arc::clone(&gateway),
            platform,
            Arc::clone(&stats),
        ));

        let worker = Worker::spawn(
            &config.worker_name,
            WorkerContext {
                queue: Arc::clone(&queue),
                instances: Arc::clone(&instances),
                gateway,
                lifecycle: Arc::clone(&lifecycle),
                device: Arc::clone(&device),
                stats: Arc::clone(&stats),
                idle_poll: config.idle_poll(),
            },
        )?;
        log::info!(
            "VPU subsystem created with {} instance slot(s)",
            config.max_instances
        );

        Ok(Self {
            config,
            device,
            instances,
            queue,
            lifecycle,
            stats,
            worker: Mutex::new(Some(worker)),
            next_token: AtomicU64::new(1),
        })
    }

    /// 打开设备
    pub fn open_device(&self) -> VpuResult<DeviceToken> {
        if self.queue.is_closed() {
            return Err(VpuError::Busy);
        }
        self.lifecycle.open()?;
        Ok(DeviceToken {
            id: self.next_token.fetch_add(1, Ordering::SeqCst),
        })
    }

    /// 关闭设备；部分实例已被强制关闭时同样安全
    pub fn close_device(&self, token: DeviceToken) {
        log::debug!("VPU close_device token {}", token.id);
        self.lifecycle.close();
    }

    /// 提交命令并阻塞到完成
    ///
    /// 设备未打开、目标越界、目标实例未打开（`Init` 则是已打开）时立即返回，不触及硬件。
    /// 这里的实例状态检查只是提前失败，Worker 在执行前会再次校验。
    pub fn submit(&self, op: VpuOp, target: InstanceId, args: Vec<u8>) -> CommandResult {
        if !self.instances.contains(target) {
            self.stats.record_invalid_target();
            return Err(VpuError::InvalidTarget(target));
        }
        if !self.device.is_open() {
            self.stats.record_reject();
            return Err(VpuError::NotOpen);
        }

        let current = self.instances.handle(target);
        if op.requires_open_target() != current.is_some() {
            self.stats.record_invalid_target();
            return Err(VpuError::InvalidTarget(target));
        }
        let handle = if op.requires_handle() { current } else { None };

        let (command, ticket) = Command::new(op, target, handle, args);
        self.queue.enqueue(command)?;
        ticket.wait()
    }

    /// 按数值操作码提交（ioctl 风格），未知操作码在边界处拒绝
    pub fn submit_raw(&self, code: u32, target: InstanceId, args: Vec<u8>) -> CommandResult {
        let op = VpuOp::try_from(code)?;
        self.submit(op, target, args)
    }

    /// 异步提交：在阻塞线程池中执行 [`VpuDevice::submit`]
    pub async fn submit_async(
        self: &Arc<Self>,
        op: VpuOp,
        target: InstanceId,
        args: Vec<u8>,
    ) -> CommandResult {
        let device = Arc::clone(self);
        tokio::task::spawn_blocking(move || device.submit(op, target, args))
            .await
            .unwrap_or_else(|e| {
                log::error!("VPU async submit failed: {}", e);
                Err(VpuError::Busy)
            })
    }

    /// 紧急停止：关闭所有打开的实例（例如系统挂起或卸载前）
    pub fn emergency_stop(&self) -> ForceCloseReport {
        self.lifecycle.emergency_stop()
    }

    /// 全局恢复
    pub fn recover(&self) -> bool {
        self.lifecycle.recover()
    }

    /// 实例状态
    pub fn instance(&self, id: InstanceId) -> Option<InstanceSnapshot> {
        self.instances.snapshot(id)
    }

    /// 打开的实例数量
    pub fn open_instances(&self) -> usize {
        self.instances.open_count()
    }

    pub fn open_count(&self) -> usize {
        self.device.open_count()
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    pub fn is_force_closed(&self) -> bool {
        self.device.is_force_closed()
    }

    /// 排队中的命令数
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Worker 状态
    pub fn worker_state(&self) -> WorkerState {
        self.worker
            .lock()
            .as_ref()
            .map_or(WorkerState::Stopped, Worker::state)
    }

    pub fn config(&self) -> &VpuConfig {
        &self.config
    }

    /// 获取统计信息
    pub fn stats(&self) -> VpuStats {
        self.stats.snapshot()
    }

    /// 重置统计信息
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// 拆除子系统：关闭仍打开的设备，停止 Worker，排队的命令以 `InvalidTarget` 结束
    pub fn shutdown(&self) {
        let Some(mut worker) = self.worker.lock().take() else {
            return;
        };
        self.lifecycle.shutdown();
        self.queue.close();
        worker.stop();
        log::info!("VPU subsystem shut down");
    }
}

impl Drop for VpuDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! VPU 作业队列
//!
//! 互斥锁保护的 FIFO 命令队列，外加唤醒 Worker 的条件变量。
//! 队列本身从不阻塞出队，等待新命令是 Worker 的职责。

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::command::Command;
use crate::error::{VpuError, VpuResult};
use crate::lifecycle::DeviceState;
use crate::stats::StatsRecorder;

#[derive(Debug, Default)]
struct QueueInner {
    jobs: VecDeque<Command>,
    /// 已分配的最大序号
    next_seq: u64,
    /// 子系统拆除后不再接受命令
    closed: bool,
}

/// 作业队列
#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// 条件变量（用于唤醒 Worker）
    wake: Condvar,
    device: Arc<DeviceState>,
    stats: Arc<StatsRecorder>,
}

impl JobQueue {
    /// 创建新的作业队列
    pub fn new(device: Arc<DeviceState>, stats: Arc<StatsRecorder>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            wake: Condvar::new(),
            device,
            stats,
        }
    }

    /// 命令入队，返回分配的序号
    ///
    /// 设备未打开时拒绝，命令以 `NotOpen` 结束，不留下任何队列状态。
    pub fn enqueue(&self, mut command: Command) -> VpuResult<u64> {
        if !self.device.is_open() {
            self.stats.record_reject();
            command.resolve(Err(VpuError::NotOpen));
            return Err(VpuError::NotOpen);
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            self.stats.record_reject();
            command.resolve(Err(VpuError::Busy));
            return Err(VpuError::Busy);
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        command.seq = seq;
        log::debug!(
            "VPU queue: {} for instance {} queued as #{}",
            command.op,
            command.target,
            seq
        );
        inner.jobs.push_back(command);
        let depth = inner.jobs.len();
        drop(inner);

        self.stats.record_submit(depth);
        // 每次入队唤醒一次，Worker 会循环检查队列，不依赖唤醒次数
        self.wake.notify_one();
        Ok(seq)
    }

    /// 取出队首命令（非阻塞）
    pub fn dequeue(&self) -> Option<Command> {
        self.inner.lock().jobs.pop_front()
    }

    /// 等待队列非空或被唤醒，最多等待 `timeout`，返回队列是否非空
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.jobs.is_empty() && !inner.closed {
            self.wake.wait_for(&mut inner, timeout);
        }
        !inner.jobs.is_empty()
    }

    /// 唤醒所有等待者
    pub fn notify_all(&self) {
        let _inner = self.inner.lock();
        self.wake.notify_all();
    }

    /// 关闭队列：拒绝后续命令并唤醒 Worker
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.wake.notify_all();
    }

    /// 队列是否已关闭
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// 取出所有排队的命令
    pub fn drain(&self) -> Vec<Command> {
        self.inner.lock().jobs.drain(..).collect()
    }

    /// 当前排队的命令数
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    /// 检查队列是否为空
    pub fn is_empty(&self) -> bool {
        self.inner.lock().jobs.is_empty()
    }

    /// 累计入队的命令数
    pub fn total_enqueued(&self) -> u64 {
        self.inner.lock().next_seq
    }
}

//! VPU 生命周期管理
//!
//! - 设备打开/关闭的引用计数：第一次打开使能时钟、中断和后备内存池，
//!   最后一次关闭强制关闭所有实例并断电
//! - 全局恢复：硬件超时后关闭所有实例并复位硬件块
//! - 紧急停止：通过正常的 Close 命令关闭所有实例，超出时限的实例被强制标记关闭
//!
//! 恢复和强制关闭共用同一把锁，互不并发；它们与普通命令处理可以并发。
//! 加锁顺序固定为先生命周期锁、后恢复锁。

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::command::{Command, InstanceId, Ticket, VpuOp};
use crate::config::VpuConfig;
use crate::error::{VpuError, VpuResult};
use crate::gateway::HardwareGateway;
use crate::instance::InstanceTable;
use crate::platform::{BusPriority, Platform};
use crate::queue::JobQueue;
use crate::stats::StatsRecorder;

/// 进程级设备状态
///
/// 时钟和中断当且仅当 `open_count > 0` 时使能。
#[derive(Debug, Default)]
pub struct DeviceState {
    open_count: AtomicUsize,
    /// 强制关闭已经执行过，下一次成功打开前重复执行是空操作
    force_closed: AtomicBool,
    /// 恢复进行中，硬件网关短路所有调用
    shutting_down: AtomicBool,
    /// 出现过硬件超时且硬件块尚未复位
    fatal_pending: AtomicBool,
    /// 硬件块复位次数
    reset_epoch: AtomicU64,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open_count() > 0
    }

    pub(crate) fn set_open_count(&self, count: usize) {
        self.open_count.store(count, Ordering::SeqCst);
    }

    pub fn is_force_closed(&self) -> bool {
        self.force_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_force_closed(&self, value: bool) {
        self.force_closed.store(value, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn set_shutting_down(&self, value: bool) {
        self.shutting_down.store(value, Ordering::SeqCst);
    }

    /// 硬件块被认为已挂死，等待复位
    pub fn is_fatal_pending(&self) -> bool {
        self.fatal_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fatal_pending(&self, value: bool) {
        self.fatal_pending.store(value, Ordering::SeqCst);
    }

    pub fn reset_epoch(&self) -> u64 {
        self.reset_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_reset_epoch(&self) {
        self.reset_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

/// 强制关闭时的等待时限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    /// 每个 Close 命令各自的时限
    PerCommand(Duration),
    /// 所有 Close 命令共享的总时限
    Overall(Duration),
}

/// 强制关闭报告
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceCloseReport {
    /// 开始时处于打开状态的实例数
    pub requested: usize,
    /// 在时限内通过 Close 命令关闭的实例数
    pub closed_by_command: usize,
    /// 没有正常完成 Close（超时、被短路或出错）而被强制标记关闭的实例数
    pub forced: usize,
    /// 是否复位了硬件块
    pub hardware_reset: bool,
}

/// 生命周期管理器
pub struct LifecycleManager {
    config: VpuConfig,
    device: Arc<DeviceState>,
    instances: Arc<InstanceTable>,
    queue: Arc<JobQueue>,
    gateway: Arc<HardwareGateway>,
    platform: Platform,
    stats: Arc<StatsRecorder>,
    /// 串行化 open/close
    lifecycle_lock: Mutex<()>,
    /// 串行化恢复与强制关闭
    recovery_lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        config: VpuConfig,
        device: Arc<DeviceState>,
        instances: Arc<InstanceTable>,
        queue: Arc<JobQueue>,
        gateway: Arc<HardwareGateway>,
        platform: Platform,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            config,
            device,
            instances,
            queue,
            gateway,
            platform,
            stats,
            lifecycle_lock: Mutex::new(()),
            recovery_lock: Mutex::new(()),
        }
    }

    /// 当前打开计数
    pub fn open_count(&self) -> usize {
        self.device.open_count()
    }

    /// 打开设备，返回新的打开计数
    ///
    /// 0→1 时初始化后备内存池、使能时钟与中断、清零统计并清除强制关闭标志。
    /// 内存池初始化失败时计数不变。
    pub fn open(&self) -> VpuResult<usize> {
        let _guard = self.lifecycle_lock.lock();
        let count = self.device.open_count();

        if count == 0 {
            self.platform.pool.init_device().map_err(|e| {
                log::error!("VPU open: backing memory pool unavailable: {}", e);
                VpuError::NoMemory(e.to_string())
            })?;
            self.platform.clocks.enable_clocks();
            self.platform.clocks.set_bus_priority(BusPriority::Codec);
            self.stats.reset();
            self.gateway.attach();
            self.device.set_force_closed(false);
            log::info!("VPU powered up");
        }

        self.device.set_open_count(count + 1);
        log::debug!("VPU open count {} -> {}", count, count + 1);
        Ok(count + 1)
    }

    /// 关闭设备，返回新的打开计数
    ///
    /// 1→0 时先在计数仍为 1 的情况下强制关闭所有实例（保证 Close 命令能够入队），
    /// 然后关闭中断、恢复总线优先级并关闭时钟。
    pub fn close(&self) -> usize {
        let _guard = self.lifecycle_lock.lock();
        let count = self.device.open_count();

        match count {
            0 => {
                log::warn!("VPU close without matching open");
                0
            }
            1 => {
                {
                    let _recovery = self.recovery_lock.lock();
                    let report =
                        self.force_close_locked(WaitBudget::PerCommand(self.config.close_wait()));
                    if report.requested > 0 {
                        log::info!(
                            "VPU close: {} instance(s) closed, {} forced",
                            report.closed_by_command,
                            report.forced
                        );
                    }
                }
                self.device.set_open_count(0);
                self.power_down();
                log::info!("VPU powered down");
                0
            }
            n => {
                self.device.set_open_count(n - 1);
                log::debug!("VPU open count {} -> {}", n, n - 1);
                n - 1
            }
        }
    }

    /// 全局恢复，硬件挂死时调用
    ///
    /// 已经强制关闭过且没有新的硬件超时则为空操作，返回是否真正执行了恢复。
    pub fn recover(&self) -> bool {
        let _recovery = self.recovery_lock.lock();
        self.recover_locked()
    }

    /// Worker 使用的恢复入口
    ///
    /// 若另一次恢复或强制关闭正在进行则直接返回。超时标志保持置位：
    /// 强制关闭结束前会检查它并复位硬件，否则 Worker 处理下一条命令前会再次尝试。
    pub(crate) fn try_recover(&self) -> bool {
        match self.recovery_lock.try_lock() {
            Some(_recovery) => self.recover_locked(),
            None => {
                log::warn!("VPU recovery already in progress, skipping");
                false
            }
        }
    }

    fn recover_locked(&self) -> bool {
        if self.device.is_force_closed() && !self.device.is_fatal_pending() {
            log::debug!("VPU recovery skipped, already force-closed");
            return false;
        }

        log::warn!("VPU recovery: hardware presumed stuck, closing all instances");
        self.device.set_shutting_down(true);

        for (id, handle) in self.instances.open_instances() {
            if self.release_instance(id) {
                log::warn!("VPU recovery: instance {} (handle {}) force-closed", id, handle);
            }
        }

        self.reset_hardware();
        self.device.set_shutting_down(false);
        self.device.set_force_closed(true);
        self.stats.record_recovery();
        true
    }

    /// 紧急停止：对所有打开的实例发 Close，总时限内未完成的实例强制标记关闭
    pub fn emergency_stop(&self) -> ForceCloseReport {
        let _recovery = self.recovery_lock.lock();
        if self.device.is_force_closed() && !self.device.is_fatal_pending() {
            log::debug!("VPU emergency stop skipped, already force-closed");
            return ForceCloseReport::default();
        }

        let report = self.force_close_locked(WaitBudget::Overall(self.config.force_close_timeout()));
        self.device.set_force_closed(true);
        self.stats.record_emergency_stop();
        log::warn!(
            "VPU emergency stop: {} of {} instance(s) closed in time, {} forced",
            report.closed_by_command,
            report.requested,
            report.forced
        );
        report
    }

    /// 子系统拆除：仍有打开引用时强制关闭所有实例并断电
    pub fn shutdown(&self) {
        let _guard = self.lifecycle_lock.lock();
        let count = self.device.open_count();
        if count == 0 {
            return;
        }

        log::warn!("VPU shutdown with {} open reference(s)", count);
        {
            let _recovery = self.recovery_lock.lock();
            self.force_close_locked(WaitBudget::Overall(self.config.force_close_timeout()));
            self.device.set_force_closed(true);
        }
        self.device.set_open_count(0);
        self.power_down();
    }

    /// 为实例分配内存池
    pub(crate) fn acquire_instance(&self, id: InstanceId) -> VpuResult<()> {
        self.platform.pool.pool_init(id).map_err(|e| {
            log::error!("VPU instance {}: memory pool allocation failed: {}", id, e);
            VpuError::from(e)
        })
    }

    /// 释放未能打开的实例的内存池
    pub(crate) fn discard_instance(&self, id: InstanceId) {
        self.platform.pool.pool_free(id);
    }

    /// 标记实例关闭并释放内存池，返回实例原本是否打开
    pub(crate) fn release_instance(&self, id: InstanceId) -> bool {
        if self.instances.mark_closed(id).is_some() {
            self.platform.pool.pool_free(id);
            true
        } else {
            false
        }
    }

    fn force_close_locked(&self, budget: WaitBudget) -> ForceCloseReport {
        let targets = self.instances.open_instances();
        let mut report = ForceCloseReport {
            requested: targets.len(),
            ..Default::default()
        };

        let tickets: Vec<(InstanceId, Ticket)> = targets
            .iter()
            .map(|&(id, handle)| {
                let (command, ticket) = Command::new(VpuOp::Close, id, Some(handle), Vec::new());
                // 入队失败时票据已带结果
                let _ = self.queue.enqueue(command);
                (id, ticket)
            })
            .collect();

        let started = Instant::now();
        let mut needs_reset = false;
        for (id, ticket) in &tickets {
            let wait = match budget {
                WaitBudget::PerCommand(each) => each,
                WaitBudget::Overall(total) => total.saturating_sub(started.elapsed()),
            };
            match ticket.wait_timeout(wait) {
                Some(Ok(_)) => report.closed_by_command += 1,
                Some(Err(e)) if e.is_fatal() => {
                    log::warn!("VPU force close: instance {} timed out in hardware", id);
                    needs_reset = true;
                }
                Some(Err(e)) => {
                    log::debug!("VPU force close: instance {} close returned {}", id, e);
                }
                None => {
                    log::warn!("VPU force close: instance {} did not close in time", id);
                    needs_reset = true;
                }
            }
        }

        for &(id, _) in &targets {
            self.release_instance(id);
        }
        report.forced = report.requested - report.closed_by_command;

        // 排在 Close 之前的命令可能已经超时，Close 本身随之被短路
        if needs_reset || self.device.is_fatal_pending() {
            self.device.set_shutting_down(true);
            self.reset_hardware();
            self.device.set_shutting_down(false);
            report.hardware_reset = true;
        }
        report
    }

    /// 复位硬件块：拉低复位线并重新上电时钟，恢复到干净的基线
    fn reset_hardware(&self) {
        let clocks = &self.platform.clocks;
        clocks.assert_reset();
        self.device.advance_reset_epoch();
        self.device.set_fatal_pending(false);
        clocks.disable_clocks();
        clocks.enable_clocks();
        clocks.deassert_reset();
        if self.device.is_open() {
            clocks.set_bus_priority(BusPriority::Codec);
        } else {
            clocks.disable_clocks();
        }
        log::info!("VPU hardware block reset");
    }

    fn power_down(&self) {
        self.gateway.detach();
        self.platform.clocks.set_bus_priority(BusPriority::Default);
        self.platform.clocks.disable_clocks();
        self.platform.pool.free_device();
    }
}

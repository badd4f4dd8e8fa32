//! 模拟 VPU 平台
//!
//! 在内存中实现全部平台接口，用于测试和无硬件环境下的联调：
//! - 可配置的中断延迟
//! - 故障注入：挂死、错误码、输入不足、空句柄、内存池耗尽
//! - 观测：时钟状态、复位次数、内存池、调用记录、最大并发硬件调用数

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::command::{HwResponse, HwStatus, InstanceHandle, InstanceId, VpuOp};
use crate::completion::IrqEvent;
use crate::error::PoolError;
use crate::platform::{BusPriority, ClockController, CodecEngine, InterruptSource, MemoryPool};

/// 模拟硬件版本号
pub const SIM_VERSION: u32 = 0x0003_0201;

/// 一次硬件调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub op: VpuOp,
    pub handle: Option<InstanceHandle>,
    pub args: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimFaults {
    /// 接下来挂死（不发中断）的调用数
    hang: u32,
    /// 接下来返回的错误码
    fail: VecDeque<u32>,
    /// 接下来报告输入不足的调用数
    insufficient: u32,
    /// 接下来返回空句柄的 Init 数
    null_handle: u32,
    /// 接下来失败的实例内存池分配数
    pool_fail: u32,
    /// 设备级内存池不可用
    device_pool_fail: bool,
}

#[derive(Debug, Default)]
struct SimState {
    clocks_enabled: bool,
    clock_enables: u32,
    clock_disables: u32,
    resets: u32,
    reset_asserted: bool,
    bus_priority: BusPriority,
    irq_enabled: bool,
    device_pool: bool,
    pools: BTreeSet<InstanceId>,
    latency: Duration,
    faults: SimFaults,
    calls: Vec<SimCall>,
    pending: Option<HwResponse>,
}

/// 模拟 VPU
#[derive(Debug)]
pub struct SimVpu {
    state: Mutex<SimState>,
    irq: Mutex<Option<Arc<IrqEvent>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_handle: AtomicU64,
}

impl SimVpu {
    /// 创建模拟设备
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            irq: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_handle: AtomicU64::new(0x1000),
        }
    }

    // ===== 故障注入 =====

    /// 设置中断延迟
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// 接下来 `count` 次调用挂死，不发出完成中断
    pub fn hang_next(&self, count: u32) {
        self.state.lock().faults.hang += count;
    }

    /// 下一次调用返回错误码
    pub fn fail_next(&self, code: u32) {
        self.state.lock().faults.fail.push_back(code);
    }

    /// 下一次调用报告输入不足
    pub fn insufficient_next(&self) {
        self.state.lock().faults.insufficient += 1;
    }

    /// 下一次 Init 返回空句柄
    pub fn null_handle_next_init(&self) {
        self.state.lock().faults.null_handle += 1;
    }

    /// 下一次实例内存池分配失败
    pub fn fail_next_pool_init(&self) {
        self.state.lock().faults.pool_fail += 1;
    }

    /// 设备级内存池是否不可用
    pub fn set_device_pool_unavailable(&self, unavailable: bool) {
        self.state.lock().faults.device_pool_fail = unavailable;
    }

    // ===== 观测 =====

    pub fn clocks_enabled(&self) -> bool {
        self.state.lock().clocks_enabled
    }

    pub fn clock_enable_count(&self) -> u32 {
        self.state.lock().clock_enables
    }

    pub fn clock_disable_count(&self) -> u32 {
        self.state.lock().clock_disables
    }

    pub fn reset_count(&self) -> u32 {
        self.state.lock().resets
    }

    pub fn reset_asserted(&self) -> bool {
        self.state.lock().reset_asserted
    }

    pub fn bus_priority(&self) -> BusPriority {
        self.state.lock().bus_priority
    }

    pub fn irq_enabled(&self) -> bool {
        self.state.lock().irq_enabled
    }

    pub fn irq_subscribed(&self) -> bool {
        self.irq.lock().is_some()
    }

    pub fn device_pool_ready(&self) -> bool {
        self.state.lock().device_pool
    }

    /// 已分配内存池的实例
    pub fn allocated_pools(&self) -> Vec<InstanceId> {
        self.state.lock().pools.iter().copied().collect()
    }

    /// 硬件调用记录
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// 观测到的最大并发硬件调用数
    ///
    /// 挂死的调用一直计为在途，直到 `assert_reset`；硬件网关在复位前不会再发起调用，
    /// 因此超过 1 说明确实有调用被送往了挂死的硬件。
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn deliver_irq(&self, latency: Duration) {
        let Some(event) = self.irq.lock().clone() else {
            return;
        };
        if latency.is_zero() {
            event.signal();
        } else {
            thread::spawn(move || {
                thread::sleep(latency);
                event.signal();
            });
        }
    }

    fn response_for(&self, op: VpuOp, args: &[u8], faults: &mut SimFaults) -> HwResponse {
        if let Some(code) = faults.fail.pop_front() {
            return HwResponse::with_status(HwStatus::Failed(code));
        }
        if faults.insufficient > 0 {
            faults.insufficient -= 1;
            return HwResponse::with_status(HwStatus::InsufficientInput);
        }

        let mut response = HwResponse::ok();
        match op {
            VpuOp::Init => {
                if faults.null_handle > 0 {
                    faults.null_handle -= 1;
                } else {
                    response.handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
                }
            }
            VpuOp::GetVersion => response.data = SIM_VERSION.to_le_bytes().to_vec(),
            VpuOp::Decode | VpuOp::GetOutputInfo => response.data = args.to_vec(),
            _ => {}
        }
        response
    }
}

impl Default for SimVpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecEngine for SimVpu {
    fn start(&self, op: VpuOp, handle: Option<InstanceHandle>, args: &[u8]) -> Result<(), u32> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = {
            let mut state = self.state.lock();
            state.calls.push(SimCall {
                op,
                handle,
                args: args.to_vec(),
            });

            if state.faults.hang > 0 {
                state.faults.hang -= 1;
                state.pending = None;
                log::debug!("SimVpu: {} hangs", op);
                return Ok(());
            }

            let mut faults = std::mem::take(&mut state.faults);
            state.pending = Some(self.response_for(op, args, &mut faults));
            state.faults = faults;
            state.latency
        };

        self.deliver_irq(latency);
        Ok(())
    }

    fn finish(&self, _op: VpuOp, _handle: Option<InstanceHandle>) -> HwResponse {
        if self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            log::warn!("SimVpu: finish without a matching start");
        }
        self.state.lock().pending.take().unwrap_or_else(HwResponse::ok)
    }
}

impl ClockController for SimVpu {
    fn enable_clocks(&self) {
        let mut state = self.state.lock();
        state.clocks_enabled = true;
        state.clock_enables += 1;
    }

    fn disable_clocks(&self) {
        let mut state = self.state.lock();
        state.clocks_enabled = false;
        state.clock_disables += 1;
    }

    fn assert_reset(&self) {
        let mut state = self.state.lock();
        state.resets += 1;
        state.reset_asserted = true;
        // 复位终止所有挂死的调用
        state.pending = None;
        self.in_flight.store(0, Ordering::SeqCst);
    }

    fn deassert_reset(&self) {
        self.state.lock().reset_asserted = false;
    }

    fn set_bus_priority(&self, priority: BusPriority) {
        self.state.lock().bus_priority = priority;
    }
}

impl MemoryPool for SimVpu {
    fn init_device(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.faults.device_pool_fail {
            return Err(PoolError::Unavailable("simulated device pool disabled".to_string()));
        }
        state.device_pool = true;
        Ok(())
    }

    fn free_device(&self) {
        self.state.lock().device_pool = false;
    }

    fn pool_init(&self, instance: InstanceId) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.faults.pool_fail > 0 {
            state.faults.pool_fail -= 1;
            return Err(PoolError::Exhausted);
        }
        state.pools.insert(instance);
        Ok(())
    }

    fn pool_free(&self, instance: InstanceId) {
        self.state.lock().pools.remove(&instance);
    }
}

impl InterruptSource for SimVpu {
    fn subscribe(&self, event: Arc<IrqEvent>) {
        *self.irq.lock() = Some(event);
    }

    fn unsubscribe(&self) {
        *self.irq.lock() = None;
    }

    fn enable(&self) {
        self.state.lock().irq_enabled = true;
    }

    fn disable(&self) {
        self.state.lock().irq_enabled = false;
    }
}

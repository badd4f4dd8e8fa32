//! 完成事件原语
//!
//! - [`Completion`]：一次性写入的结果槽，命令提交者阻塞等待 Worker 写入结果
//! - [`IrqEvent`]：可重复布防的中断事件，硬件中断源发出信号，硬件网关带超时等待

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 一次性写入的结果槽
///
/// 第一次 `complete` 生效，之后的写入被忽略。
#[derive(Debug)]
pub struct Completion<T> {
    slot: Mutex<CompletionSlot<T>>,
    condvar: Condvar,
}

#[derive(Debug)]
struct CompletionSlot<T> {
    value: Option<T>,
    completed: bool,
}

impl<T> Completion<T> {
    /// 创建空的结果槽
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(CompletionSlot {
                value: None,
                completed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// 写入结果并唤醒等待者，已写入过则返回 false
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.completed {
            return false;
        }
        slot.value = Some(value);
        slot.completed = true;
        self.condvar.notify_all();
        true
    }

    /// 是否已经写入
    pub fn is_complete(&self) -> bool {
        self.slot.lock().completed
    }

    /// 阻塞直到结果写入，并取出结果
    ///
    /// 结果只能被取出一次，之后的调用会一直阻塞，因此只应由唯一的等待者调用。
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return value;
            }
            self.condvar.wait(&mut slot);
        }
    }

    /// 带超时的等待，超时返回 None
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                return slot.value.take();
            }
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 中断完成事件
///
/// 单写者（中断源）、单读者（硬件网关）。每次发起硬件调用前先 `arm`，
/// 清除上一次遗留的信号。
#[derive(Debug, Default)]
pub struct IrqEvent {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl IrqEvent {
    /// 创建未触发的事件
    pub fn new() -> Self {
        Self::default()
    }

    /// 布防：清除遗留信号
    pub fn arm(&self) {
        *self.fired.lock() = false;
    }

    /// 中断到达
    pub fn signal(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.condvar.notify_one();
    }

    /// 是否已触发
    pub fn is_signaled(&self) -> bool {
        *self.fired.lock()
    }

    /// 等待中断，超时返回 false。成功返回时消耗该信号。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock();
        while !*fired {
            if self.condvar.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *fired, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_completion_write_once() {
        let completion = Completion::new();
        assert!(!completion.is_complete());
        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert!(completion.is_complete());
        assert_eq!(completion.wait(), 1);
    }

    #[test]
    fn test_completion_cross_thread() {
        let completion = Arc::new(Completion::new());
        let writer = Arc::clone(&completion);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer.complete("done");
        });

        assert_eq!(completion.wait(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn test_completion_timeout() {
        let completion: Completion<u32> = Completion::new();
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)), None);

        completion.complete(7);
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)), Some(7));
    }

    #[test]
    fn test_irq_event_signal_before_wait() {
        let event = IrqEvent::new();
        event.arm();
        event.signal();
        assert!(event.is_signaled());
        assert!(event.wait_timeout(Duration::from_millis(10)));
        // 信号已被消耗
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_irq_event_arm_clears_stale_signal() {
        let event = IrqEvent::new();
        event.signal();
        event.arm();
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_irq_event_from_other_thread() {
        let event = Arc::new(IrqEvent::new());
        event.arm();
        let irq = Arc::clone(&event);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            irq.signal();
        });

        assert!(event.wait_timeout(Duration::from_secs(1)));
        handle.join().unwrap();
    }
}

//! VPU 统计信息

use parking_lot::Mutex;

/// VPU 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpuStats {
    /// 成功入队的命令数
    pub submitted: u64,
    /// 已完成的命令数（包括出错的）
    pub completed: u64,
    /// 入队时被拒绝的命令数
    pub rejected: u64,
    /// 因目标实例无效而未执行的命令数
    pub invalid_target: u64,
    /// 硬件返回错误状态的命令数
    pub hardware_errors: u64,
    /// 硬件超时次数
    pub fatal_timeouts: u64,
    /// 执行的全局恢复次数
    pub recoveries: u64,
    /// 紧急停止次数
    pub emergency_stops: u64,
    /// 最大队列深度
    pub max_queue_depth: usize,
    /// 平均排队+执行时间（微秒）
    pub avg_wait_us: u64,
}

/// 统计记录器
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<VpuStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submit(&self, depth: usize) {
        let mut stats = self.stats.lock();
        stats.submitted += 1;
        stats.max_queue_depth = stats.max_queue_depth.max(depth);
    }

    pub fn record_reject(&self) {
        self.stats.lock().rejected += 1;
    }

    pub fn record_invalid_target(&self) {
        self.stats.lock().invalid_target += 1;
    }

    pub fn record_hardware_error(&self) {
        self.stats.lock().hardware_errors += 1;
    }

    pub fn record_fatal_timeout(&self) {
        self.stats.lock().fatal_timeouts += 1;
    }

    pub fn record_recovery(&self) {
        self.stats.lock().recoveries += 1;
    }

    pub fn record_emergency_stop(&self) {
        self.stats.lock().emergency_stops += 1;
    }

    /// 标记命令完成
    pub fn record_completed(&self, wait_time_us: u64) {
        let mut stats = self.stats.lock();
        stats.completed += 1;

        // 简单移动平均
        let completed = stats.completed;
        stats.avg_wait_us = (stats.avg_wait_us * (completed - 1) + wait_time_us) / completed;
    }

    /// 获取统计信息
    pub fn snapshot(&self) -> VpuStats {
        self.stats.lock().clone()
    }

    /// 重置统计信息
    pub fn reset(&self) {
        *self.stats.lock() = VpuStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_wait() {
        let recorder = StatsRecorder::new();
        recorder.record_completed(100);
        recorder.record_completed(300);

        let stats = recorder.snapshot();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.avg_wait_us, 200);
    }

    #[test]
    fn test_max_depth_and_reset() {
        let recorder = StatsRecorder::new();
        recorder.record_submit(3);
        recorder.record_submit(1);
        recorder.record_reject();
        assert_eq!(recorder.snapshot().max_queue_depth, 3);
        assert_eq!(recorder.snapshot().rejected, 1);

        recorder.reset();
        assert_eq!(recorder.snapshot(), VpuStats::default());
    }
}

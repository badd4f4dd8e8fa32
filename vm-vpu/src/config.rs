//! VPU 子系统配置
//!
//! 支持从 TOML / JSON 加载，缺省字段使用默认值。
//!
//! ```toml
//! max_instances = 5
//! hw_timeout_ms = 200
//! idle_poll_ms = 50
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{VpuError, VpuResult};

/// 实例槽位数量上限
pub const MAX_INSTANCE_SLOTS: usize = 64;

/// VPU 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpuConfig {
    /// 共享同一硬件块的逻辑实例数量
    pub max_instances: usize,
    /// 单次硬件调用等待完成中断的超时（毫秒）
    pub hw_timeout_ms: u64,
    /// Worker 空闲时的轮询间隔（毫秒），用于及时发现停止请求
    pub idle_poll_ms: u64,
    /// 紧急停止时等待所有 Close 完成的总时限（毫秒）
    pub force_close_timeout_ms: u64,
    /// 最后一次关闭设备时等待每个实例 Close 完成的时限（毫秒）
    pub close_wait_ms: u64,
    /// Worker 线程名
    pub worker_name: String,
}

impl Default for VpuConfig {
    fn default() -> Self {
        Self {
            max_instances: 5,
            hw_timeout_ms: 200,
            idle_poll_ms: 50,
            force_close_timeout_ms: 200,
            close_wait_ms: 200,
            worker_name: "vpu-worker".to_string(),
        }
    }
}

impl VpuConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> VpuResult<()> {
        if self.max_instances == 0 || self.max_instances > MAX_INSTANCE_SLOTS {
            return Err(VpuError::Config(format!(
                "max_instances must be in 1..={}, got {}",
                MAX_INSTANCE_SLOTS, self.max_instances
            )));
        }
        let durations = [
            ("hw_timeout_ms", self.hw_timeout_ms),
            ("idle_poll_ms", self.idle_poll_ms),
            ("force_close_timeout_ms", self.force_close_timeout_ms),
            ("close_wait_ms", self.close_wait_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(VpuError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.worker_name.is_empty() {
            return Err(VpuError::Config("worker_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(toml: &str) -> VpuResult<Self> {
        let config: Self = toml::from_str(toml)
            .map_err(|e| VpuError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 字符串加载配置
    pub fn from_json(json: &str) -> VpuResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VpuError::Config(format!("JSON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 将配置序列化为 TOML
    pub fn to_toml(&self) -> VpuResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpuError::Config(format!("TOML serialize error: {}", e)))
    }

    pub fn hw_timeout(&self) -> Duration {
        Duration::from_millis(self.hw_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn force_close_timeout(&self) -> Duration {
        Duration::from_millis(self.force_close_timeout_ms)
    }

    pub fn close_wait(&self) -> Duration {
        Duration::from_millis(self.close_wait_ms)
    }
}

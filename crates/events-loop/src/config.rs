//! 调度器配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EventsLoopSdkError, Result};

/// 默认同步间隔（秒）
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// 默认完成事件广播容量
pub const DEFAULT_COMPLETION_CHANNEL_CAPACITY: usize = 100;

/// Events loop 调度器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsLoopConfig {
    /// 定时器间隔（秒）- 每次触发为所有已启用 loop 请求一个同步周期
    pub sync_interval_secs: u64,
    /// 完成事件广播 channel 容量，订阅者落后超过该值会丢失旧事件
    pub completion_channel_capacity: usize,
}

impl Default for EventsLoopConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            completion_channel_capacity: DEFAULT_COMPLETION_CHANNEL_CAPACITY,
        }
    }
}

impl EventsLoopConfig {
    pub fn builder() -> EventsLoopConfigBuilder {
        EventsLoopConfigBuilder::new()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// 从 JSON 读取配置，缺省字段使用默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EventsLoopConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(EventsLoopSdkError::Config(
                "sync_interval_secs 必须大于 0".to_string(),
            ));
        }
        if self.completion_channel_capacity == 0 {
            return Err(EventsLoopSdkError::Config(
                "completion_channel_capacity 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置构建器
pub struct EventsLoopConfigBuilder {
    config: EventsLoopConfig,
}

impl EventsLoopConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EventsLoopConfig::default(),
        }
    }

    /// 设置同步间隔（秒）
    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn completion_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.completion_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<EventsLoopConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EventsLoopConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

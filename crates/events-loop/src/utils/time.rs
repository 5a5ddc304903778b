//! 时间来源
//!
//! 调度器不直接调用 `Utc::now()`：定时器首次触发时间、完成记录时间戳都取自 [`Clock`]，
//! 测试中可以替换为固定时钟。

use chrono::{DateTime, Utc};

/// 当前时间提供者
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 格式化为日志友好的时间字符串（UTC）
pub fn format_log_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

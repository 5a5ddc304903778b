use serde::{Deserialize, Serialize};

/// 单个 loop 在一次同步周期内的失败类型
///
/// 只影响失败的那个 loop：同一 tick 中其它 loop 的周期照常执行。
/// 错误先交给失败 loop 自己的 `on_error`，再进入调度器的完成记录。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventsLoopError {
    /// 没有 latest event ID，无法发起 poll（需要走 fetch-latest-ID 之类的恢复路径）
    #[error("缺少 latest event ID，无法拉取事件")]
    MissingLatestEventId,

    /// poll 调用失败
    #[error("拉取事件失败: {0}")]
    Network(String),

    /// 服务端要求清空本地缓存并完整重同步
    #[error("本地缓存已过期，需要清空缓存并重新同步")]
    CacheIsOutdated,

    /// process 调用失败，本页 cursor 未提交
    #[error("处理事件页失败: {0}")]
    PageProcessing(String),
}

impl EventsLoopError {
    /// 对应的周期结果类型
    pub fn outcome(&self) -> LoopOutcome {
        match self {
            EventsLoopError::MissingLatestEventId => LoopOutcome::MissingLatestEventId,
            EventsLoopError::Network(_) => LoopOutcome::Network,
            EventsLoopError::CacheIsOutdated => LoopOutcome::CacheIsOutdated,
            EventsLoopError::PageProcessing(_) => LoopOutcome::PageProcessing,
        }
    }
}

/// 一次同步周期的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopOutcome {
    /// 已追上服务端（最后一页 has_more_pages = false）
    Completed,
    MissingLatestEventId,
    Network,
    CacheIsOutdated,
    PageProcessing,
}

impl LoopOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopOutcome::Completed)
    }
}

impl std::fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopOutcome::Completed => write!(f, "completed"),
            LoopOutcome::MissingLatestEventId => write!(f, "missing_latest_event_id"),
            LoopOutcome::Network => write!(f, "network"),
            LoopOutcome::CacheIsOutdated => write!(f, "cache_is_outdated"),
            LoopOutcome::PageProcessing => write!(f, "page_processing"),
        }
    }
}

/// crate 级错误（配置校验、JSON 解析）
///
/// 调度器的公开操作（start / trigger / enable …）不会返回错误，
/// 这里只覆盖构建阶段可能出现的问题。
#[derive(Debug, thiserror::Error)]
pub enum EventsLoopSdkError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for EventsLoopSdkError {
    fn from(error: serde_json::Error) -> Self {
        EventsLoopSdkError::Json(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventsLoopSdkError>;

//! 定时器抽象
//!
//! 调度器只依赖 [`TimerScheduler`]：生产环境用 [`TokioTimerScheduler`]，
//! 测试中用手动触发的实现替换，保证 tick 的时机完全可控。

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 每次定时器触发时调用
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// 已调度的重复定时器
///
/// clone 出来的句柄共享同一个定时器，任意一个 `invalidate()` 后全部失效。
#[derive(Debug, Clone)]
pub struct TimerHandle {
    inner: Arc<TimerInner>,
}

#[derive(Debug)]
struct TimerInner {
    interval: Duration,
    fire_date: DateTime<Utc>,
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn new(interval: Duration, fire_date: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                interval,
                fire_date,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 触发间隔
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// 首次触发时间
    pub fn fire_date(&self) -> DateTime<Utc> {
        self.inner.fire_date
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// 停止定时器，之后不会再触发
    pub fn invalidate(&self) {
        self.inner.cancel.cancel();
    }

    /// 定时器失效时被取消的 token（供 [`TimerScheduler`] 实现使用）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

/// 重复定时器调度
pub trait TimerScheduler: Send + Sync + std::fmt::Debug {
    /// 从 `fire_date` 开始，每隔 `interval` 调用一次 `tick`，直到返回的句柄失效
    fn schedule(&self, interval: Duration, fire_date: DateTime<Utc>, tick: TickCallback) -> TimerHandle;
}

/// 基于 tokio interval 的定时器
#[derive(Debug, Clone)]
pub struct TokioTimerScheduler {
    runtime: Handle,
}

impl TokioTimerScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// 使用当前 tokio runtime
    ///
    /// 必须在 runtime 上下文中调用。
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, interval: Duration, fire_date: DateTime<Utc>, tick: TickCallback) -> TimerHandle {
        let handle = TimerHandle::new(interval, fire_date);
        let token = handle.cancellation_token();

        // tokio::time::interval 不接受 0
        let period = interval.max(Duration::from_millis(1));
        let delay = (fire_date - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + delay;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("⏹️ 定时器已失效，停止触发");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick();
                    }
                }
            }
        });

        handle
    }
}

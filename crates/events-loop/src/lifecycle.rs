//! App 生命周期管理
//!
//! 把前后台切换统一转发给各模块：进入后台时暂停同步，回到前台时恢复。

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// 生命周期回调 Hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续执行其余 Hook，最后返回第一个错误。
    pub async fn notify_background(&self) -> Result<()> {
        self.notify(AppPhase::Background).await
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.notify(AppPhase::Foreground).await
    }

    async fn notify(&self, phase: AppPhase) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到{}", phase);

        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match phase {
                AppPhase::Background => hook.on_background().await,
                AppPhase::Foreground => hook.on_foreground().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook #{} {}切换失败: {}", index, phase, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("✅ 所有模块{}切换完成", phase);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AppPhase {
    Background,
    Foreground,
}

impl std::fmt::Display for AppPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppPhase::Background => write!(f, "后台"),
            AppPhase::Foreground => write!(f, "前台"),
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

mod scheduler_hook;
pub use scheduler_hook::SchedulerLifecycleHook;

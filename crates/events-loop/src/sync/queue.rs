//! 每个 loop 专属的串行执行队列
//!
//! 队列最多持有一个未完成的同步周期：
//! - 空闲时收到请求 → 排入一个周期
//! - 已排队时再收到任何请求 → 合并进已排队的周期
//! - 运行中收到 tick → 丢弃（周期本身会通过 has_more_pages 追平）
//! - 运行中收到手动触发 → 记一次重跑，当前周期结束后立即执行
//!
//! 暂停只影响尚未开始的周期，正在执行的周期照常跑完。

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 队列状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Scheduled,
    Running,
    /// 运行中，且结束后需要再跑一次（手动触发）
    RunningWithRerun,
}

/// 同步周期请求来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleRequest {
    /// 定时器触发
    Tick,
    /// 手动触发（trigger_core_loop / trigger_special_loop）
    Manual,
}

#[derive(Debug, Clone)]
pub struct LoopQueue {
    shared: Arc<QueueShared>,
}

#[derive(Debug)]
struct QueueShared {
    label: String,
    state: watch::Sender<QueueState>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl LoopQueue {
    pub fn new(label: impl Into<String>, paused: bool) -> Self {
        let (state, _) = watch::channel(QueueState::Idle);
        let (paused, _) = watch::channel(paused);
        Self {
            shared: Arc::new(QueueShared {
                label: label.into(),
                state,
                paused,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> QueueState {
        *self.shared.state.borrow()
    }

    /// 请求一个同步周期，返回请求是否被接受（false 表示已被合并或丢弃）
    pub fn request(&self, request: CycleRequest) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let accepted = self.shared.state.send_if_modified(|state| match (*state, request) {
            (QueueState::Idle, _) => {
                *state = QueueState::Scheduled;
                true
            }
            (QueueState::Running, CycleRequest::Manual) => {
                *state = QueueState::RunningWithRerun;
                true
            }
            _ => false,
        });

        if !accepted {
            trace!("[{}] 已有未完成的同步周期，合并 {:?} 请求", self.shared.label, request);
        }
        accepted
    }

    pub fn pause(&self) {
        self.shared.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.shared.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    /// 停止队列：尚未开始的周期不再执行，运行中的周期通过 epoch 检查丢弃结果
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// 与队列生命周期绑定的取消 token
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// 等待队列进入稳定状态：没有排队或运行中的周期
    ///
    /// 暂停中的队列即使有排队的周期也视为稳定；已停止的队列立即返回。
    pub async fn settled(&self) {
        let mut state_rx = self.shared.state.subscribe();
        let mut paused_rx = self.shared.paused.subscribe();

        loop {
            if self.is_shut_down() {
                return;
            }

            let state = *state_rx.borrow_and_update();
            let paused = *paused_rx.borrow_and_update();
            match state {
                QueueState::Idle => return,
                QueueState::Scheduled if paused => return,
                _ => {}
            }

            tokio::select! {
                _ = state_rx.changed() => {}
                _ = paused_rx.changed() => {}
                _ = self.shared.cancel.cancelled() => return,
            }
        }
    }

    /// 启动 worker，每个排队的周期调用一次 `run_cycle`
    pub fn spawn_worker<F, Fut>(&self, runtime: &Handle, mut run_cycle: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = self.clone();
        runtime.spawn(async move {
            let mut state_rx = queue.shared.state.subscribe();
            let mut paused_rx = queue.shared.paused.subscribe();
            let cancel = queue.cancellation_token();

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    alive = wait_until_scheduled(&mut state_rx) => if !alive { break },
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    alive = wait_until_resumed(&mut paused_rx) => if !alive { break },
                }

                if !queue.begin_cycle() {
                    continue;
                }
                run_cycle().await;
                queue.finish_cycle();
            }

            debug!("[{}] 队列 worker 已退出", queue.shared.label);
        });
    }

    fn begin_cycle(&self) -> bool {
        self.shared.state.send_if_modified(|state| {
            if *state == QueueState::Scheduled {
                *state = QueueState::Running;
                true
            } else {
                false
            }
        })
    }

    fn finish_cycle(&self) {
        self.shared.state.send_modify(|state| {
            *state = match *state {
                QueueState::RunningWithRerun => QueueState::Scheduled,
                _ => QueueState::Idle,
            };
        });
    }
}

async fn wait_until_scheduled(rx: &mut watch::Receiver<QueueState>) -> bool {
    rx.wait_for(|state| *state == QueueState::Scheduled).await.is_ok()
}

async fn wait_until_resumed(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|paused| !*paused).await.is_ok()
}

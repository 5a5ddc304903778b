//! 同步周期完成记录
//!
//! 每个周期结束（成功或失败）都会产生一条 [`LoopCompletion`]：
//! 写入 [`SyncStatusBook`] 的按 loop 汇总状态，并广播给订阅者。

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::LoopOutcome;
use super::events_loop::LoopKind;

/// 一次同步周期的完成报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopCompletion {
    pub kind: LoopKind,
    pub loop_id: String,
    /// 该 loop 本次启用的代数，禁用后重新启用会递增
    pub generation: u64,
    pub outcome: LoopOutcome,
    /// 失败原因（成功时为 None）
    pub error: Option<String>,
    /// 本周期成功处理的页数
    pub pages_processed: usize,
    /// 周期结束时已提交的 cursor
    pub latest_event_id: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// 单个 loop 的汇总同步状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSyncStatus {
    pub last_outcome: Option<LoopOutcome>,
    pub last_error: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// 连续失败次数，成功后清零
    pub consecutive_failures: u32,
    pub total_cycles: u64,
    pub latest_event_id: Option<String>,
}

type LoopKey = (LoopKind, String);

#[derive(Debug, Default)]
struct Ledger {
    /// 每个已启用 loop 当前有效的启用代数
    generations: HashMap<LoopKey, u64>,
    statuses: HashMap<LoopKey, LoopSyncStatus>,
}

/// 完成记录
///
/// 只接受当前启用代数的完成报告：代数校验、写入状态和 `forget` 在同一把锁下完成，
/// 已禁用 loop 的迟到报告不会复活状态，也不会被广播。
#[derive(Debug)]
pub struct SyncStatusBook {
    ledger: RwLock<Ledger>,
    sender: broadcast::Sender<LoopCompletion>,
}

impl SyncStatusBook {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            ledger: RwLock::new(Ledger::default()),
            sender,
        }
    }

    /// loop 启用后登记其代数，之前代数的报告随之失效
    pub fn activate(&self, kind: LoopKind, loop_id: &str, generation: u64) {
        let mut ledger = self.ledger.write();
        let key = (kind, loop_id.to_string());
        ledger.statuses.remove(&key);
        ledger.generations.insert(key, generation);
    }

    /// 记录一次完成并广播；代数已失效时丢弃，返回是否记录
    pub fn record(&self, completion: LoopCompletion) -> bool {
        // 广播也在锁内完成，forget 之后不会再有该代数的广播
        let mut ledger = self.ledger.write();
        {
            let key = (completion.kind, completion.loop_id.clone());
            if ledger.generations.get(&key) != Some(&completion.generation) {
                debug!(
                    "{} loop {} 的完成报告已过期 (generation={})，丢弃",
                    completion.kind, completion.loop_id, completion.generation
                );
                return false;
            }
            let status = ledger.statuses.entry(key).or_default();

            status.total_cycles += 1;
            status.last_outcome = Some(completion.outcome);
            status.last_error = completion.error.clone();
            status.last_finished_at = Some(completion.finished_at);
            status.latest_event_id = completion.latest_event_id.clone();

            if completion.outcome.is_success() {
                status.consecutive_failures = 0;
                status.last_success_at = Some(completion.finished_at);
            } else {
                status.consecutive_failures += 1;
                if status.consecutive_failures >= 3 {
                    warn!(
                        "⚠️ {} loop {} 已连续失败 {} 次（最近一次: {}）",
                        completion.kind, completion.loop_id, status.consecutive_failures, completion.outcome
                    );
                }
            }
        }

        debug!(
            "{} loop {} 周期结束: {}，处理 {} 页",
            completion.kind, completion.loop_id, completion.outcome, completion.pages_processed
        );

        // 没有订阅者时发送失败，忽略即可
        let _ = self.sender.send(completion);
        drop(ledger);
        true
    }

    pub fn status(&self, kind: LoopKind, loop_id: &str) -> Option<LoopSyncStatus> {
        self.ledger.read().statuses.get(&(kind, loop_id.to_string())).cloned()
    }

    /// loop 被禁用后清除其记录，之后该代数的报告一律丢弃
    pub fn forget(&self, kind: LoopKind, loop_id: &str) {
        let mut ledger = self.ledger.write();
        let key = (kind, loop_id.to_string());
        ledger.generations.remove(&key);
        ledger.statuses.remove(&key);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopCompletion> {
        self.sender.subscribe()
    }
}

//! 账本流水模型
//!
//! 流水只追加不修改，`balance_after` 保存写入时的余额，
//! 幂等重放时直接以原流水作为结果返回。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::{EntryStatus, LedgerReason};

/// 账本流水
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: Uuid,
    pub delta: i64,
    pub reason: LedgerReason,
    pub reference_id: Option<String>,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// 一次余额变动请求
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCommand {
    pub account_id: Uuid,
    pub delta: i64,
    pub reason: LedgerReason,
    pub reference_id: Option<String>,
    pub description: Option<String>,
}

impl LedgerCommand {
    pub fn new(account_id: Uuid, delta: i64, reason: LedgerReason) -> Self {
        Self {
            account_id,
            delta,
            reason,
            reference_id: None,
            description: None,
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 余额变动结果
///
/// `replayed` 为 true 表示命中已有幂等键，未产生新的流水和余额变化
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerReceipt {
    pub entry_id: i64,
    pub new_balance: i64,
    pub delta: i64,
    pub replayed: bool,
}

impl LedgerReceipt {
    pub fn applied(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id,
            new_balance: entry.balance_after,
            delta: entry.delta,
            replayed: false,
        }
    }

    pub fn replay(entry: &LedgerEntry) -> Self {
        Self {
            replayed: true,
            ..Self::applied(entry)
        }
    }
}

/// 钱包统计（运营侧）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalletStats {
    pub total_entries: i64,
    /// 已完成购买流水的积分总和
    pub total_purchased: i64,
}

//! 服务层数据传输对象
//!
//! 与内部领域模型解耦，供调用方（HTTP/Bot 适配层）直接序列化返回

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{LedgerEntry, LedgerReceipt, RedemptionKind, SmsRecord};

/// 兑换结果
///
/// 幂等重放与首次成功的结构一致，`replayed` 区分两者
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResult {
    pub kind: RedemptionKind,
    pub success: bool,
    pub credits_added: i64,
    pub new_balance: i64,
    pub replayed: bool,
}

impl RedemptionResult {
    pub fn from_receipt(kind: RedemptionKind, receipt: &LedgerReceipt) -> Self {
        Self {
            kind,
            success: true,
            credits_added: receipt.delta,
            new_balance: receipt.new_balance,
            replayed: receipt.replayed,
        }
    }

    /// 重放已有流水
    pub fn from_entry(kind: RedemptionKind, entry: &LedgerEntry) -> Self {
        Self::from_receipt(kind, &LedgerReceipt::replay(entry))
    }

    /// 未满足发放条件（非错误）
    pub fn not_eligible(kind: RedemptionKind, balance: i64) -> Self {
        Self {
            kind,
            success: false,
            credits_added: 0,
            new_balance: balance,
            replayed: false,
        }
    }
}

/// 号码租用结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberLeaseResult {
    pub lease_id: Uuid,
    pub phone_number: String,
    pub country_id: Uuid,
    pub country_name: String,
    pub credits_spent: i64,
    pub new_balance: i64,
}

/// 单次短信轮询结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub phone_number: String,
    /// 本次新写入的短信数量
    pub new_messages: u64,
    /// 上游返回的短信总数（含已记录的）
    pub fetched: u64,
    /// 上游不可用时为 false，此时 `new_messages` 为 0
    pub source_available: bool,
    pub polled_at: DateTime<Utc>,
}

/// 短信查看视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsInbox {
    pub phone_number: String,
    pub new_messages: u64,
    pub source_available: bool,
    pub messages: Vec<SmsRecord>,
}

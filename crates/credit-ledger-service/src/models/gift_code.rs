//! 兑换码模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{LedgerCommand, LedgerReason, LedgerReceipt};

/// 兑换码
///
/// 不变量：`0 <= claimed_count <= max_claims`，`claimed_count` 只增不减，
/// 且与 giftcode 流水同事务提交
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GiftCode {
    pub id: Uuid,
    pub code: String,
    pub credits_amount: i64,
    pub max_claims: i32,
    pub claimed_count: i32,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl GiftCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.claimed_count >= self.max_claims
    }

    /// 当前是否可领取
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now) && !self.is_exhausted()
    }

    /// 兑换码统一以大写存储和匹配
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// 领取幂等键：同一账户对同一兑换码至多入账一次
    pub fn claim_reference(code: &str, account_id: Uuid) -> String {
        format!("{}:{}", Self::normalize(code), account_id)
    }

    /// 该账户领取本兑换码对应的入账指令
    pub fn claim_command(&self, account_id: Uuid) -> LedgerCommand {
        LedgerCommand::new(account_id, self.credits_amount, LedgerReason::GiftCode)
            .with_reference(Self::claim_reference(&self.code, account_id))
            .with_description(format!("Gift code {}", self.code))
    }
}

/// 一次领取的原子结果
#[derive(Debug, Clone)]
pub enum GiftCodeClaim {
    /// 已入账，`gift_code` 为自增后的快照
    Credited {
        receipt: LedgerReceipt,
        gift_code: GiftCode,
    },
    /// 该账户已领取过
    AlreadyClaimed,
    /// 不可领取（停用、过期或已领完）；兑换码不存在时为 None
    Unclaimable(Option<GiftCode>),
}

/// 新建兑换码参数
#[derive(Debug, Clone, Deserialize)]
pub struct NewGiftCode {
    pub code: String,
    pub credits_amount: i64,
    pub max_claims: i32,
    pub expiry_date: DateTime<Utc>,
}

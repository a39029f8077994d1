//! 积分账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 账本变动原因
///
/// 与 `reference_id` 组成幂等键，同一 (reason, reference_id) 至多对应一条流水
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum LedgerReason {
    /// 开户初始积分
    Opening,
    /// 支付购买
    Purchase,
    /// 推荐奖励
    Referral,
    /// 每日登录奖励
    Daily,
    /// 兑换码
    #[serde(rename = "giftcode")]
    #[sqlx(rename = "giftcode")]
    GiftCode,
    /// 号码租用扣费
    #[serde(rename = "number-lease")]
    #[sqlx(rename = "number-lease")]
    NumberLease,
    /// 运营手工调整
    Admin,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Purchase => "purchase",
            Self::Referral => "referral",
            Self::Daily => "daily",
            Self::GiftCode => "giftcode",
            Self::NumberLease => "number-lease",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流水状态
///
/// 账本写入的流水均为已完成；pending/failed 保留给外部支付对账导入
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    #[default]
    Completed,
    Failed,
}

/// 兑换类型（用于结果与指标标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionKind {
    GiftCode,
    Referral,
    DailyBonus,
    Payment,
}

impl RedemptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GiftCode => "gift_code",
            Self::Referral => "referral",
            Self::DailyBonus => "daily_bonus",
            Self::Payment => "payment",
        }
    }
}

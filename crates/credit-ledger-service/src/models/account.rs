//! 账户模型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 积分账户
///
/// `balance` 只能经由积分账本修改，`version` 在每次余额变动时递增
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub balance: i64,
    pub version: i64,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub successful_referrals: i32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 距上次登录是否已超过给定间隔（从未登录视为满足）
    pub fn daily_bonus_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_login_at {
            None => true,
            Some(last) => now - last > interval,
        }
    }
}

/// 新建账户参数
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub username: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
}

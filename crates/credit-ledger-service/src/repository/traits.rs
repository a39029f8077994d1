//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，支持 PostgreSQL、内存实现与 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Account, Country, GiftCode, GiftCodeClaim, LedgerCommand, LedgerEntry, LedgerReason, LedgerReceipt,
    NewAccount, NewCountry, NewGiftCode, NewSmsRecord, PhoneLease, SmsRecord, WalletStats,
};

/// 账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepositoryTrait: Send + Sync {
    /// 创建账户，并在同一原子单元内写入开户流水
    async fn create_account(&self, account: &NewAccount, opening_balance: i64) -> Result<Account>;
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;
    async fn find_by_referral_code(&self, referral_code: &str) -> Result<Option<Account>>;
    async fn increment_successful_referrals(&self, id: Uuid) -> Result<()>;
    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// 账本仓储接口
///
/// `apply` 是唯一修改余额的入口：同账户串行、流水与余额同时可见、幂等键重放返回原结果
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    async fn apply(&self, command: &LedgerCommand) -> Result<LedgerReceipt>;
    async fn find_entry(
        &self,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>>;
    async fn list_entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>>;
    async fn wallet_stats(&self) -> Result<WalletStats>;
}

/// 兑换码仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GiftCodeRepositoryTrait: Send + Sync {
    async fn create_gift_code(&self, gift_code: &NewGiftCode) -> Result<GiftCode>;
    async fn get_by_code(&self, code: &str) -> Result<Option<GiftCode>>;
    async fn list(&self) -> Result<Vec<GiftCode>>;
    async fn set_active(&self, code: &str, is_active: bool) -> Result<bool>;
    /// 领取兑换码
    ///
    /// 同一原子单元内：锁定兑换码、检查该账户是否已领取、校验可领取、
    /// 写入兑换码流水并自增 claimed_count。任一步失败则全部不生效。
    async fn claim(
        &self,
        code: &str,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GiftCodeClaim>;
}

/// 国家号码池仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CountryRepositoryTrait: Send + Sync {
    async fn create_country(&self, country: &NewCountry) -> Result<Country>;
    async fn get_country(&self, id: Uuid) -> Result<Option<Country>>;
    async fn increment_used_numbers(&self, id: Uuid) -> Result<()>;
    async fn record_lease(&self, lease: &PhoneLease) -> Result<()>;
    async fn list_leases(&self, account_id: Uuid, limit: i64) -> Result<Vec<PhoneLease>>;
}

/// 短信仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsRepositoryTrait: Send + Sync {
    /// 按自然键插入，已存在时返回 false
    async fn insert_if_absent(&self, record: &NewSmsRecord) -> Result<bool>;
    async fn list_by_phone(&self, phone_number: &str, limit: i64) -> Result<Vec<SmsRecord>>;
}

//! 服务装配
//!
//! 将仓储、外部客户端与服务按配置组装为一个整体，并在调用方边界执行限流。
//! 传输层（HTTP/Bot）只需持有 [`CreditLedgerApp`]。

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use otp_shared::config::AppConfig;

use crate::clients::{PaymentVerifier, SmsSource};
use crate::error::Result;
use crate::rate_limit::{InMemoryRateLimiter, LimitedOperation, RateLimitRules, RateLimiter};
use crate::repository::{
    AccountRepositoryTrait, CountryRepositoryTrait, GiftCodeRepositoryTrait, InMemoryStore,
    LedgerRepositoryTrait, SmsRepositoryTrait,
};
use crate::service::{
    AccountService, CreditLedger, NumberAllocator, NumberLeaseResult, RedemptionPolicy,
    RedemptionService, SmsInbox, SmsPoller,
};

/// 服务依赖的存储与外部实现
pub struct Backends {
    pub accounts: Arc<dyn AccountRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub gift_codes: Arc<dyn GiftCodeRepositoryTrait>,
    pub countries: Arc<dyn CountryRepositoryTrait>,
    pub sms: Arc<dyn SmsRepositoryTrait>,
    pub payment_verifier: Arc<dyn PaymentVerifier>,
    pub sms_source: Arc<dyn SmsSource>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl Backends {
    /// 全部存储使用同一个内存实现，限流使用进程内计数
    pub fn in_memory(
        config: &AppConfig,
        store: Arc<InMemoryStore>,
        payment_verifier: Arc<dyn PaymentVerifier>,
        sms_source: Arc<dyn SmsSource>,
    ) -> Self {
        Self {
            accounts: store.clone(),
            ledger: store.clone(),
            gift_codes: store.clone(),
            countries: store.clone(),
            sms: store,
            payment_verifier,
            sms_source,
            rate_limiter: Arc::new(InMemoryRateLimiter::new(RateLimitRules::from(
                &config.rate_limit,
            ))),
        }
    }
}

/// 积分账本应用
pub struct CreditLedgerApp {
    pub ledger: Arc<CreditLedger>,
    pub redemptions: Arc<RedemptionService>,
    pub accounts: Arc<AccountService>,
    pub allocator: Arc<NumberAllocator>,
    pub sms_poller: Arc<SmsPoller>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl CreditLedgerApp {
    pub fn build(config: &AppConfig, backends: Backends) -> Self {
        let ledger = Arc::new(CreditLedger::new(
            backends.ledger,
            config.ledger.operation_timeout(),
        ));

        let redemptions = Arc::new(RedemptionService::new(
            ledger.clone(),
            backends.accounts.clone(),
            backends.gift_codes,
            backends.payment_verifier,
            RedemptionPolicy::from_config(&config.pricing, &config.payment),
        ));

        let accounts = Arc::new(AccountService::new(
            backends.accounts.clone(),
            redemptions.clone(),
            config.pricing.starting_balance,
        ));

        let allocator = Arc::new(NumberAllocator::new(
            ledger.clone(),
            backends.accounts,
            backends.countries,
            config.pricing.number_lease_cost,
        ));

        let sms_poller = Arc::new(SmsPoller::new(
            backends.sms_source,
            backends.sms,
            Duration::from_millis(config.sms.follow_up_delay_ms),
        ));

        Self {
            ledger,
            redemptions,
            accounts,
            allocator,
            sms_poller,
            rate_limiter: backends.rate_limiter,
        }
    }

    /// 限流后租用号码
    pub async fn lease_number(&self, account_id: Uuid, country_id: Uuid) -> Result<NumberLeaseResult> {
        self.rate_limiter
            .check(LimitedOperation::NumberLease, account_id)
            .await?;
        self.allocator.lease(account_id, country_id).await
    }

    /// 限流后拉取并查看短信
    pub async fn check_sms(&self, account_id: Uuid, phone_number: &str) -> Result<SmsInbox> {
        self.rate_limiter
            .check(LimitedOperation::SmsCheck, account_id)
            .await?;
        self.sms_poller.check_messages(phone_number).await
    }
}

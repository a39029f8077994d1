//! 积分兑换服务
//!
//! 将外部事件（兑换码、推荐、登录、支付）转换为一次积分账本调用，
//! 每种流程各自保证"至多生效一次"：
//! - 兑换码：仓储内单个原子单元完成锁定、同账户检查、入账与计数，幂等键 (giftcode, CODE:account)
//! - 推荐奖励：(referral, 新账户 ID) 幂等键
//! - 每日奖励：(daily, account:日期) 幂等键
//! - 支付校验：(purchase, 支付流水号) 幂等键，网络调用在任何锁之外完成

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use otp_shared::config::{PaymentConfig, PricingConfig};
use otp_shared::observability::metrics;
use otp_shared::retry::{RetryPolicy, retry_with_policy};

use crate::clients::PaymentVerifier;
use crate::error::{LedgerError, Result};
use crate::models::{
    Account, GiftCode, GiftCodeClaim, LedgerCommand, LedgerReason, NewGiftCode, RedemptionKind,
};
use crate::repository::{AccountRepositoryTrait, GiftCodeRepositoryTrait};
use crate::service::credit_ledger::CreditLedger;
use crate::service::dto::RedemptionResult;

/// 奖励与换算规则
#[derive(Debug, Clone)]
pub struct RedemptionPolicy {
    pub referral_bonus: i64,
    pub daily_bonus: i64,
    pub daily_bonus_interval: Duration,
    /// 每积分对应的主货币单位价格
    pub credit_price: f64,
    /// 支付金额的最小货币单位换算系数
    pub minor_unit_divisor: i64,
}

impl RedemptionPolicy {
    pub fn from_config(pricing: &PricingConfig, payment: &PaymentConfig) -> Self {
        Self {
            referral_bonus: pricing.referral_bonus,
            daily_bonus: pricing.daily_bonus,
            daily_bonus_interval: Duration::hours(pricing.daily_bonus_interval_hours),
            credit_price: pricing.credit_price,
            minor_unit_divisor: payment.minor_unit_divisor,
        }
    }

    /// 支付金额（最小货币单位）换算为积分，向下取整
    pub fn credits_for_amount(&self, amount_minor: i64) -> i64 {
        if amount_minor <= 0 || self.minor_unit_divisor <= 0 || self.credit_price <= 0.0 {
            return 0;
        }
        let major = amount_minor / self.minor_unit_divisor;
        (major as f64 / self.credit_price).floor() as i64
    }
}

impl Default for RedemptionPolicy {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default(), &PaymentConfig::default())
    }
}

/// 每日奖励幂等键：账户 + 自然日
pub fn daily_bonus_reference(account_id: Uuid, now: DateTime<Utc>) -> String {
    format!("{}:{}", account_id, now.format("%Y-%m-%d"))
}

/// 积分兑换服务
pub struct RedemptionService {
    ledger: Arc<CreditLedger>,
    account_repo: Arc<dyn AccountRepositoryTrait>,
    gift_code_repo: Arc<dyn GiftCodeRepositoryTrait>,
    payment_verifier: Arc<dyn PaymentVerifier>,
    policy: RedemptionPolicy,
    retry_policy: RetryPolicy,
}

impl RedemptionService {
    pub fn new(
        ledger: Arc<CreditLedger>,
        account_repo: Arc<dyn AccountRepositoryTrait>,
        gift_code_repo: Arc<dyn GiftCodeRepositoryTrait>,
        payment_verifier: Arc<dyn PaymentVerifier>,
        policy: RedemptionPolicy,
    ) -> Self {
        Self {
            ledger,
            account_repo,
            gift_code_repo,
            payment_verifier,
            policy,
            retry_policy: RetryPolicy::external_once(),
        }
    }

    /// 覆盖外部调用重试策略
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// 领取兑换码
    ///
    /// 锁定兑换码、同账户检查、入账与 claimed_count 自增在仓储的同一原子单元内完成；
    /// 超时返回 Timeout 时该单元要么整体提交要么整体回滚，重试会得到 AlreadyClaimed 或正常入账
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn claim_gift_code(&self, code: &str, account_id: Uuid) -> Result<RedemptionResult> {
        let kind = RedemptionKind::GiftCode;
        let code = GiftCode::normalize(code);
        if code.is_empty() {
            return Err(LedgerError::InvalidCode(code));
        }

        let now = Utc::now();
        let started = Instant::now();
        let claim = self
            .ledger
            .with_timeout(
                "gift_code.claim",
                self.gift_code_repo.claim(&code, account_id, now),
            )
            .await
            .inspect_err(|e| metrics::record_redemption(kind.as_str(), e.error_code()))?;

        let (receipt, gift_code) = match claim {
            GiftCodeClaim::Credited { receipt, gift_code } => (receipt, gift_code),
            GiftCodeClaim::AlreadyClaimed => {
                metrics::record_redemption(kind.as_str(), "already_claimed");
                return Err(LedgerError::AlreadyClaimed(code));
            }
            GiftCodeClaim::Unclaimable(snapshot) => {
                let err = unclaimable_error(&code, snapshot.as_ref(), now);
                metrics::record_redemption(kind.as_str(), err.error_code());
                return Err(err);
            }
        };

        metrics::record_ledger_entry(
            LedgerReason::GiftCode.as_str(),
            started.elapsed().as_secs_f64(),
        );
        metrics::record_redemption(kind.as_str(), "success");
        info!(
            code = %code,
            credits = receipt.delta,
            claimed_count = gift_code.claimed_count,
            "兑换码领取成功"
        );

        Ok(RedemptionResult::from_receipt(kind, &receipt))
    }

    /// 发放推荐奖励
    ///
    /// 推荐码无效时返回 None（注册流程不因此失败）；
    /// 以新账户 ID 为幂等键，同一次注册至多奖励一次
    #[instrument(skip(self), fields(new_account_id = %new_account_id))]
    pub async fn award_referral(
        &self,
        referral_code: &str,
        new_account_id: Uuid,
    ) -> Result<Option<RedemptionResult>> {
        let kind = RedemptionKind::Referral;

        let Some(referrer) = self.account_repo.find_by_referral_code(referral_code).await? else {
            warn!(referral_code = %referral_code, "推荐码不存在，忽略推荐奖励");
            metrics::record_redemption(kind.as_str(), "invalid_code");
            return Ok(None);
        };

        if referrer.id == new_account_id {
            return Err(LedgerError::Validation("不能推荐自己".to_string()));
        }

        let command = LedgerCommand::new(referrer.id, self.policy.referral_bonus, LedgerReason::Referral)
            .with_reference(new_account_id.to_string())
            .with_description(format!("Referral bonus for {}", new_account_id));
        let receipt = self.ledger.apply(command).await?;

        if !receipt.replayed {
            if let Err(e) = self
                .account_repo
                .increment_successful_referrals(referrer.id)
                .await
            {
                warn!(referrer_id = %referrer.id, error = %e, "推荐计数更新失败");
            }
            info!(referrer_id = %referrer.id, credits = receipt.delta, "推荐奖励已发放");
        }

        metrics::record_redemption(kind.as_str(), outcome(receipt.replayed));
        Ok(Some(RedemptionResult::from_receipt(kind, &receipt)))
    }

    /// 登录时发放每日奖励
    ///
    /// 距上次领取未超过间隔时返回 `success = false`，不视为错误；
    /// 同一自然日内的并发登录通过幂等键只入账一次
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn claim_daily_bonus(&self, account_id: Uuid) -> Result<RedemptionResult> {
        let kind = RedemptionKind::DailyBonus;
        let account = self.load_account(account_id).await?;
        let now = Utc::now();

        if !account.daily_bonus_due(now, self.policy.daily_bonus_interval) {
            metrics::record_redemption(kind.as_str(), "not_eligible");
            return Ok(RedemptionResult::not_eligible(kind, account.balance));
        }

        let command = LedgerCommand::new(account_id, self.policy.daily_bonus, LedgerReason::Daily)
            .with_reference(daily_bonus_reference(account_id, now))
            .with_description("Daily login reward");
        let receipt = self.ledger.apply(command).await?;

        if !receipt.replayed {
            self.account_repo.update_last_login(account_id, now).await?;
        }

        metrics::record_redemption(kind.as_str(), outcome(receipt.replayed));
        Ok(RedemptionResult::from_receipt(kind, &receipt))
    }

    /// 校验支付并入账
    ///
    /// 1. 该流水号已入账 -> 直接返回缓存结果，不再访问服务商
    /// 2. 调用服务商校验（可重试一次）
    /// 3. 非成功状态或金额不足一积分 -> VerificationFailed
    /// 4. 以流水号为幂等键入账
    #[instrument(skip(self), fields(account_id = %account_id, reference_id = %reference_id))]
    pub async fn verify_payment(
        &self,
        reference_id: &str,
        account_id: Uuid,
    ) -> Result<RedemptionResult> {
        let kind = RedemptionKind::Payment;
        let reference_id = reference_id.trim();
        if reference_id.is_empty() {
            return Err(LedgerError::Validation("支付流水号不能为空".to_string()));
        }

        // 1. 已入账
        if let Some(entry) = self
            .ledger
            .find_entry(LedgerReason::Purchase, reference_id)
            .await?
        {
            if entry.account_id != account_id {
                return Err(LedgerError::DuplicateReference {
                    reason: LedgerReason::Purchase.to_string(),
                    reference_id: reference_id.to_string(),
                });
            }
            metrics::record_redemption(kind.as_str(), "replayed");
            return Ok(RedemptionResult::from_entry(kind, &entry));
        }

        // 2. 服务商校验
        let verifier = Arc::clone(&self.payment_verifier);
        let verification = retry_with_policy(
            &self.retry_policy,
            "payment.verify",
            LedgerError::is_retryable,
            || {
                let verifier = Arc::clone(&verifier);
                let reference_id = reference_id.to_string();
                async move { verifier.verify(&reference_id).await }
            },
        )
        .await
        .inspect_err(|e| metrics::record_redemption(kind.as_str(), e.error_code()))?;

        // 3. 状态与金额
        if !verification.is_successful() {
            metrics::record_redemption(kind.as_str(), "verification_failed");
            return Err(LedgerError::VerificationFailed {
                reference_id: reference_id.to_string(),
                reason: format!("支付状态为 {}", verification.status),
            });
        }

        let credits = self.policy.credits_for_amount(verification.amount);
        if credits <= 0 {
            metrics::record_redemption(kind.as_str(), "verification_failed");
            return Err(LedgerError::VerificationFailed {
                reference_id: reference_id.to_string(),
                reason: format!("支付金额不足一积分: {}", verification.amount),
            });
        }

        // 4. 入账
        let command = LedgerCommand::new(account_id, credits, LedgerReason::Purchase)
            .with_reference(reference_id)
            .with_description(format!("Payment purchase (Ref: {reference_id})"));
        let receipt = self.ledger.apply(command).await?;

        metrics::record_redemption(kind.as_str(), outcome(receipt.replayed));
        info!(credits, new_balance = receipt.new_balance, "支付入账完成");

        Ok(RedemptionResult::from_receipt(kind, &receipt))
    }

    // ==================== 兑换码管理 ====================

    pub async fn create_gift_code(&self, gift_code: NewGiftCode) -> Result<GiftCode> {
        if gift_code.credits_amount <= 0 {
            return Err(LedgerError::Validation("兑换码积分必须为正数".to_string()));
        }
        if gift_code.max_claims <= 0 {
            return Err(LedgerError::Validation("兑换码领取次数必须为正数".to_string()));
        }
        if GiftCode::normalize(&gift_code.code).is_empty() {
            return Err(LedgerError::Validation("兑换码不能为空".to_string()));
        }
        self.gift_code_repo.create_gift_code(&gift_code).await
    }

    pub async fn set_gift_code_active(&self, code: &str, is_active: bool) -> Result<()> {
        let code = GiftCode::normalize(code);
        if !self.gift_code_repo.set_active(&code, is_active).await? {
            return Err(LedgerError::InvalidCode(code));
        }
        Ok(())
    }

    pub async fn list_gift_codes(&self) -> Result<Vec<GiftCode>> {
        self.gift_code_repo.list().await
    }

    // ==================== 私有方法 ====================

    async fn load_account(&self, account_id: Uuid) -> Result<Account> {
        self.account_repo
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }
}

/// 不可领取的原因：不存在或停用 -> InvalidCode，过期 -> Expired，其余为已领完
fn unclaimable_error(code: &str, gift_code: Option<&GiftCode>, now: DateTime<Utc>) -> LedgerError {
    match gift_code {
        None => LedgerError::InvalidCode(code.to_string()),
        Some(gift_code) if !gift_code.is_active => LedgerError::InvalidCode(code.to_string()),
        Some(gift_code) if gift_code.is_expired(now) => LedgerError::Expired(code.to_string()),
        Some(_) => LedgerError::Exhausted(code.to_string()),
    }
}

fn outcome(replayed: bool) -> &'static str {
    if replayed { "replayed" } else { "success" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockPaymentVerifier, PaymentVerification};
    use crate::models::NewAccount;
    use crate::repository::{InMemoryStore, LedgerRepositoryTrait};

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: RedemptionService,
    }

    fn fixture(verifier: MockPaymentVerifier) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(CreditLedger::new(
            store.clone(),
            std::time::Duration::from_secs(5),
        ));
        let service = RedemptionService::new(
            ledger,
            store.clone(),
            store.clone(),
            Arc::new(verifier),
            RedemptionPolicy::default(),
        )
        .with_retry_policy(RetryPolicy {
            max_retries: 1,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
        });
        Fixture { store, service }
    }

    async fn account(store: &InMemoryStore, username: &str, referral_code: &str) -> Account {
        store
            .create_account(
                &NewAccount {
                    id: Uuid::new_v4(),
                    username: username.to_string(),
                    referral_code: referral_code.to_string(),
                    referred_by: None,
                },
                100,
            )
            .await
            .unwrap()
    }

    fn gift_code(code: &str, max_claims: i32, expiry_date: DateTime<Utc>) -> NewGiftCode {
        NewGiftCode {
            code: code.to_string(),
            credits_amount: 100,
            max_claims,
            expiry_date,
        }
    }

    #[test]
    fn test_credits_for_amount() {
        let policy = RedemptionPolicy::default();
        assert_eq!(policy.credits_for_amount(250_000), 2500);
        assert_eq!(policy.credits_for_amount(199), 1);
        assert_eq!(policy.credits_for_amount(99), 0);
        assert_eq!(policy.credits_for_amount(-100), 0);

        let pricey = RedemptionPolicy {
            credit_price: 3.0,
            ..RedemptionPolicy::default()
        };
        assert_eq!(pricey.credits_for_amount(1000), 3);
    }

    #[test]
    fn test_daily_bonus_reference_uses_calendar_day() {
        let account_id = Uuid::nil();
        let at = DateTime::parse_from_rfc3339("2025-03-04T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            daily_bonus_reference(account_id, at),
            format!("{}:2025-03-04", account_id)
        );
    }

    #[tokio::test]
    async fn test_claim_gift_code_credits_once_per_account() {
        let f = fixture(MockPaymentVerifier::new());
        let alice = account(&f.store, "alice", "ALICE00001").await;
        f.service
            .create_gift_code(gift_code("welcome100", 5, Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let result = f.service.claim_gift_code("Welcome100", alice.id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.credits_added, 100);
        assert_eq!(result.new_balance, 200);

        let err = f.service.claim_gift_code("WELCOME100", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyClaimed(_)));

        let code = f.store.get_by_code("WELCOME100").await.unwrap().unwrap();
        assert_eq!(code.claimed_count, 1);
    }

    #[tokio::test]
    async fn test_claim_gift_code_failure_classification() {
        let f = fixture(MockPaymentVerifier::new());
        let alice = account(&f.store, "alice", "ALICE00001").await;
        let bob = account(&f.store, "bob", "BOB0000001").await;

        let err = f.service.claim_gift_code("NOPE", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCode(_)));

        f.service
            .create_gift_code(gift_code("OLD", 5, Utc::now() - Duration::days(1)))
            .await
            .unwrap();
        let err = f.service.claim_gift_code("OLD", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Expired(_)));

        f.service
            .create_gift_code(gift_code("ONCE", 1, Utc::now() + Duration::days(1)))
            .await
            .unwrap();
        f.service.claim_gift_code("ONCE", alice.id).await.unwrap();
        let err = f.service.claim_gift_code("ONCE", bob.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Exhausted(_)));

        f.service.set_gift_code_active("once", false).await.unwrap();
        let err = f.service.claim_gift_code("ONCE", bob.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn test_claim_gift_code_unknown_account_leaves_count_untouched() {
        let f = fixture(MockPaymentVerifier::new());
        f.service
            .create_gift_code(gift_code("GHOST", 1, Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let err = f
            .service
            .claim_gift_code("GHOST", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let code = f.store.get_by_code("GHOST").await.unwrap().unwrap();
        assert_eq!(code.claimed_count, 0);
    }

    /// 在真实领取前后各停顿一段时间的兑换码仓储
    struct SlowGiftCodes {
        inner: Arc<InMemoryStore>,
        before: std::time::Duration,
        after: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl GiftCodeRepositoryTrait for SlowGiftCodes {
        async fn create_gift_code(&self, gift_code: &NewGiftCode) -> Result<GiftCode> {
            self.inner.create_gift_code(gift_code).await
        }

        async fn get_by_code(&self, code: &str) -> Result<Option<GiftCode>> {
            self.inner.get_by_code(code).await
        }

        async fn list(&self) -> Result<Vec<GiftCode>> {
            self.inner.list().await
        }

        async fn set_active(&self, code: &str, is_active: bool) -> Result<bool> {
            self.inner.set_active(code, is_active).await
        }

        async fn claim(
            &self,
            code: &str,
            account_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<GiftCodeClaim> {
            tokio::time::sleep(self.before).await;
            let claim = self.inner.claim(code, account_id, now).await;
            tokio::time::sleep(self.after).await;
            claim
        }
    }

    fn slow_service(
        store: &Arc<InMemoryStore>,
        before_ms: u64,
        after_ms: u64,
        timeout_ms: u64,
    ) -> RedemptionService {
        let ledger = Arc::new(CreditLedger::new(
            store.clone(),
            std::time::Duration::from_millis(timeout_ms),
        ));
        RedemptionService::new(
            ledger,
            store.clone(),
            Arc::new(SlowGiftCodes {
                inner: store.clone(),
                before: std::time::Duration::from_millis(before_ms),
                after: std::time::Duration::from_millis(after_ms),
            }),
            Arc::new(MockPaymentVerifier::new()),
            RedemptionPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_claim_timeout_after_commit_keeps_count_consistent() {
        let store = Arc::new(InMemoryStore::new());
        let service = slow_service(&store, 0, 200, 50);
        let alice = account(&store, "alice", "ALICE00001").await;
        let bob = account(&store, "bob", "BOB0000001").await;
        service
            .create_gift_code(gift_code("SOLO", 1, Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let err = service.claim_gift_code("SOLO", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));

        // 领取已提交：计数与流水一致，名额不再释放
        let code = store.get_by_code("SOLO").await.unwrap().unwrap();
        assert_eq!(code.claimed_count, 1);

        let err = service.claim_gift_code("SOLO", bob.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Exhausted(_)));

        let fast = slow_service(&store, 0, 0, 5_000);
        let err = fast.claim_gift_code("SOLO", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyClaimed(_)));

        let alice = store.get_account(alice.id).await.unwrap().unwrap();
        let bob = store.get_account(bob.id).await.unwrap().unwrap();
        assert_eq!(alice.balance, 200);
        assert_eq!(bob.balance, 100);
    }

    #[tokio::test]
    async fn test_duplicate_submit_does_not_block_other_account() {
        let store = Arc::new(InMemoryStore::new());
        let service = slow_service(&store, 30, 0, 5_000);
        let alice = account(&store, "alice", "ALICE00001").await;
        let bob = account(&store, "bob", "BOB0000001").await;
        service
            .create_gift_code(gift_code("PAIR", 2, Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        let (first, second, other) = tokio::join!(
            service.claim_gift_code("PAIR", alice.id),
            service.claim_gift_code("PAIR", alice.id),
            service.claim_gift_code("PAIR", bob.id),
        );

        let alice_results = [first, second];
        assert_eq!(alice_results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            alice_results
                .iter()
                .any(|r| matches!(r, Err(LedgerError::AlreadyClaimed(_))))
        );
        assert_eq!(other.unwrap().credits_added, 100);

        let code = store.get_by_code("PAIR").await.unwrap().unwrap();
        assert_eq!(code.claimed_count, 2);
    }

    #[tokio::test]
    async fn test_award_referral_is_idempotent_per_new_account() {
        let f = fixture(MockPaymentVerifier::new());
        let referrer = account(&f.store, "alice", "ALICE00001").await;
        let newcomer = Uuid::new_v4();

        let first = f
            .service
            .award_referral("ALICE00001", newcomer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.credits_added, 50);
        assert_eq!(first.new_balance, 150);
        assert!(!first.replayed);

        let second = f
            .service
            .award_referral("ALICE00001", newcomer)
            .await
            .unwrap()
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.new_balance, 150);

        let referrer = f.store.get_account(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.balance, 150);
        assert_eq!(referrer.successful_referrals, 1);
    }

    #[tokio::test]
    async fn test_award_referral_ignores_unknown_code() {
        let f = fixture(MockPaymentVerifier::new());
        let result = f
            .service
            .award_referral("UNKNOWN000", Uuid::new_v4())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_daily_bonus_once_per_interval() {
        let f = fixture(MockPaymentVerifier::new());
        let alice = account(&f.store, "alice", "ALICE00001").await;

        let first = f.service.claim_daily_bonus(alice.id).await.unwrap();
        assert!(first.success);
        assert_eq!(first.credits_added, 50);
        assert_eq!(first.new_balance, 150);

        let second = f.service.claim_daily_bonus(alice.id).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.credits_added, 0);
        assert_eq!(second.new_balance, 150);
    }

    #[tokio::test]
    async fn test_daily_bonus_unknown_account() {
        let f = fixture(MockPaymentVerifier::new());
        let err = f.service.claim_daily_bonus(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_verify_payment_credits_once_and_replays_without_provider_call() {
        let mut verifier = MockPaymentVerifier::new();
        verifier
            .expect_verify()
            .withf(|reference| reference == "T123")
            .times(1)
            .returning(|_| {
                Ok(PaymentVerification {
                    status: "success".to_string(),
                    amount: 30_000,
                })
            });
        let f = fixture(verifier);
        let alice = account(&f.store, "alice", "ALICE00001").await;

        let first = f.service.verify_payment("T123", alice.id).await.unwrap();
        assert!(first.success);
        assert_eq!(first.credits_added, 300);
        assert_eq!(first.new_balance, 400);

        let second = f.service.verify_payment("T123", alice.id).await.unwrap();
        assert!(second.success);
        assert!(second.replayed);
        assert_eq!(second.credits_added, 300);
        assert_eq!(second.new_balance, 400);

        let entries = f.store.list_entries(alice.id, 10).await.unwrap();
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.reason == LedgerReason::Purchase)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_verify_payment_rejects_other_account_reuse() {
        let mut verifier = MockPaymentVerifier::new();
        verifier.expect_verify().times(1).returning(|_| {
            Ok(PaymentVerification {
                status: "success".to_string(),
                amount: 10_000,
            })
        });
        let f = fixture(verifier);
        let alice = account(&f.store, "alice", "ALICE00001").await;
        let bob = account(&f.store, "bob", "BOB0000001").await;

        f.service.verify_payment("T9", alice.id).await.unwrap();
        let err = f.service.verify_payment("T9", bob.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference { .. }));
    }

    #[tokio::test]
    async fn test_verify_payment_non_success_status() {
        let mut verifier = MockPaymentVerifier::new();
        verifier.expect_verify().returning(|_| {
            Ok(PaymentVerification {
                status: "abandoned".to_string(),
                amount: 10_000,
            })
        });
        let f = fixture(verifier);
        let alice = account(&f.store, "alice", "ALICE00001").await;

        let err = f.service.verify_payment("T1", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::VerificationFailed { .. }));
        assert_eq!(f.store.get_account(alice.id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_verify_payment_retries_once_then_surfaces() {
        let mut verifier = MockPaymentVerifier::new();
        verifier
            .expect_verify()
            .times(2)
            .returning(|_| Err(LedgerError::external("payment", "503 Service Unavailable")));
        let f = fixture(verifier);
        let alice = account(&f.store, "alice", "ALICE00001").await;

        let err = f.service.verify_payment("T2", alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::ExternalUnavailable { .. }));
        assert_eq!(f.store.get_account(alice.id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_create_gift_code_validation() {
        let f = fixture(MockPaymentVerifier::new());
        let mut bad = gift_code("BAD", 1, Utc::now());
        bad.credits_amount = 0;
        assert!(matches!(
            f.service.create_gift_code(bad).await.unwrap_err(),
            LedgerError::Validation(_)
        ));

        let err = f.service.set_gift_code_active("MISSING", false).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCode(_)));
    }
}

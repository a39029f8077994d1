//! 账户生命周期钩子
//!
//! 注册时开户并发放推荐奖励，登录时发放每日奖励。
//! 身份认证由外部会话层完成，这里只接收已认证的账户 ID。

use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{Account, NewAccount};
use crate::repository::AccountRepositoryTrait;
use crate::service::dto::RedemptionResult;
use crate::service::redemption_service::RedemptionService;

const REFERRAL_CODE_LEN: usize = 10;

/// 注册结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResult {
    pub account: Account,
    /// 推荐码有效时为推荐人奖励结果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral: Option<RedemptionResult>,
}

/// 生成推荐码
pub fn generate_referral_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(char::from)
        .collect()
}

/// 账户服务
pub struct AccountService {
    account_repo: Arc<dyn AccountRepositoryTrait>,
    redemptions: Arc<RedemptionService>,
    starting_balance: i64,
}

impl AccountService {
    pub fn new(
        account_repo: Arc<dyn AccountRepositoryTrait>,
        redemptions: Arc<RedemptionService>,
        starting_balance: i64,
    ) -> Self {
        Self {
            account_repo,
            redemptions,
            starting_balance,
        }
    }

    /// 注册
    ///
    /// 开户（含开户流水）后尝试发放推荐奖励；推荐奖励失败不影响注册结果
    #[instrument(skip(self))]
    pub async fn sign_up(
        &self,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<SignUpResult> {
        let username = username.trim();
        if username.is_empty() {
            return Err(LedgerError::Validation("用户名不能为空".to_string()));
        }
        let referral_code = referral_code
            .map(str::trim)
            .filter(|code| !code.is_empty());

        let new_account = NewAccount {
            id: Uuid::now_v7(),
            username: username.to_string(),
            referral_code: generate_referral_code(),
            referred_by: referral_code.map(str::to_string),
        };
        let account = self
            .account_repo
            .create_account(&new_account, self.starting_balance)
            .await?;

        let referral = match referral_code {
            Some(code) => match self.redemptions.award_referral(code, account.id).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(referral_code = %code, error = %e, "推荐奖励发放失败");
                    None
                }
            },
            None => None,
        };

        info!(account_id = %account.id, balance = account.balance, "账户已创建");
        Ok(SignUpResult { account, referral })
    }

    /// 登录钩子：发放每日奖励
    pub async fn on_login(&self, account_id: Uuid) -> Result<RedemptionResult> {
        self.redemptions.claim_daily_bonus(account_id).await
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account> {
        self.account_repo
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockPaymentVerifier;
    use crate::repository::{InMemoryStore, LedgerRepositoryTrait};
    use crate::service::credit_ledger::CreditLedger;
    use crate::service::redemption_service::RedemptionPolicy;

    fn service(store: Arc<InMemoryStore>) -> AccountService {
        let ledger = Arc::new(CreditLedger::new(
            store.clone(),
            std::time::Duration::from_secs(5),
        ));
        let redemptions = Arc::new(RedemptionService::new(
            ledger,
            store.clone(),
            store.clone(),
            Arc::new(MockPaymentVerifier::new()),
            RedemptionPolicy::default(),
        ));
        AccountService::new(store, redemptions, 100)
    }

    #[test]
    fn test_generate_referral_code() {
        let code = generate_referral_code();
        assert_eq!(code.len(), 10);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_sign_up_with_referral() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());

        let alice = service.sign_up("alice", None).await.unwrap();
        assert_eq!(alice.account.balance, 100);
        assert!(alice.referral.is_none());

        let bob = service
            .sign_up("bob", Some(alice.account.referral_code.as_str()))
            .await
            .unwrap();
        assert_eq!(bob.account.balance, 100);
        assert_eq!(
            bob.account.referred_by.as_deref(),
            Some(alice.account.referral_code.as_str())
        );
        let referral = bob.referral.unwrap();
        assert_eq!(referral.credits_added, 50);

        let alice_now = service.get_account(alice.account.id).await.unwrap();
        assert_eq!(alice_now.balance, 150);
        assert_eq!(alice_now.successful_referrals, 1);

        let entries = store.list_entries(alice.account.id, 10).await.unwrap();
        let sum: i64 = entries.iter().map(|e| e.delta).sum();
        assert_eq!(sum, alice_now.balance);
    }

    #[tokio::test]
    async fn test_sign_up_unknown_referral_code_still_succeeds() {
        let service = service(Arc::new(InMemoryStore::new()));

        let result = service.sign_up("carol", Some("NOSUCHCODE")).await.unwrap();
        assert_eq!(result.account.balance, 100);
        assert!(result.referral.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_duplicate_username() {
        let service = service(Arc::new(InMemoryStore::new()));
        service.sign_up("dave", None).await.unwrap();

        let err = service.sign_up("dave", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_on_login_awards_daily_bonus_once() {
        let service = service(Arc::new(InMemoryStore::new()));
        let erin = service.sign_up("erin", None).await.unwrap();

        let first = service.on_login(erin.account.id).await.unwrap();
        assert!(first.success);
        assert_eq!(first.new_balance, 150);

        let second = service.on_login(erin.account.id).await.unwrap();
        assert!(!second.success);
        assert_eq!(service.get_account(erin.account.id).await.unwrap().balance, 150);
    }
}

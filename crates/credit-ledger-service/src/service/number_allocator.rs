//! 号码分配服务
//!
//! 从国家号码池随机选取号码并扣费。号码不独占（允许重复租用），
//! 但扣费必然伴随返回一个号码：先选号、后扣费，扣费失败则不返回号码。
//! 已用计数与租用历史不在资金路径上，写入失败只记录告警。

use std::sync::Arc;

use chrono::Utc;
use rand::seq::IndexedRandom;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use otp_shared::observability::metrics;

use crate::error::{LedgerError, Result};
use crate::models::{Country, LedgerCommand, LedgerReason, NewCountry, PhoneLease};
use crate::repository::{AccountRepositoryTrait, CountryRepositoryTrait};
use crate::service::credit_ledger::CreditLedger;
use crate::service::dto::NumberLeaseResult;

/// 号码分配服务
pub struct NumberAllocator {
    ledger: Arc<CreditLedger>,
    account_repo: Arc<dyn AccountRepositoryTrait>,
    country_repo: Arc<dyn CountryRepositoryTrait>,
    lease_cost: i64,
}

impl NumberAllocator {
    pub fn new(
        ledger: Arc<CreditLedger>,
        account_repo: Arc<dyn AccountRepositoryTrait>,
        country_repo: Arc<dyn CountryRepositoryTrait>,
        lease_cost: i64,
    ) -> Self {
        Self {
            ledger,
            account_repo,
            country_repo,
            lease_cost,
        }
    }

    /// 租用一个号码
    ///
    /// 1. 加载国家与号码池
    /// 2. 余额预检（最终以账本扣费结果为准）
    /// 3. 随机选号
    /// 4. 扣费，幂等键为本次租用 ID
    /// 5. 尽力更新已用计数与租用历史
    #[instrument(skip(self), fields(account_id = %account_id, country_id = %country_id))]
    pub async fn lease(&self, account_id: Uuid, country_id: Uuid) -> Result<NumberLeaseResult> {
        // 1. 国家与号码池
        let country = self
            .country_repo
            .get_country(country_id)
            .await?
            .ok_or(LedgerError::CountryNotFound(country_id))?;

        // 2. 余额预检，避免无谓选号
        let account = self
            .account_repo
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        if account.balance < self.lease_cost {
            metrics::record_number_lease("insufficient_balance");
            return Err(LedgerError::InsufficientBalance {
                required: self.lease_cost,
                available: account.balance,
            });
        }

        // 3. 选号
        let phone_number = Self::pick_number(&country)?;

        // 4. 扣费
        let lease_id = Uuid::now_v7();
        let command = LedgerCommand::new(account_id, -self.lease_cost, LedgerReason::NumberLease)
            .with_reference(lease_id.to_string())
            .with_description(format!("Number lease {} ({})", phone_number, country.name));
        let receipt = self
            .ledger
            .apply(command)
            .await
            .inspect_err(|e| metrics::record_number_lease(e.error_code()))?;

        // 5. 非关键路径
        let lease = PhoneLease {
            id: lease_id,
            account_id,
            country_id,
            phone_number: phone_number.clone(),
            leased_at: Utc::now(),
        };
        self.record_usage(&lease).await;

        metrics::record_number_lease("success");
        info!(
            phone_number = %phone_number,
            new_balance = receipt.new_balance,
            "号码租用成功"
        );

        Ok(NumberLeaseResult {
            lease_id,
            phone_number,
            country_id,
            country_name: country.name,
            credits_spent: self.lease_cost,
            new_balance: receipt.new_balance,
        })
    }

    /// 账户租用历史（新在前）
    pub async fn history(&self, account_id: Uuid, limit: i64) -> Result<Vec<PhoneLease>> {
        self.country_repo
            .list_leases(account_id, limit.clamp(1, 500))
            .await
    }

    /// 上架国家号码池
    pub async fn add_country(&self, country: NewCountry) -> Result<Country> {
        if country.name.trim().is_empty() || country.code.trim().is_empty() {
            return Err(LedgerError::Validation("国家名称与代码不能为空".to_string()));
        }
        self.country_repo.create_country(&country).await
    }

    pub fn lease_cost(&self) -> i64 {
        self.lease_cost
    }

    // ==================== 私有方法 ====================

    fn pick_number(country: &Country) -> Result<String> {
        let numbers = country.numbers();
        numbers
            .choose(&mut rand::rng())
            .map(|number| number.to_string())
            .ok_or(LedgerError::PoolEmpty(country.id))
    }

    async fn record_usage(&self, lease: &PhoneLease) {
        if let Err(e) = self
            .country_repo
            .increment_used_numbers(lease.country_id)
            .await
        {
            warn!(country_id = %lease.country_id, error = %e, "已用号码计数更新失败");
        }
        if let Err(e) = self.country_repo.record_lease(lease).await {
            warn!(lease_id = %lease.id, error = %e, "租用历史写入失败");
        }
    }
}

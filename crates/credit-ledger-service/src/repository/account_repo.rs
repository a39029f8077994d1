//! 账户仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::AccountRepositoryTrait;
use crate::error::Result;
use crate::models::{Account, LedgerReason, NewAccount};

const ACCOUNT_COLUMNS: &str = "id, username, balance, version, referral_code, referred_by, successful_referrals, last_login_at, created_at, updated_at";

/// 账户仓储
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建账户
    ///
    /// 初始余额与开户流水在同一事务内写入，保证余额等于流水之和
    pub async fn create_account(
        &self,
        account: &NewAccount,
        opening_balance: i64,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;

        let version: i64 = if opening_balance > 0 { 1 } else { 0 };
        let created = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (id, username, balance, version, referral_code, referred_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(&account.username)
        .bind(opening_balance)
        .bind(version)
        .bind(&account.referral_code)
        .bind(&account.referred_by)
        .fetch_one(&mut *tx)
        .await?;

        if opening_balance > 0 {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (account_id, delta, reason, reference_id, status, description, balance_after)
                VALUES ($1, $2, $3, $4, 'completed', '开户赠送积分', $2)
                "#,
            )
            .bind(account.id)
            .bind(opening_balance)
            .bind(LedgerReason::Opening)
            .bind(account.id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn find_by_referral_code(&self, referral_code: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE referral_code = $1"
        ))
        .bind(referral_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// 推荐成功计数（不涉及余额）
    pub async fn increment_successful_referrals(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET successful_referrals = successful_referrals + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_login_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountRepositoryTrait for AccountRepository {
    async fn create_account(&self, account: &NewAccount, opening_balance: i64) -> Result<Account> {
        self.create_account(account, opening_balance).await
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        self.get_account(id).await
    }

    async fn find_by_referral_code(&self, referral_code: &str) -> Result<Option<Account>> {
        self.find_by_referral_code(referral_code).await
    }

    async fn increment_successful_referrals(&self, id: Uuid) -> Result<()> {
        self.increment_successful_referrals(id).await
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update_last_login(id, at).await
    }
}

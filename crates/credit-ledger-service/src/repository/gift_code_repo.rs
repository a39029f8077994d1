//! 兑换码仓储
//!
//! 领取在单个事务内完成：`FOR UPDATE` 锁定兑换码行后检查同账户流水，
//! 再经账本写入流水并自增 `claimed_count`。加锁顺序固定为兑换码行 -> 账户行。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ledger_repo::LedgerRepository;
use super::traits::GiftCodeRepositoryTrait;
use crate::error::Result;
use crate::models::{GiftCode, GiftCodeClaim, LedgerReason, NewGiftCode};

const GIFT_CODE_COLUMNS: &str =
    "id, code, credits_amount, max_claims, claimed_count, expiry_date, is_active, created_at";

/// 兑换码仓储
pub struct GiftCodeRepository {
    pool: PgPool,
}

impl GiftCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建兑换码（code 以大写存储）
    pub async fn create(&self, gift_code: &NewGiftCode) -> Result<GiftCode> {
        let created = sqlx::query_as::<_, GiftCode>(&format!(
            r#"
            INSERT INTO gift_codes (id, code, credits_amount, max_claims, expiry_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {GIFT_CODE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(GiftCode::normalize(&gift_code.code))
        .bind(gift_code.credits_amount)
        .bind(gift_code.max_claims)
        .bind(gift_code.expiry_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<GiftCode>> {
        let gift_code = sqlx::query_as::<_, GiftCode>(&format!(
            "SELECT {GIFT_CODE_COLUMNS} FROM gift_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gift_code)
    }

    pub async fn list(&self) -> Result<Vec<GiftCode>> {
        let gift_codes = sqlx::query_as::<_, GiftCode>(&format!(
            "SELECT {GIFT_CODE_COLUMNS} FROM gift_codes ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(gift_codes)
    }

    pub async fn set_active(&self, code: &str, is_active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE gift_codes SET is_active = $2 WHERE code = $1")
            .bind(code)
            .bind(is_active)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 原子领取
    pub async fn claim(
        &self,
        code: &str,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GiftCodeClaim> {
        let mut tx = self.pool.begin().await?;

        // 1. 锁定兑换码行，同码领取在此串行
        let locked = sqlx::query_as::<_, GiftCode>(&format!(
            "SELECT {GIFT_CODE_COLUMNS} FROM gift_codes WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(gift_code) = locked else {
            return Ok(GiftCodeClaim::Unclaimable(None));
        };

        // 2. 同账户已领取
        let reference_id = GiftCode::claim_reference(code, account_id);
        if LedgerRepository::find_entry_in_tx(&mut tx, LedgerReason::GiftCode, &reference_id)
            .await?
            .is_some()
        {
            return Ok(GiftCodeClaim::AlreadyClaimed);
        }

        // 3. 可领取校验
        if !gift_code.is_claimable(now) {
            return Ok(GiftCodeClaim::Unclaimable(Some(gift_code)));
        }

        // 4. 入账
        let receipt =
            LedgerRepository::apply_in_tx(&mut tx, &gift_code.claim_command(account_id)).await?;
        if receipt.replayed {
            return Ok(GiftCodeClaim::AlreadyClaimed);
        }

        // 5. 自增领取次数，CHECK 约束兜底
        let claimed = sqlx::query_as::<_, GiftCode>(&format!(
            r#"
            UPDATE gift_codes
            SET claimed_count = claimed_count + 1
            WHERE id = $1
            RETURNING {GIFT_CODE_COLUMNS}
            "#
        ))
        .bind(gift_code.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(GiftCodeClaim::Credited {
            receipt,
            gift_code: claimed,
        })
    }
}

#[async_trait]
impl GiftCodeRepositoryTrait for GiftCodeRepository {
    async fn create_gift_code(&self, gift_code: &NewGiftCode) -> Result<GiftCode> {
        self.create(gift_code).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<GiftCode>> {
        self.get_by_code(code).await
    }

    async fn list(&self) -> Result<Vec<GiftCode>> {
        self.list().await
    }

    async fn set_active(&self, code: &str, is_active: bool) -> Result<bool> {
        self.set_active(code, is_active).await
    }

    async fn claim(
        &self,
        code: &str,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GiftCodeClaim> {
        self.claim(code, account_id, now).await
    }
}

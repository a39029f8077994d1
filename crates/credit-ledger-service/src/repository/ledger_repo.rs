//! 积分账本仓储
//!
//! 余额变动在单个事务内完成：`SELECT ... FOR UPDATE` 锁定账户行，
//! 检查幂等键，写入流水并更新余额投影，提交后流水与余额同时可见。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::traits::LedgerRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{LedgerCommand, LedgerEntry, LedgerReason, LedgerReceipt, WalletStats};

const ENTRY_COLUMNS: &str = "id, account_id, delta, reason, reference_id, status, description, balance_after, created_at";

/// 积分账本仓储
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 原子地应用一次余额变动
    pub async fn apply(&self, command: &LedgerCommand) -> Result<LedgerReceipt> {
        let mut tx = self.pool.begin().await?;
        let receipt = Self::apply_in_tx(&mut tx, command).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    /// 在事务中应用一次余额变动
    ///
    /// 账户行锁持有到事务结束，同账户的并发调用在此串行化。
    pub async fn apply_in_tx(
        tx: &mut PgConnection,
        command: &LedgerCommand,
    ) -> Result<LedgerReceipt> {
        // 1. 锁定账户行
        let row = sqlx::query("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(command.account_id)
            .fetch_optional(&mut *tx)
            .await?;

        let balance: i64 = match row {
            Some(row) => row.get("balance"),
            None => return Err(LedgerError::AccountNotFound(command.account_id)),
        };

        // 2. 幂等检查
        if let Some(reference_id) = &command.reference_id {
            if let Some(existing) =
                Self::find_entry_in_tx(&mut *tx, command.reason, reference_id).await?
            {
                return resolve_replay(command, &existing);
            }
        }

        // 3. 余额校验
        let new_balance = checked_balance(balance, command)?;
        if new_balance < 0 {
            return Err(LedgerError::InsufficientBalance {
                required: -command.delta,
                available: balance,
            });
        }

        // 4. 写入流水；其他账户的并发事务抢先使用同一幂等键时插入不生效
        let inserted = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO ledger_entries (account_id, delta, reason, reference_id, status, description, balance_after)
            VALUES ($1, $2, $3, $4, 'completed', $5, $6)
            ON CONFLICT ON CONSTRAINT uq_ledger_entries_reason_reference DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(command.account_id)
        .bind(command.delta)
        .bind(command.reason)
        .bind(&command.reference_id)
        .bind(&command.description)
        .bind(new_balance)
        .fetch_optional(&mut *tx)
        .await?;

        let entry = match inserted {
            Some(entry) => entry,
            None => {
                let reference_id = command.reference_id.as_deref().unwrap_or_default();
                let existing = Self::find_entry_in_tx(&mut *tx, command.reason, reference_id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Internal(format!(
                            "幂等键冲突但未找到已有流水: {}",
                            reference_id
                        ))
                    })?;
                return resolve_replay(command, &existing);
            }
        };

        // 5. 更新余额投影
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(command.account_id)
        .bind(new_balance)
        .execute(&mut *tx)
        .await?;

        debug!(
            account_id = %command.account_id,
            entry_id = entry.id,
            delta = command.delta,
            balance_after = new_balance,
            "账本流水已写入"
        );

        Ok(LedgerReceipt::applied(&entry))
    }

    /// 按幂等键查询流水
    pub async fn find_entry(
        &self,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_entry_in_tx(&mut conn, reason, reference_id).await
    }

    /// 在事务中按幂等键查询流水
    pub async fn find_entry_in_tx(
        tx: &mut PgConnection,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reason = $1 AND reference_id = $2"
        ))
        .bind(reason)
        .bind(reference_id)
        .fetch_optional(&mut *tx)
        .await?;

        Ok(entry)
    }

    /// 列出账户流水
    ///
    /// 按提交顺序倒序，返回最近的 limit 条
    pub async fn list_entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// 钱包统计
    pub async fn wallet_stats(&self) -> Result<WalletStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_entries,
                COALESCE(SUM(delta) FILTER (WHERE reason = 'purchase' AND status = 'completed'), 0)::BIGINT AS total_purchased
            FROM ledger_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(WalletStats {
            total_entries: row.get("total_entries"),
            total_purchased: row.get("total_purchased"),
        })
    }
}

/// 计算变动后的余额，溢出视为非法参数
pub(crate) fn checked_balance(balance: i64, command: &LedgerCommand) -> Result<i64> {
    balance.checked_add(command.delta).ok_or_else(|| {
        LedgerError::Validation(format!(
            "余额变动溢出: balance={balance} delta={}",
            command.delta
        ))
    })
}

/// 幂等键已存在：同账户视为重放，跨账户视为冲突
pub(crate) fn resolve_replay(command: &LedgerCommand, existing: &LedgerEntry) -> Result<LedgerReceipt> {
    if existing.account_id == command.account_id {
        Ok(LedgerReceipt::replay(existing))
    } else {
        Err(LedgerError::DuplicateReference {
            reason: command.reason.to_string(),
            reference_id: command.reference_id.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn apply(&self, command: &LedgerCommand) -> Result<LedgerReceipt> {
        self.apply(command).await
    }

    async fn find_entry(
        &self,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        self.find_entry(reason, reference_id).await
    }

    async fn list_entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>> {
        self.list_entries(account_id, limit).await
    }

    async fn wallet_stats(&self) -> Result<WalletStats> {
        self.wallet_stats().await
    }
}

//! 积分账本服务
//!
//! 所有余额变动的唯一入口。同账户操作串行化、流水与余额原子提交、
//! 幂等键重放等保证由仓储层实现，这里负责参数校验、请求级超时与指标。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};
use uuid::Uuid;

use otp_shared::observability::metrics;

use crate::error::{LedgerError, Result};
use crate::models::{LedgerCommand, LedgerEntry, LedgerReason, LedgerReceipt, WalletStats};
use crate::repository::LedgerRepositoryTrait;

/// 积分账本
pub struct CreditLedger {
    ledger_repo: Arc<dyn LedgerRepositoryTrait>,
    operation_timeout: Duration,
}

impl CreditLedger {
    pub fn new(ledger_repo: Arc<dyn LedgerRepositoryTrait>, operation_timeout: Duration) -> Self {
        Self {
            ledger_repo,
            operation_timeout,
        }
    }

    /// 应用一次余额变动
    ///
    /// 命中已有 (reason, reference_id) 时返回原结果，`replayed` 为 true
    #[instrument(
        skip(self, command),
        fields(
            account_id = %command.account_id,
            delta = command.delta,
            reason = %command.reason,
            reference_id = ?command.reference_id
        )
    )]
    pub async fn apply(&self, command: LedgerCommand) -> Result<LedgerReceipt> {
        if command.delta == 0 {
            return Err(LedgerError::Validation("delta 不能为 0".to_string()));
        }

        let started = Instant::now();
        let receipt = self
            .with_timeout("ledger.apply", self.ledger_repo.apply(&command))
            .await?;

        if receipt.replayed {
            metrics::record_ledger_replay(command.reason.as_str());
            debug!(entry_id = receipt.entry_id, "幂等重放，返回已有流水");
        } else {
            metrics::record_ledger_entry(command.reason.as_str(), started.elapsed().as_secs_f64());
            info!(
                entry_id = receipt.entry_id,
                new_balance = receipt.new_balance,
                "余额变动已提交"
            );
        }

        Ok(receipt)
    }

    /// 扣减积分
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        reference_id: Option<String>,
    ) -> Result<LedgerReceipt> {
        Self::ensure_positive(amount)?;
        self.apply(Self::command(account_id, -amount, reason, reference_id))
            .await
    }

    /// 增加积分
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        reference_id: Option<String>,
    ) -> Result<LedgerReceipt> {
        Self::ensure_positive(amount)?;
        self.apply(Self::command(account_id, amount, reason, reference_id))
            .await
    }

    /// 运营手工调账，delta 可正可负
    pub async fn admin_adjust(
        &self,
        account_id: Uuid,
        delta: i64,
        description: &str,
        reference_id: Option<String>,
    ) -> Result<LedgerReceipt> {
        let command =
            Self::command(account_id, delta, LedgerReason::Admin, reference_id).with_description(description);
        self.apply(command).await
    }

    /// 按 (reason, reference_id) 查询已入账流水
    pub async fn find_entry(
        &self,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        self.with_timeout("ledger.find_entry", self.ledger_repo.find_entry(reason, reference_id))
            .await
    }

    /// 账户流水（新在前）
    #[instrument(skip(self))]
    pub async fn history(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>> {
        let limit = limit.clamp(1, 500);
        self.with_timeout("ledger.history", self.ledger_repo.list_entries(account_id, limit))
            .await
    }

    pub async fn wallet_stats(&self) -> Result<WalletStats> {
        self.with_timeout("ledger.wallet_stats", self.ledger_repo.wallet_stats())
            .await
    }

    // ==================== 私有方法 ====================

    fn command(
        account_id: Uuid,
        delta: i64,
        reason: LedgerReason,
        reference_id: Option<String>,
    ) -> LedgerCommand {
        let command = LedgerCommand::new(account_id, delta, reason);
        match reference_id {
            Some(reference_id) => command.with_reference(reference_id),
            None => command,
        }
    }

    fn ensure_positive(amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "积分数量必须为正数: {amount}"
            )));
        }
        Ok(())
    }

    /// 请求级超时；超时后丢弃 future，未提交的事务随连接回滚
    pub(crate) async fn with_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout(operation.to_string()))?
    }
}

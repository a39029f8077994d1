//! 边界限流
//!
//! 固定窗口计数，按 (操作, 账户) 分桶。限流在调用方边界执行，
//! 核心服务本身不感知限流状态。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use otp_shared::cache::{Cache, CacheKey};
use otp_shared::config::RateLimitConfig;
use otp_shared::observability::metrics;

use crate::error::{LedgerError, Result};

/// 受限流保护的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitedOperation {
    NumberLease,
    SmsCheck,
}

impl LimitedOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NumberLease => "number_lease",
            Self::SmsCheck => "sms_check",
        }
    }
}

/// 限流规则
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    pub number_lease_limit: u32,
    pub sms_check_limit: u32,
    pub window: Duration,
}

impl RateLimitRules {
    pub fn limit_for(&self, operation: LimitedOperation) -> u32 {
        match operation {
            LimitedOperation::NumberLease => self.number_lease_limit,
            LimitedOperation::SmsCheck => self.sms_check_limit,
        }
    }

    /// 当前时间所在的窗口序号
    fn window_index(&self) -> i64 {
        let secs = self.window.as_secs().max(1) as i64;
        Utc::now().timestamp() / secs
    }
}

impl From<&RateLimitConfig> for RateLimitRules {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            number_lease_limit: config.number_lease_per_minute,
            sms_check_limit: config.sms_check_per_minute,
            window: Duration::from_secs(config.window_seconds),
        }
    }
}

/// 限流器接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 计入一次请求，超出窗口配额时返回 `RateLimited`
    async fn check(&self, operation: LimitedOperation, account_id: Uuid) -> Result<()>;
}

fn rejected(operation: LimitedOperation) -> LedgerError {
    metrics::record_rate_limited(operation.as_str());
    LedgerError::RateLimited {
        operation: operation.as_str().to_string(),
    }
}

/// 基于 Redis INCR + EXPIRE 的限流器
///
/// Redis 不可用时放行请求并记录告警
pub struct RedisRateLimiter {
    cache: Arc<Cache>,
    rules: RateLimitRules,
}

impl RedisRateLimiter {
    pub fn new(cache: Arc<Cache>, rules: RateLimitRules) -> Self {
        Self { cache, rules }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, operation: LimitedOperation, account_id: Uuid) -> Result<()> {
        let key = CacheKey::rate_limit(
            operation.as_str(),
            &account_id.to_string(),
            self.rules.window_index(),
        );

        match self.cache.incr_in_window(&key, self.rules.window).await {
            Ok(count) if count > self.rules.limit_for(operation) as i64 => Err(rejected(operation)),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, operation = operation.as_str(), "限流计数失败，放行请求");
                Ok(())
            }
        }
    }
}

/// 进程内限流器
pub struct InMemoryRateLimiter {
    counters: DashMap<(LimitedOperation, Uuid, i64), u32>,
    rules: RateLimitRules,
}

impl InMemoryRateLimiter {
    pub fn new(rules: RateLimitRules) -> Self {
        Self {
            counters: DashMap::new(),
            rules,
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, operation: LimitedOperation, account_id: Uuid) -> Result<()> {
        let window = self.rules.window_index();
        let count = {
            let mut counter = self
                .counters
                .entry((operation, account_id, window))
                .or_insert(0);
            *counter += 1;
            *counter
        };

        if count == 1 {
            // 新窗口开始时清理过期计数
            self.counters.retain(|key, _| key.2 >= window);
        }

        if count > self.rules.limit_for(operation) {
            return Err(rejected(operation));
        }
        Ok(())
    }
}

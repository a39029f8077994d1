//! Redis 计数存储
//!
//! 只承载短生命周期的计数（边界限流窗口），账本数据不进入 Redis。

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, instrument};

use crate::config::RedisConfig;
use crate::error::{OtpError, Result};

#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(OtpError::Internal(format!("unexpected PING reply: {pong}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 窗口计数：INCR 与 EXPIRE NX 在同一个 MULTI 中执行
    ///
    /// 过期时间只在键首次出现时设置，窗口内后续自增不会延长它。
    /// 返回自增后的计数值。
    #[instrument(skip(self))]
    pub async fn incr_in_window(&self, key: &str, window: Duration) -> Result<i64> {
        let mut conn = self.connection().await?;
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!(count, "window counter incremented");
        Ok(count)
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 限流计数键：按操作、账户和窗口序号分桶
    pub fn rate_limit(operation: &str, account_id: &str, window_index: i64) -> String {
        format!("ratelimit:{operation}:{account_id}:{window_index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_key_layout() {
        assert_eq!(
            CacheKey::rate_limit("number_lease", "abc", 42),
            "ratelimit:number_lease:abc:42"
        );
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_incr_in_window() {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        let key = "ratelimit:test:window";
        cache.delete(key).await.unwrap();

        assert_eq!(cache.incr_in_window(key, Duration::from_secs(5)).await.unwrap(), 1);
        assert_eq!(cache.incr_in_window(key, Duration::from_secs(5)).await.unwrap(), 2);

        cache.delete(key).await.unwrap();
    }
}

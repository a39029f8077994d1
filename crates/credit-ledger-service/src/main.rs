//! 积分账本服务
//!
//! 装配 PostgreSQL 仓储、Redis 限流与外部客户端，运行至收到关闭信号。
//! 传输层不在本进程内，健康检查与指标由 observability 模块在 metrics_port 上提供。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use otp_shared::{cache::Cache, config::AppConfig, database::Database, observability};

use credit_ledger::{
    AccountRepository, Backends, CountryRepository, CreditLedgerApp, GiftCodeRepository,
    HttpPaymentVerifier, HttpSmsSource, LedgerRepository, RedisRateLimiter, SmsRepository,
    rate_limit::RateLimitRules,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("credit-ledger-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: "credit-ledger-service".to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting credit-ledger-service...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;
    let latency = db.health_check().await?;
    let pool = db.pool().clone();
    info!(
        latency_ms = latency.as_millis() as u64,
        "Database connection established, migrations applied"
    );

    // 4. Redis（限流计数）
    let cache = Arc::new(Cache::new(&config.redis)?);
    cache.health_check().await?;
    info!("Redis connection established");

    // 5. 外部客户端
    let payment_verifier = Arc::new(HttpPaymentVerifier::new(&config.payment)?);
    if config.payment.secret_key.is_empty() {
        warn!("Payment secret key not configured, verification requests will be rejected");
    }
    let sms_source = Arc::new(HttpSmsSource::new(&config.sms)?);

    // 6. 仓储与服务
    let backends = Backends {
        accounts: Arc::new(AccountRepository::new(pool.clone())),
        ledger: Arc::new(LedgerRepository::new(pool.clone())),
        gift_codes: Arc::new(GiftCodeRepository::new(pool.clone())),
        countries: Arc::new(CountryRepository::new(pool.clone())),
        sms: Arc::new(SmsRepository::new(pool.clone())),
        payment_verifier,
        sms_source,
        rate_limiter: Arc::new(RedisRateLimiter::new(
            cache.clone(),
            RateLimitRules::from(&config.rate_limit),
        )),
    };
    let app = CreditLedgerApp::build(&config, backends);

    let stats = app.ledger.wallet_stats().await?;
    info!(
        total_entries = stats.total_entries,
        total_purchased = stats.total_purchased,
        lease_cost = app.allocator.lease_cost(),
        "Credit ledger ready"
    );

    shutdown_signal().await;

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

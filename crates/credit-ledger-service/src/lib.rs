//! 积分账本与兑换服务
//!
//! 虚拟号码租用业务中所有影响积分余额的操作都经由本服务完成。
//!
//! ## 核心功能
//!
//! - **积分账本**：追加式流水 + 余额投影，同账户串行，(reason, reference_id) 幂等
//! - **积分兑换**：兑换码、推荐奖励、每日登录奖励、支付校验入账
//! - **号码分配**：从国家号码池选号并扣费
//! - **短信拉取**：调用短信源并按自然键去重记录
//! - **边界限流**：号码租用与短信查看按账户固定窗口限流
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: PostgreSQL 与内存仓储
//! - `clients`: 支付服务商与短信源客户端
//! - `service`: 业务服务层
//! - `rate_limit`: 边界限流
//! - `app`: 服务装配

pub mod app;
pub mod clients;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod service;

pub use app::{Backends, CreditLedgerApp};
pub use clients::{HttpPaymentVerifier, HttpSmsSource, PaymentVerifier, SmsSource};
pub use error::{LedgerError, Result};
pub use models::*;
pub use rate_limit::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use repository::{
    AccountRepository, CountryRepository, GiftCodeRepository, InMemoryStore, LedgerRepository,
    SmsRepository,
};
pub use service::{
    AccountService, CreditLedger, NumberAllocator, RedemptionService, SmsPoller, dto,
};

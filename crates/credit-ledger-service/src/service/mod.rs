//! 服务层
//!
//! 协调仓储层与外部客户端，实现积分相关业务逻辑。
//!
//! ## 模块结构
//!
//! - `credit_ledger`: 积分账本，所有余额变动的唯一入口
//! - `redemption_service`: 兑换码、推荐、每日奖励、支付校验
//! - `number_allocator`: 号码租用扣费
//! - `sms_poller`: 短信拉取去重
//! - `account_service`: 注册与登录钩子
//! - `dto`: 数据传输对象定义

pub mod account_service;
pub mod credit_ledger;
pub mod dto;
pub mod number_allocator;
pub mod redemption_service;
pub mod sms_poller;

pub use account_service::{AccountService, SignUpResult};
pub use credit_ledger::CreditLedger;
pub use dto::*;
pub use number_allocator::NumberAllocator;
pub use redemption_service::{RedemptionPolicy, RedemptionService};
pub use sms_poller::SmsPoller;

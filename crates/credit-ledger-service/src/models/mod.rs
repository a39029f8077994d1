//! 领域模型定义
//!
//! 账户、账本流水、兑换码、号码池与短信记录

mod account;
mod enums;
mod gift_code;
mod ledger;
mod phone;
mod sms;

pub use account::*;
pub use enums::*;
pub use gift_code::*;
pub use ledger::*;
pub use phone::*;
pub use sms::*;

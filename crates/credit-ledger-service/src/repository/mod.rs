//! 仓储层
//!
//! PostgreSQL 实现供生产使用，`InMemoryStore` 以相同的原子性保证实现全部仓储接口，
//! 用于测试与本地开发。

mod account_repo;
mod country_repo;
mod gift_code_repo;
mod ledger_repo;
mod memory;
mod sms_repo;
mod traits;

pub use account_repo::AccountRepository;
pub use country_repo::CountryRepository;
pub use gift_code_repo::GiftCodeRepository;
pub use ledger_repo::LedgerRepository;
pub use memory::InMemoryStore;
pub use sms_repo::SmsRepository;
pub use traits::*;

//! 外部服务客户端
//!
//! 支付校验与短信源均通过 trait 抽象，HTTP 实现带显式超时，
//! 调用期间不持有任何账户锁。

mod payment;
mod sms;

pub use payment::*;
pub use sms::*;

/// 将 reqwest 错误映射为服务错误：超时单独区分，其余视为外部不可用
pub(crate) fn map_transport_error(service: &str, err: reqwest::Error) -> crate::error::LedgerError {
    if err.is_timeout() {
        crate::error::LedgerError::Timeout(service.to_string())
    } else {
        crate::error::LedgerError::external(service, err.to_string())
    }
}

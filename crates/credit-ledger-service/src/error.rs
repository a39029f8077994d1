//! 积分账本服务错误类型
//!
//! 定义余额、兑换、号码分配和外部依赖相关的业务错误与系统错误

use thiserror::Error;
use uuid::Uuid;

use otp_shared::error::OtpError;

/// 积分账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 账户与余额 ===
    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("账户不存在: {0}")]
    AccountNotFound(Uuid),

    /// 同一幂等键已被另一账户使用；同账户重放不是错误，而是带 `replayed` 标记的成功结果
    #[error("幂等键已被其他账户使用: reason={reason}, reference_id={reference_id}")]
    DuplicateReference {
        reason: String,
        reference_id: String,
    },

    // === 兑换相关 ===
    #[error("兑换码无效: {0}")]
    InvalidCode(String),

    #[error("兑换码已过期: {0}")]
    Expired(String),

    #[error("兑换码已领完: {0}")]
    Exhausted(String),

    #[error("已领取过: {0}")]
    AlreadyClaimed(String),

    #[error("支付校验失败: reference_id={reference_id}, {reason}")]
    VerificationFailed {
        reference_id: String,
        reason: String,
    },

    // === 号码分配 ===
    #[error("国家不存在: {0}")]
    CountryNotFound(Uuid),

    #[error("号码池为空: country_id={0}")]
    PoolEmpty(Uuid),

    // === 边界限流 ===
    #[error("操作过于频繁，请稍后重试: {operation}")]
    RateLimited { operation: String },

    // === 外部依赖与超时 ===
    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("外部服务不可用: {service} - {message}")]
    ExternalUnavailable { service: String, message: String },

    // === 系统错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 检查是否为可重试的错误
    ///
    /// 仅外部依赖和存储层的瞬时故障可重试，校验类错误直接返回调用方
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ExternalUnavailable { .. } | Self::Database(_)
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Timeout(_)
                | Self::ExternalUnavailable { .. }
                | Self::Database(_)
                | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::DuplicateReference { .. } => "DUPLICATE_REFERENCE",
            Self::InvalidCode(_) => "INVALID_CODE",
            Self::Expired(_) => "EXPIRED",
            Self::Exhausted(_) => "EXHAUSTED",
            Self::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            Self::VerificationFailed { .. } => "VERIFICATION_FAILED",
            Self::CountryNotFound(_) => "COUNTRY_NOT_FOUND",
            Self::PoolEmpty(_) => "POOL_EMPTY",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ExternalUnavailable { .. } => "EXTERNAL_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn external(service: &str, message: impl Into<String>) -> Self {
        Self::ExternalUnavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

impl From<OtpError> for LedgerError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::Database(e) => Self::Database(e),
            OtpError::Redis(e) => Self::external("redis", e.to_string()),
            OtpError::ExternalService { service, message } => {
                Self::ExternalUnavailable { service, message }
            }
            OtpError::ExternalServiceTimeout { service } => Self::Timeout(service),
            OtpError::RateLimitExceeded { operation } => Self::RateLimited { operation },
            OtpError::Validation(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(LedgerError::Timeout("payment".to_string()).is_retryable());
        assert!(LedgerError::external("sms", "503").is_retryable());
        assert!(LedgerError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            !LedgerError::InsufficientBalance {
                required: 5,
                available: 1
            }
            .is_retryable()
        );
        assert!(!LedgerError::Exhausted("WELCOME100".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(LedgerError::InvalidCode("X".to_string()).is_business_error());
        assert!(LedgerError::AccountNotFound(Uuid::nil()).is_business_error());
        assert!(!LedgerError::Timeout("ledger".to_string()).is_business_error());
        assert!(!LedgerError::Internal("boom".to_string()).is_business_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InsufficientBalance {
                required: 5,
                available: 0
            }
            .error_code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(
            LedgerError::AlreadyClaimed("WELCOME100".to_string()).error_code(),
            "ALREADY_CLAIMED"
        );
        assert_eq!(LedgerError::PoolEmpty(Uuid::nil()).error_code(), "POOL_EMPTY");
    }

    #[test]
    fn test_from_shared_error() {
        let err: LedgerError = OtpError::ExternalServiceTimeout {
            service: "payment".to_string(),
        }
        .into();
        assert!(matches!(err, LedgerError::Timeout(_)));

        let err: LedgerError = OtpError::RateLimitExceeded {
            operation: "sms_check".to_string(),
        }
        .into();
        assert!(matches!(err, LedgerError::RateLimited { .. }));
    }
}

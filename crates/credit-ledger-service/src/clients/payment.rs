//! 支付服务商校验客户端
//!
//! `GET {base_url}/verify/{reference}`，响应格式：
//! `{"status": true, "message": "...", "data": {"status": "success", "amount": 500000}}`，
//! 其中 amount 为最小货币单位。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use otp_shared::config::PaymentConfig;

use super::map_transport_error;
use crate::error::{LedgerError, Result};

const SERVICE: &str = "payment";

/// 支付校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub status: String,
    /// 最小货币单位金额
    pub amount: i64,
}

impl PaymentVerification {
    pub fn is_successful(&self) -> bool {
        self.status == "success"
    }
}

/// 支付校验接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, reference_id: &str) -> Result<PaymentVerification>;
}

#[derive(Debug, Deserialize)]
struct VerifyEnvelope {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
}

/// 基于 HTTP 的支付校验客户端
pub struct HttpPaymentVerifier {
    client: Client,
    base_url: Url,
    secret_key: String,
}

impl HttpPaymentVerifier {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LedgerError::Internal(format!("构建支付 HTTP 客户端失败: {}", e)))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| LedgerError::Validation(format!("支付服务地址无效: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            secret_key: config.secret_key.clone(),
        })
    }

    fn verify_url(&self, reference_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerError::Validation("支付服务地址不能作为基础路径".to_string()))?
            .pop_if_empty()
            .push("verify")
            .push(reference_id);
        Ok(url)
    }
}

#[async_trait]
impl PaymentVerifier for HttpPaymentVerifier {
    #[instrument(skip(self))]
    async fn verify(&self, reference_id: &str) -> Result<PaymentVerification> {
        let url = self.verify_url(reference_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| map_transport_error(SERVICE, e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(status = %status, "支付服务返回错误状态");
            return Err(LedgerError::external(SERVICE, format!("HTTP {}", status)));
        }

        let envelope: VerifyEnvelope = response
            .json()
            .await
            .map_err(|e| map_transport_error(SERVICE, e))?;

        debug!(status = envelope.status, "支付服务响应");

        match envelope.data {
            Some(data) if envelope.status => Ok(PaymentVerification {
                status: data.status,
                amount: data.amount,
            }),
            _ => Err(LedgerError::VerificationFailed {
                reference_id: reference_id.to_string(),
                reason: envelope
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            }),
        }
    }
}

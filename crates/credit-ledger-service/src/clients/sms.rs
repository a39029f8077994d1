//! 短信源客户端
//!
//! `GET {base_url}/messages?token=..&filternum=..&records=..`，响应格式：
//! `{"status": "success", "data": [{"dt": "...", "num": "...", "cli": "...", "message": "..."}]}`。
//! 短信源没有推送能力，只能轮询。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use otp_shared::config::SmsConfig;

use super::map_transport_error;
use crate::error::{LedgerError, Result};
use crate::models::NewSmsRecord;

const SERVICE: &str = "sms";

/// 短信源返回的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceMessage {
    pub dt: String,
    pub num: String,
    pub cli: String,
    pub message: String,
}

impl SourceMessage {
    /// 解析接收时间，支持 RFC 3339 与 `YYYY-MM-DD HH:MM:SS`（按 UTC），无法解析时返回 None
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&self.dt) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.dt, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn into_record(self, fallback_time: DateTime<Utc>) -> NewSmsRecord {
        let received_at = self.received_at().unwrap_or(fallback_time);
        NewSmsRecord {
            phone_number: self.num,
            sender: self.cli,
            message: self.message,
            received_at,
        }
    }
}

/// 短信源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsSource: Send + Sync {
    async fn fetch(&self, phone_number: &str) -> Result<Vec<SourceMessage>>;
}

#[derive(Debug, Deserialize)]
struct SourceEnvelope {
    status: String,
    #[serde(default)]
    data: Option<Vec<SourceMessage>>,
}

/// 基于 HTTP 的短信源客户端
pub struct HttpSmsSource {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
    records: u32,
}

impl HttpSmsSource {
    pub fn new(config: &SmsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LedgerError::Internal(format!("构建短信 HTTP 客户端失败: {}", e)))?;

        let mut endpoint = Url::parse(&config.base_url)
            .map_err(|e| LedgerError::Validation(format!("短信服务地址无效: {}", e)))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| LedgerError::Validation("短信服务地址不能作为基础路径".to_string()))?
            .pop_if_empty()
            .push("messages");

        Ok(Self {
            client,
            endpoint,
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
            records: config.records,
        })
    }
}

#[async_trait]
impl SmsSource for HttpSmsSource {
    #[instrument(skip(self))]
    async fn fetch(&self, phone_number: &str) -> Result<Vec<SourceMessage>> {
        let token = self
            .api_token
            .as_deref()
            .ok_or_else(|| LedgerError::external(SERVICE, "未配置短信 API token"))?;

        let records = self.records.to_string();
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("token", token),
                ("filternum", phone_number),
                ("records", records.as_str()),
            ])
            .send()
            .await
            .map_err(|e| map_transport_error(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::external(SERVICE, format!("HTTP {}", status)));
        }

        let envelope: SourceEnvelope = response
            .json()
            .await
            .map_err(|e| map_transport_error(SERVICE, e))?;

        if envelope.status != "success" {
            debug!(status = %envelope.status, "短信源未返回消息");
            return Ok(Vec::new());
        }

        Ok(envelope.data.unwrap_or_default())
    }
}

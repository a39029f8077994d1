//! 短信去重拉取
//!
//! 单次拉取无状态：调用短信源一次，逐条按自然键插入，
//! 唯一约束冲突即视为已记录。上游故障返回软失败（0 条新短信），不作为错误。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use otp_shared::observability::metrics;

use crate::clients::SmsSource;
use crate::error::{LedgerError, Result};
use crate::models::SmsRecord;
use crate::repository::SmsRepositoryTrait;
use crate::service::dto::{PollOutcome, SmsInbox};

const MAX_LISTED_MESSAGES: i64 = 100;

/// 短信去重拉取器
pub struct SmsPoller {
    source: Arc<dyn SmsSource>,
    sms_repo: Arc<dyn SmsRepositoryTrait>,
    follow_up_delay: Duration,
}

impl SmsPoller {
    pub fn new(
        source: Arc<dyn SmsSource>,
        sms_repo: Arc<dyn SmsRepositoryTrait>,
        follow_up_delay: Duration,
    ) -> Self {
        Self {
            source,
            sms_repo,
            follow_up_delay,
        }
    }

    /// 拉取一次并记录新短信
    #[instrument(skip(self))]
    pub async fn poll(&self, phone_number: &str) -> Result<PollOutcome> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(LedgerError::Validation("号码不能为空".to_string()));
        }

        let polled_at = Utc::now();
        let messages = match self.source.fetch(phone_number).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "短信源不可用，按 0 条新短信处理");
                metrics::record_sms_poll(false, 0);
                return Ok(PollOutcome {
                    phone_number: phone_number.to_string(),
                    new_messages: 0,
                    fetched: 0,
                    source_available: false,
                    polled_at,
                });
            }
        };

        let fetched = messages.len() as u64;
        let mut new_messages = 0u64;
        for message in messages {
            let mut record = message.into_record(polled_at);
            // 上游按号码过滤，记录统一归属到查询号码
            record.phone_number = phone_number.to_string();
            if self.sms_repo.insert_if_absent(&record).await? {
                new_messages += 1;
            }
        }

        metrics::record_sms_poll(true, new_messages);
        debug!(fetched, new_messages, "短信拉取完成");

        Ok(PollOutcome {
            phone_number: phone_number.to_string(),
            new_messages,
            fetched,
            source_available: true,
            polled_at,
        })
    }

    /// 两次独立拉取，间隔固定延迟，捕获两次调用之间到达的短信
    ///
    /// 两次拉取互不依赖；调用方被取消时第二次拉取不会发生
    pub async fn poll_with_follow_up(&self, phone_number: &str) -> Result<PollOutcome> {
        let first = self.poll(phone_number).await?;
        tokio::time::sleep(self.follow_up_delay).await;
        let second = self.poll(phone_number).await?;

        Ok(PollOutcome {
            new_messages: first.new_messages + second.new_messages,
            fetched: second.fetched,
            source_available: first.source_available || second.source_available,
            ..second
        })
    }

    /// 拉取后返回号码的短信列表（新在前）
    pub async fn check_messages(&self, phone_number: &str) -> Result<SmsInbox> {
        let outcome = self.poll_with_follow_up(phone_number).await?;
        let messages = self.messages(&outcome.phone_number).await?;

        Ok(SmsInbox {
            phone_number: outcome.phone_number,
            new_messages: outcome.new_messages,
            source_available: outcome.source_available,
            messages,
        })
    }

    pub async fn messages(&self, phone_number: &str) -> Result<Vec<SmsRecord>> {
        self.sms_repo
            .list_by_phone(phone_number.trim(), MAX_LISTED_MESSAGES)
            .await
    }
}

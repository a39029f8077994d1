//! 短信记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 已记录的短信
///
/// 以 (phone_number, sender, message) 作为自然键去重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SmsRecord {
    pub id: Uuid,
    pub phone_number: String,
    pub sender: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的短信
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewSmsRecord {
    pub phone_number: String,
    pub sender: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

impl NewSmsRecord {
    /// 自然键
    pub fn natural_key(&self) -> (String, String, String) {
        (
            self.phone_number.clone(),
            self.sender.clone(),
            self.message.clone(),
        )
    }
}

//! 短信仓储
//!
//! 去重依赖 (phone_number, sender, md5(message)) 唯一约束：
//! `ON CONFLICT DO NOTHING` 未插入即表示已记录过，不再单独做存在性查询。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::SmsRepositoryTrait;
use crate::error::Result;
use crate::models::{NewSmsRecord, SmsRecord};

/// 短信仓储
pub struct SmsRepository {
    pool: PgPool,
}

impl SmsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_if_absent(&self, record: &NewSmsRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sms_messages (id, phone_number, sender, message, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT uq_sms_messages_natural_key DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&record.phone_number)
        .bind(&record.sender)
        .bind(&record.message)
        .bind(record.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 按接收时间倒序列出号码的短信
    pub async fn list_by_phone(&self, phone_number: &str, limit: i64) -> Result<Vec<SmsRecord>> {
        let records = sqlx::query_as::<_, SmsRecord>(
            r#"
            SELECT id, phone_number, sender, message, received_at, created_at
            FROM sms_messages
            WHERE phone_number = $1
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(phone_number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[async_trait]
impl SmsRepositoryTrait for SmsRepository {
    async fn insert_if_absent(&self, record: &NewSmsRecord) -> Result<bool> {
        self.insert_if_absent(record).await
    }

    async fn list_by_phone(&self, phone_number: &str, limit: i64) -> Result<Vec<SmsRecord>> {
        self.list_by_phone(phone_number, limit).await
    }
}

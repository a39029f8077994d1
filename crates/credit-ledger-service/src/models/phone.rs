//! 号码池模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 国家号码池
///
/// `numbers_file` 为换行分隔的号码列表，号码允许被重复租用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Country {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub numbers_file: String,
    pub total_numbers: i32,
    pub used_numbers: i32,
    pub created_at: DateTime<Utc>,
}

impl Country {
    /// 解析号码列表，忽略空行和首尾空白
    pub fn numbers(&self) -> Vec<&str> {
        parse_numbers(&self.numbers_file)
    }
}

pub fn parse_numbers(numbers_file: &str) -> Vec<&str> {
    numbers_file
        .lines()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect()
}

/// 新建国家参数
#[derive(Debug, Clone)]
pub struct NewCountry {
    pub name: String,
    pub code: String,
    pub numbers_file: String,
}

/// 号码租用记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PhoneLease {
    pub id: Uuid,
    pub account_id: Uuid,
    pub country_id: Uuid,
    pub phone_number: String,
    pub leased_at: DateTime<Utc>,
}

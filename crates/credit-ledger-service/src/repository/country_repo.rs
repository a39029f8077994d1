//! 国家号码池仓储
//!
//! 号码池不在并发关键路径上：已用计数与租用历史尽力写入即可

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::CountryRepositoryTrait;
use crate::error::Result;
use crate::models::{Country, NewCountry, PhoneLease, parse_numbers};

const COUNTRY_COLUMNS: &str =
    "id, name, code, numbers_file, total_numbers, used_numbers, created_at";

/// 国家号码池仓储
pub struct CountryRepository {
    pool: PgPool,
}

impl CountryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, country: &NewCountry) -> Result<Country> {
        let total_numbers = parse_numbers(&country.numbers_file).len() as i32;

        let created = sqlx::query_as::<_, Country>(&format!(
            r#"
            INSERT INTO countries (id, name, code, numbers_file, total_numbers)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COUNTRY_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&country.name)
        .bind(&country.code)
        .bind(&country.numbers_file)
        .bind(total_numbers)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get_country(&self, id: Uuid) -> Result<Option<Country>> {
        let country = sqlx::query_as::<_, Country>(&format!(
            "SELECT {COUNTRY_COLUMNS} FROM countries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(country)
    }

    /// 原子自增已用计数，不做读改写
    pub async fn increment_used_numbers(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE countries SET used_numbers = used_numbers + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn record_lease(&self, lease: &PhoneLease) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO number_leases (id, account_id, country_id, phone_number, leased_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(lease.id)
        .bind(lease.account_id)
        .bind(lease.country_id)
        .bind(&lease.phone_number)
        .bind(lease.leased_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_leases(&self, account_id: Uuid, limit: i64) -> Result<Vec<PhoneLease>> {
        let leases = sqlx::query_as::<_, PhoneLease>(
            r#"
            SELECT id, account_id, country_id, phone_number, leased_at
            FROM number_leases
            WHERE account_id = $1
            ORDER BY leased_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(leases)
    }
}

#[async_trait]
impl CountryRepositoryTrait for CountryRepository {
    async fn create_country(&self, country: &NewCountry) -> Result<Country> {
        self.create(country).await
    }

    async fn get_country(&self, id: Uuid) -> Result<Option<Country>> {
        self.get_country(id).await
    }

    async fn increment_used_numbers(&self, id: Uuid) -> Result<()> {
        self.increment_used_numbers(id).await
    }

    async fn record_lease(&self, lease: &PhoneLease) -> Result<()> {
        self.record_lease(lease).await
    }

    async fn list_leases(&self, account_id: Uuid, limit: i64) -> Result<Vec<PhoneLease>> {
        self.list_leases(account_id, limit).await
    }
}

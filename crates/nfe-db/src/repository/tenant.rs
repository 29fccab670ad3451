//! # Tenant Repository
//!
//! Tenants are registered by the back office and read on every issuance.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use nfe_core::{Environment, Tenant};

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: String,
    tax_id: String,
    legal_name: String,
    state_code: i64,
    default_environment: Environment,
    csc_id: Option<String>,
    csc_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = DbError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let state_code = u8::try_from(row.state_code)
            .map_err(|_| DbError::corrupt("tenants", format!("state_code {}", row.state_code)))?;
        Ok(Tenant {
            id: row.id,
            tax_id: row.tax_id,
            legal_name: row.legal_name,
            state_code,
            default_environment: row.default_environment,
            csc_id: row.csc_id,
            csc_token: row.csc_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for tenant records.
#[derive(Debug, Clone)]
pub struct TenantRepository {
    pool: SqlitePool,
}

impl TenantRepository {
    /// Creates a new TenantRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TenantRepository { pool }
    }

    /// Inserts or replaces a tenant. `created_at` is kept on update.
    pub async fn upsert(&self, tenant: &Tenant) -> DbResult<()> {
        debug!(tenant_id = %tenant.id, "Upserting tenant");

        sqlx::query(
            r#"
            INSERT INTO tenants (
                id, tax_id, legal_name, state_code, default_environment,
                csc_id, csc_token, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                tax_id = excluded.tax_id,
                legal_name = excluded.legal_name,
                state_code = excluded.state_code,
                default_environment = excluded.default_environment,
                csc_id = excluded.csc_id,
                csc_token = excluded.csc_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.tax_id)
        .bind(&tenant.legal_name)
        .bind(i64::from(tenant.state_code))
        .bind(tenant.default_environment)
        .bind(&tenant.csc_id)
        .bind(&tenant.csc_token)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a tenant by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            SELECT id, tax_id, legal_name, state_code, default_environment,
                   csc_id, csc_token, created_at, updated_at
            FROM tenants
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tenant::try_from).transpose()
    }

    /// Gets a tenant or fails with `NotFound`.
    pub async fn require(&self, id: &str) -> DbResult<Tenant> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Tenant", id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::{Database, DbConfig};
    use chrono::Utc;
    use nfe_core::{Environment, Tenant};

    pub(crate) fn sample_tenant(id: &str) -> Tenant {
        let now = Utc::now();
        Tenant {
            id: id.to_string(),
            tax_id: "11222333000181".to_string(),
            legal_name: "Padaria Exemplo LTDA".to_string(),
            state_code: 35,
            default_environment: Environment::Homologation,
            csc_id: Some("000001".to_string()),
            csc_token: Some("TOKEN123".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();

        let mut tenant = sample_tenant("t1");
        repo.upsert(&tenant).await.unwrap();

        tenant.legal_name = "Padaria Renomeada LTDA".to_string();
        repo.upsert(&tenant).await.unwrap();

        let loaded = repo.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.legal_name, "Padaria Renomeada LTDA");
        assert_eq!(loaded.state_code, 35);
        assert_eq!(loaded.default_environment, Environment::Homologation);
        assert_eq!(loaded.csc_token.as_deref(), Some("TOKEN123"));
    }

    #[tokio::test]
    async fn test_require_missing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.tenants().get("nope").await.unwrap().is_none());
        assert!(matches!(
            db.tenants().require("nope").await,
            Err(crate::DbError::NotFound { .. })
        ));
    }
}

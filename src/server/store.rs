//! Persistent store for the Amulet backend.
//!
//! Unified abstraction over SQLite and Postgres. Every protocol-critical
//! mutation (bind, debit, refund, checkout) is a single conditional UPDATE so
//! the precondition check and the write cannot be separated by a concurrent
//! caller; zero rows affected means the precondition failed and the caller
//! re-reads to classify the error.
//!
//! Available variants depend on enabled features:
//! - `sqlite` feature enables `Store::SQLite`
//! - `postgres` feature enables `Store::Postgres`

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::{query, query_as, query_scalar, FromRow};
use std::sync::Arc;
use tracing::error;

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::get_config;
use crate::errors::{AmuletError, AmuletResult};

/// A license row: credential, device binding, and credit balance.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct License {
    pub id: i64,
    pub key: String,
    pub mac_id: Option<String>,
    pub status: String,
    pub credit: i64,
    pub last_active: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl License {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// An upstream API key row with its checkout state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub api_key: String,
    pub status: String,
    pub in_use: bool,
    pub last_used: Option<NaiveDateTime>,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Per-model credit cost.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Price {
    pub id: i64,
    pub model: String,
    pub price: i64,
    pub updated_at: NaiveDateTime,
}

/// The global config singleton row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AppConfig {
    pub id: i64,
    pub latest_version: String,
    pub force_update: bool,
    pub maintenance: bool,
    pub maintenance_message: Option<String>,
    pub update_description: Option<String>,
    pub update_links: String,
    pub updated_at: NaiveDateTime,
}

/// One append-only audit trail entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActivityLog {
    pub id: i64,
    pub action: String,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Filters for the admin license listing.
#[derive(Debug, Clone, Default)]
pub struct LicenseFilter {
    pub status: Option<String>,
    pub min_credit: Option<i64>,
    pub max_credit: Option<i64>,
    /// Substring match over key and bound mac.
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl LicenseFilter {
    fn like_pattern(&self) -> Option<String> {
        self.search.as_ref().map(|s| format!("%{s}%"))
    }
}

/// Prices seeded when the price table is empty, mirroring the models the
/// client ships with.
const DEFAULT_PRICES: &[(&str, i64)] = &[
    ("seedream-v4", 1),
    ("flux-dev", 1),
    ("flux-pro-v1-1", 2),
    ("gemini-2.5-flash", 1),
    ("imagen3", 2),
    ("classic-fast", 1),
];

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Unified store over SQLite and Postgres.
#[derive(Debug, Clone)]
pub enum Store {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Store {
    /// Connect to the database selected by the configuration.
    pub async fn connect() -> AmuletResult<Arc<Self>> {
        let config = get_config()?;
        let db_config = &config.database;

        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        AmuletError::StorageError(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Store::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(AmuletError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        AmuletError::StorageError(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Arc::new(Store::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(AmuletError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(AmuletError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Apply the versioned schema migrations.
    ///
    /// Applied once at startup; there is no runtime schema patching.
    pub async fn migrate(&self) -> AmuletResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => sqlx::migrate!("migrations/sqlite")
                .run(pool)
                .await
                .map_err(|e| {
                    error!("SQLite migration failed: {e}");
                    AmuletError::StorageError(format!("migration failed: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => sqlx::migrate!("migrations/postgres")
                .run(pool)
                .await
                .map_err(|e| {
                    error!("Postgres migration failed: {e}");
                    AmuletError::StorageError(format!("migration failed: {e}"))
                }),
        }
    }

    /// Seed the config singleton and the default price table if absent.
    pub async fn ensure_defaults(&self) -> AmuletResult<()> {
        if self.get_app_config().await?.is_none() {
            self.insert_default_config().await?;
        }

        if self.count_prices().await? == 0 {
            for (model, price) in DEFAULT_PRICES {
                self.upsert_price(model, *price).await?;
            }
        }

        Ok(())
    }

    // ========================================================================
    // Licenses
    // ========================================================================

    /// Fetch a license by its client-facing key.
    pub async fn get_license_by_key(&self, key: &str) -> AmuletResult<Option<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, License>("SELECT * FROM license WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("SQLite get_license_by_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, License>("SELECT * FROM license WHERE key = $1")
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("Postgres get_license_by_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    /// Fetch a license by row id.
    pub async fn get_license(&self, id: i64) -> AmuletResult<Option<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, License>("SELECT * FROM license WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("SQLite get_license failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, License>("SELECT * FROM license WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("Postgres get_license failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    /// Whether a license with this key already exists.
    pub async fn license_key_exists(&self, key: &str) -> AmuletResult<bool> {
        let count: i64 = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query_scalar("SELECT COUNT(*) FROM license WHERE key = ?")
                    .bind(key)
                    .fetch_one(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite license_key_exists failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_scalar("SELECT COUNT(*) FROM license WHERE key = $1")
                    .bind(key)
                    .fetch_one(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres license_key_exists failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?
            }
        };

        Ok(count > 0)
    }

    /// Insert a new license and return the stored row.
    pub async fn insert_license(
        &self,
        key: &str,
        mac_id: Option<&str>,
        status: &str,
        credit: i64,
    ) -> AmuletResult<License> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, License>(
                r#"
                INSERT INTO license (key, mac_id, status, credit, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(key)
            .bind(mac_id)
            .bind(status)
            .bind(credit)
            .bind(ts)
            .bind(ts)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                error!("SQLite insert_license failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, License>(
                r#"
                INSERT INTO license (key, mac_id, status, credit, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(key)
            .bind(mac_id)
            .bind(status)
            .bind(credit)
            .bind(ts)
            .bind(ts)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                error!("Postgres insert_license failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
        }
    }

    /// List licenses with filters and pagination; returns rows and the
    /// unpaginated total.
    pub async fn list_licenses(
        &self,
        filter: &LicenseFilter,
    ) -> AmuletResult<(Vec<License>, i64)> {
        let like = filter.like_pattern();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                let rows = query_as::<_, License>(
                    r#"
                    SELECT * FROM license
                    WHERE (?1 IS NULL OR status = ?1)
                      AND (?2 IS NULL OR credit >= ?2)
                      AND (?3 IS NULL OR credit <= ?3)
                      AND (?4 IS NULL OR key LIKE ?4 OR COALESCE(mac_id, '') LIKE ?4)
                    ORDER BY id DESC
                    LIMIT ?5 OFFSET ?6
                    "#,
                )
                .bind(&filter.status)
                .bind(filter.min_credit)
                .bind(filter.max_credit)
                .bind(&like)
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite list_licenses failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;

                let total: i64 = query_scalar(
                    r#"
                    SELECT COUNT(*) FROM license
                    WHERE (?1 IS NULL OR status = ?1)
                      AND (?2 IS NULL OR credit >= ?2)
                      AND (?3 IS NULL OR credit <= ?3)
                      AND (?4 IS NULL OR key LIKE ?4 OR COALESCE(mac_id, '') LIKE ?4)
                    "#,
                )
                .bind(&filter.status)
                .bind(filter.min_credit)
                .bind(filter.max_credit)
                .bind(&like)
                .fetch_one(pool)
                .await
                .map_err(|e| {
                    error!("SQLite list_licenses count failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;

                Ok((rows, total))
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                let rows = query_as::<_, License>(
                    r#"
                    SELECT * FROM license
                    WHERE ($1::text IS NULL OR status = $1)
                      AND ($2::bigint IS NULL OR credit >= $2)
                      AND ($3::bigint IS NULL OR credit <= $3)
                      AND ($4::text IS NULL OR key LIKE $4 OR COALESCE(mac_id, '') LIKE $4)
                    ORDER BY id DESC
                    LIMIT $5 OFFSET $6
                    "#,
                )
                .bind(&filter.status)
                .bind(filter.min_credit)
                .bind(filter.max_credit)
                .bind(&like)
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("Postgres list_licenses failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;

                let total: i64 = query_scalar(
                    r#"
                    SELECT COUNT(*) FROM license
                    WHERE ($1::text IS NULL OR status = $1)
                      AND ($2::bigint IS NULL OR credit >= $2)
                      AND ($3::bigint IS NULL OR credit <= $3)
                      AND ($4::text IS NULL OR key LIKE $4 OR COALESCE(mac_id, '') LIKE $4)
                    "#,
                )
                .bind(&filter.status)
                .bind(filter.min_credit)
                .bind(filter.max_credit)
                .bind(&like)
                .fetch_one(pool)
                .await
                .map_err(|e| {
                    error!("Postgres list_licenses count failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;

                Ok((rows, total))
            }
        }
    }

    /// Every license row, newest first. Used by the backup export.
    pub async fn all_licenses(&self) -> AmuletResult<Vec<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, License>("SELECT * FROM license ORDER BY id DESC")
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite all_licenses failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_as::<_, License>("SELECT * FROM license ORDER BY id DESC")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres all_licenses failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
        }
    }

    /// Overwrite the editable license fields (admin path).
    pub async fn update_license(
        &self,
        id: i64,
        mac_id: Option<&str>,
        status: &str,
        credit: i64,
    ) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query(
                "UPDATE license SET mac_id = ?, status = ?, credit = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(mac_id)
            .bind(status)
            .bind(credit)
            .bind(ts)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite update_license failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query(
                "UPDATE license SET mac_id = $1, status = $2, credit = $3, updated_at = $4 \
                 WHERE id = $5",
            )
            .bind(mac_id)
            .bind(status)
            .bind(credit)
            .bind(ts)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres update_license failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Hard-delete a license.
    pub async fn delete_license(&self, id: i64) -> AmuletResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query("DELETE FROM license WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite delete_license failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query("DELETE FROM license WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres delete_license failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?
                .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Bind-on-first-use: set the mac fingerprint only if none is bound yet.
    ///
    /// Returns `true` when this call won the bind. Losing a concurrent race
    /// returns `false`; the caller re-reads and compares.
    pub async fn bind_mac(&self, key: &str, mac: &str) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query(
                "UPDATE license SET mac_id = ?1, last_active = ?2, updated_at = ?2 \
                 WHERE key = ?3 AND mac_id IS NULL AND status = 'active'",
            )
            .bind(mac)
            .bind(ts)
            .bind(key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite bind_mac failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query(
                "UPDATE license SET mac_id = $1, last_active = $2, updated_at = $2 \
                 WHERE key = $3 AND mac_id IS NULL AND status = 'active'",
            )
            .bind(mac)
            .bind(ts)
            .bind(key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres bind_mac failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Stamp `last_active` after a successful protocol call.
    pub async fn touch_last_active(&self, key: &str) -> AmuletResult<()> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query("UPDATE license SET last_active = ?1, updated_at = ?1 WHERE key = ?2")
                    .bind(ts)
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite touch_last_active failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?;
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query("UPDATE license SET last_active = $1, updated_at = $1 WHERE key = $2")
                    .bind(ts)
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres touch_last_active failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?;
            }
        }

        Ok(())
    }

    /// Atomically debit `cost` credits if the license is active, bound to
    /// `mac`, and has sufficient balance.
    ///
    /// Returns the new balance when the debit applied, `None` when any
    /// precondition failed (no row matched the guard).
    pub async fn debit_credit(
        &self,
        key: &str,
        mac: &str,
        cost: i64,
    ) -> AmuletResult<Option<i64>> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_scalar::<_, i64>(
                r#"
                UPDATE license
                   SET credit = credit - ?1, last_active = ?2, updated_at = ?2
                 WHERE key = ?3
                   AND status = 'active'
                   AND mac_id = ?4
                   AND credit >= ?1
                RETURNING credit
                "#,
            )
            .bind(cost)
            .bind(ts)
            .bind(key)
            .bind(mac)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("SQLite debit_credit failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_scalar::<_, i64>(
                r#"
                UPDATE license
                   SET credit = credit - $1, last_active = $2, updated_at = $2
                 WHERE key = $3
                   AND status = 'active'
                   AND mac_id = $4
                   AND credit >= $1
                RETURNING credit
                "#,
            )
            .bind(cost)
            .bind(ts)
            .bind(key)
            .bind(mac)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("Postgres debit_credit failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
        }
    }

    /// Atomically refund `amount` credits to a license bound to `mac`.
    ///
    /// Deliberately does not check `status`: a license disabled mid-flight
    /// may still reconcile a failed paid operation.
    pub async fn refund_credit(
        &self,
        key: &str,
        mac: &str,
        amount: i64,
    ) -> AmuletResult<Option<i64>> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_scalar::<_, i64>(
                r#"
                UPDATE license
                   SET credit = credit + ?1, last_active = ?2, updated_at = ?2
                 WHERE key = ?3 AND mac_id = ?4
                RETURNING credit
                "#,
            )
            .bind(amount)
            .bind(ts)
            .bind(key)
            .bind(mac)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("SQLite refund_credit failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_scalar::<_, i64>(
                r#"
                UPDATE license
                   SET credit = credit + $1, last_active = $2, updated_at = $2
                 WHERE key = $3 AND mac_id = $4
                RETURNING credit
                "#,
            )
            .bind(amount)
            .bind(ts)
            .bind(key)
            .bind(mac)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("Postgres refund_credit failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
        }
    }

    // ========================================================================
    // API key pool
    // ========================================================================

    /// Atomically check out the lowest-id free, active api key.
    ///
    /// At most one concurrent caller can claim a given row: the UPDATE is
    /// guarded by `in_use` (SQLite serializes writers; Postgres additionally
    /// uses `FOR UPDATE SKIP LOCKED` on the selecting subquery).
    pub async fn checkout_api_key(&self) -> AmuletResult<Option<ApiKey>> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, ApiKey>(
                r#"
                UPDATE api_key
                   SET in_use = 1, last_used = ?1, updated_at = ?1
                 WHERE id = (
                       SELECT id FROM api_key
                        WHERE status = 'active' AND in_use = 0
                        ORDER BY id
                        LIMIT 1)
                   AND in_use = 0
                RETURNING *
                "#,
            )
            .bind(ts)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("SQLite checkout_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, ApiKey>(
                r#"
                UPDATE api_key
                   SET in_use = TRUE, last_used = $1, updated_at = $1
                 WHERE id = (
                       SELECT id FROM api_key
                        WHERE status = 'active' AND in_use = FALSE
                        ORDER BY id
                        FOR UPDATE SKIP LOCKED
                        LIMIT 1)
                RETURNING *
                "#,
            )
            .bind(ts)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("Postgres checkout_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
        }
    }

    /// Release an api key back into the pool. Idempotent.
    ///
    /// Returns whether a row matched; releasing an unknown or already-free
    /// key is not an error at this layer.
    pub async fn release_api_key(&self, api_key: &str) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query(
                "UPDATE api_key SET in_use = 0, last_used = ?1, updated_at = ?1 \
                 WHERE api_key = ?2",
            )
            .bind(ts)
            .bind(api_key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite release_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query(
                "UPDATE api_key SET in_use = FALSE, last_used = $1, updated_at = $1 \
                 WHERE api_key = $2",
            )
            .bind(ts)
            .bind(api_key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres release_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Deactivate an api key. An inactive key is always considered released.
    pub async fn deactivate_api_key(&self, api_key: &str) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query(
                "UPDATE api_key SET status = 'inactive', in_use = 0, updated_at = ?1 \
                 WHERE api_key = ?2",
            )
            .bind(ts)
            .bind(api_key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite deactivate_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query(
                "UPDATE api_key SET status = 'inactive', in_use = FALSE, updated_at = $1 \
                 WHERE api_key = $2",
            )
            .bind(ts)
            .bind(api_key)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres deactivate_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Whether an api key with this exact value already exists.
    pub async fn api_key_exists(&self, api_key: &str) -> AmuletResult<bool> {
        let count: i64 = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query_scalar("SELECT COUNT(*) FROM api_key WHERE api_key = ?")
                    .bind(api_key)
                    .fetch_one(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite api_key_exists failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_scalar("SELECT COUNT(*) FROM api_key WHERE api_key = $1")
                    .bind(api_key)
                    .fetch_one(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres api_key_exists failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?
            }
        };

        Ok(count > 0)
    }

    /// Insert a new api key and return the stored row.
    pub async fn insert_api_key(
        &self,
        api_key: &str,
        status: &str,
        note: Option<&str>,
    ) -> AmuletResult<ApiKey> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, ApiKey>(
                r#"
                INSERT INTO api_key (api_key, status, in_use, note, created_at, updated_at)
                VALUES (?, ?, 0, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(api_key)
            .bind(status)
            .bind(note)
            .bind(ts)
            .bind(ts)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                error!("SQLite insert_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, ApiKey>(
                r#"
                INSERT INTO api_key (api_key, status, in_use, note, created_at, updated_at)
                VALUES ($1, $2, FALSE, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(api_key)
            .bind(status)
            .bind(note)
            .bind(ts)
            .bind(ts)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                error!("Postgres insert_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            }),
        }
    }

    /// Fetch an api key by row id.
    pub async fn get_api_key(&self, id: i64) -> AmuletResult<Option<ApiKey>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, ApiKey>("SELECT * FROM api_key WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("SQLite get_api_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, ApiKey>("SELECT * FROM api_key WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("Postgres get_api_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    /// All api keys, newest first.
    pub async fn list_api_keys(&self) -> AmuletResult<Vec<ApiKey>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, ApiKey>("SELECT * FROM api_key ORDER BY id DESC")
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite list_api_keys failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_as::<_, ApiKey>("SELECT * FROM api_key ORDER BY id DESC")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres list_api_keys failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
        }
    }

    /// Overwrite the editable api key fields (admin path).
    pub async fn update_api_key(
        &self,
        id: i64,
        status: &str,
        in_use: bool,
        note: Option<&str>,
    ) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query(
                "UPDATE api_key SET status = ?, in_use = ?, note = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(status)
            .bind(in_use)
            .bind(note)
            .bind(ts)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite update_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query(
                "UPDATE api_key SET status = $1, in_use = $2, note = $3, updated_at = $4 \
                 WHERE id = $5",
            )
            .bind(status)
            .bind(in_use)
            .bind(note)
            .bind(ts)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres update_api_key failed: {e}");
                AmuletError::StorageError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Hard-delete an api key.
    pub async fn delete_api_key(&self, id: i64) -> AmuletResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query("DELETE FROM api_key WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite delete_api_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query("DELETE FROM api_key WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres delete_api_key failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?
                .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    // ========================================================================
    // Prices
    // ========================================================================

    /// Unit price for a model, if one is configured.
    pub async fn price_for_model(&self, model: &str) -> AmuletResult<Option<i64>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_scalar("SELECT price FROM price WHERE model = ?")
                .bind(model)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("SQLite price_for_model failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_scalar("SELECT price FROM price WHERE model = $1")
                .bind(model)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    error!("Postgres price_for_model failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    /// All prices, ordered by model name.
    pub async fn list_prices(&self) -> AmuletResult<Vec<Price>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_as::<_, Price>("SELECT * FROM price ORDER BY model ASC")
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite list_prices failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_as::<_, Price>("SELECT * FROM price ORDER BY model ASC")
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("Postgres list_prices failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    async fn count_prices(&self) -> AmuletResult<i64> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query_scalar("SELECT COUNT(*) FROM price")
                .fetch_one(pool)
                .await
                .map_err(|e| {
                    error!("SQLite count_prices failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => query_scalar("SELECT COUNT(*) FROM price")
                .fetch_one(pool)
                .await
                .map_err(|e| {
                    error!("Postgres count_prices failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                }),
        }
    }

    /// Insert or update the price for a model.
    pub async fn upsert_price(&self, model: &str, price: i64) -> AmuletResult<()> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO price (model, price, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(model) DO UPDATE SET
                        price = excluded.price,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(model)
                .bind(price)
                .bind(ts)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite upsert_price failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO price (model, price, updated_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (model) DO UPDATE SET
                        price = EXCLUDED.price,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(model)
                .bind(price)
                .bind(ts)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres upsert_price failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Update a price row by id.
    pub async fn update_price(&self, id: i64, price: i64) -> AmuletResult<bool> {
        let ts = now();

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => query("UPDATE price SET price = ?, updated_at = ? WHERE id = ?")
                .bind(price)
                .bind(ts)
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite update_price failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query("UPDATE price SET price = $1, updated_at = $2 WHERE id = $3")
                    .bind(price)
                    .bind(ts)
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres update_price failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?
                    .rows_affected()
            }
        };

        Ok(rows_affected > 0)
    }

    // ========================================================================
    // Config singleton
    // ========================================================================

    /// Fetch the config singleton row, if seeded.
    pub async fn get_app_config(&self) -> AmuletResult<Option<AppConfig>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query_as::<_, AppConfig>("SELECT * FROM config ORDER BY id LIMIT 1")
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_app_config failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_as::<_, AppConfig>("SELECT * FROM config ORDER BY id LIMIT 1")
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_app_config failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
        }
    }

    async fn insert_default_config(&self) -> AmuletResult<()> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO config
                        (latest_version, force_update, maintenance,
                         maintenance_message, update_description, update_links, updated_at)
                    VALUES ('2.3.3', 0, 0, '', '', '[]', ?)
                    "#,
                )
                .bind(ts)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_default_config failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO config
                        (latest_version, force_update, maintenance,
                         maintenance_message, update_description, update_links, updated_at)
                    VALUES ('2.3.3', FALSE, FALSE, '', '', '[]', $1)
                    "#,
                )
                .bind(ts)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_default_config failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Overwrite the config singleton.
    pub async fn update_app_config(&self, cfg: &AppConfig) -> AmuletResult<()> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query(
                    r#"
                    UPDATE config SET
                        latest_version = ?,
                        force_update = ?,
                        maintenance = ?,
                        maintenance_message = ?,
                        update_description = ?,
                        update_links = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&cfg.latest_version)
                .bind(cfg.force_update)
                .bind(cfg.maintenance)
                .bind(&cfg.maintenance_message)
                .bind(&cfg.update_description)
                .bind(&cfg.update_links)
                .bind(ts)
                .bind(cfg.id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite update_app_config failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query(
                    r#"
                    UPDATE config SET
                        latest_version = $1,
                        force_update = $2,
                        maintenance = $3,
                        maintenance_message = $4,
                        update_description = $5,
                        update_links = $6,
                        updated_at = $7
                    WHERE id = $8
                    "#,
                )
                .bind(&cfg.latest_version)
                .bind(cfg.force_update)
                .bind(cfg.maintenance)
                .bind(&cfg.maintenance_message)
                .bind(&cfg.update_description)
                .bind(&cfg.update_links)
                .bind(ts)
                .bind(cfg.id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres update_app_config failed: {e}");
                    AmuletError::StorageError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    // ========================================================================
    // Activity log
    // ========================================================================

    /// Append an audit trail entry.
    ///
    /// Callers treat this as best-effort; it never participates in the
    /// atomicity boundary of the operation it records.
    pub async fn log_activity(&self, action: &str, details: &str) -> AmuletResult<()> {
        let ts = now();

        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query("INSERT INTO activity_log (action, details, created_at) VALUES (?, ?, ?)")
                    .bind(action)
                    .bind(details)
                    .bind(ts)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite log_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?;
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query("INSERT INTO activity_log (action, details, created_at) VALUES ($1, $2, $3)")
                    .bind(action)
                    .bind(details)
                    .bind(ts)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres log_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })?;
            }
        }

        Ok(())
    }

    /// Every activity log entry, newest first. Used by the backup export.
    pub async fn all_activity(&self) -> AmuletResult<Vec<ActivityLog>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query_as::<_, ActivityLog>("SELECT * FROM activity_log ORDER BY id DESC")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite all_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_as::<_, ActivityLog>("SELECT * FROM activity_log ORDER BY id DESC")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres all_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
        }
    }

    /// Most recent activity log entries, newest first.
    pub async fn list_activity(&self, limit: i64) -> AmuletResult<Vec<ActivityLog>> {
        match self {
            #[cfg(feature = "sqlite")]
            Store::SQLite(pool) => {
                query_as::<_, ActivityLog>("SELECT * FROM activity_log ORDER BY id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite list_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
            #[cfg(feature = "postgres")]
            Store::Postgres(pool) => {
                query_as::<_, ActivityLog>("SELECT * FROM activity_log ORDER BY id DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres list_activity failed: {e}");
                        AmuletError::StorageError(format!("database error: {e}"))
                    })
            }
        }
    }
}

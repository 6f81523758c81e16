use crate::{ProfileRecord, ProfileStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Database;
use std::collections::BTreeMap;

type ProfileRow = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    String,
);

/// A profile store backed by a SQL table.
///
/// Each upsert is a single `INSERT .. ON CONFLICT DO UPDATE` statement, so the database's
/// row lock provides the per-key atomicity the store contract asks for. Scalar columns merge
/// with `COALESCE`; attributes are a JSON object merged key by key.
#[derive(Clone, Debug)]
pub struct SqlProfileStore<DB: Database> {
    pool: sqlx::Pool<DB>,
    table_name: String,
}

impl<DB: Database> SqlProfileStore<DB> {
    pub fn new(pool: sqlx::Pool<DB>) -> Self {
        Self {
            pool,
            table_name: "keepsake_profiles".to_string(),
        }
    }

    pub fn with_table_name(pool: sqlx::Pool<DB>, table_name: String) -> Self {
        Self { pool, table_name }
    }
}

fn encode_attributes(attributes: &BTreeMap<String, String>) -> Result<String, StoreError> {
    serde_json::to_string(attributes)
        .map_err(|e| StoreError::Serialization(format!("Attributes serialization error: {}", e)))
}

fn decode_row(row: ProfileRow) -> Result<ProfileRecord, StoreError> {
    let (name, email, picture_url, created_at, last_login, attributes_json) = row;
    let attributes = serde_json::from_str(&attributes_json)
        .map_err(|e| StoreError::Serialization(format!("Attributes deserialization error: {}", e)))?;
    Ok(ProfileRecord {
        name,
        email,
        picture_url,
        created_at,
        last_login,
        attributes,
    })
}

#[cfg(feature = "sqlite")]
impl SqlProfileStore<sqlx::Sqlite> {
    /// Create the profile table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identity TEXT PRIMARY KEY,
                name TEXT,
                email TEXT,
                picture_url TEXT,
                created_at TEXT,
                last_login TEXT,
                attributes TEXT NOT NULL DEFAULT '{{}}'
            )",
            self.table_name
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Sqlite migrate error: {}", e)))?;
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
#[async_trait]
impl ProfileStore for SqlProfileStore<sqlx::Sqlite> {
    async fn get(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError> {
        let query = format!(
            "SELECT name, email, picture_url, created_at, last_login, attributes FROM {} WHERE identity = ?1",
            self.table_name
        );
        let row: Option<ProfileRow> = sqlx::query_as(&query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Sqlite get error: {}", e)))?;

        row.map(decode_row).transpose()
    }

    async fn upsert_merge(
        &self,
        identity: &str,
        patch: ProfileRecord,
    ) -> Result<ProfileRecord, StoreError> {
        let t = &self.table_name;
        let query = format!(
            "INSERT INTO {t} (identity, name, email, picture_url, created_at, last_login, attributes)
             VALUES (?1, ?2, ?3, ?4, COALESCE(?5, ?7), ?6, ?8)
             ON CONFLICT(identity) DO UPDATE SET
             name = COALESCE(excluded.name, {t}.name),
             email = COALESCE(excluded.email, {t}.email),
             picture_url = COALESCE(excluded.picture_url, {t}.picture_url),
             created_at = COALESCE(?5, {t}.created_at, ?7),
             last_login = COALESCE(excluded.last_login, {t}.last_login),
             attributes = json_patch({t}.attributes, excluded.attributes)
             RETURNING name, email, picture_url, created_at, last_login, attributes"
        );
        let attributes_json = encode_attributes(&patch.attributes)?;

        let row: ProfileRow = sqlx::query_as(&query)
            .bind(identity)
            .bind(&patch.name)
            .bind(&patch.email)
            .bind(&patch.picture_url)
            .bind(patch.created_at)
            .bind(patch.last_login)
            .bind(Utc::now())
            .bind(attributes_json)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Sqlite upsert_merge error: {}", e)))?;

        decode_row(row)
    }
}

#[cfg(feature = "postgres")]
impl SqlProfileStore<sqlx::Postgres> {
    /// Create the profile table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identity TEXT PRIMARY KEY,
                name TEXT,
                email TEXT,
                picture_url TEXT,
                created_at TIMESTAMPTZ,
                last_login TIMESTAMPTZ,
                attributes TEXT NOT NULL DEFAULT '{{}}'
            )",
            self.table_name
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Postgres migrate error: {}", e)))?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl ProfileStore for SqlProfileStore<sqlx::Postgres> {
    async fn get(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError> {
        let query = format!(
            "SELECT name, email, picture_url, created_at, last_login, attributes FROM {} WHERE identity = $1",
            self.table_name
        );
        let row: Option<ProfileRow> = sqlx::query_as(&query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Postgres get error: {}", e)))?;

        row.map(decode_row).transpose()
    }

    async fn upsert_merge(
        &self,
        identity: &str,
        patch: ProfileRecord,
    ) -> Result<ProfileRecord, StoreError> {
        let t = &self.table_name;
        let query = format!(
            "INSERT INTO {t} (identity, name, email, picture_url, created_at, last_login, attributes)
             VALUES ($1, $2, $3, $4, COALESCE($5, $7), $6, $8)
             ON CONFLICT (identity) DO UPDATE SET
             name = COALESCE(EXCLUDED.name, {t}.name),
             email = COALESCE(EXCLUDED.email, {t}.email),
             picture_url = COALESCE(EXCLUDED.picture_url, {t}.picture_url),
             created_at = COALESCE($5, {t}.created_at, $7),
             last_login = COALESCE(EXCLUDED.last_login, {t}.last_login),
             attributes = ({t}.attributes::jsonb || EXCLUDED.attributes::jsonb)::text
             RETURNING name, email, picture_url, created_at, last_login, attributes"
        );
        let attributes_json = encode_attributes(&patch.attributes)?;

        let row: ProfileRow = sqlx::query_as(&query)
            .bind(identity)
            .bind(&patch.name)
            .bind(&patch.email)
            .bind(&patch.picture_url)
            .bind(patch.created_at)
            .bind(patch.last_login)
            .bind(Utc::now())
            .bind(attributes_json)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Postgres upsert_merge error: {}", e)))?;

        decode_row(row)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqlProfileStore<sqlx::Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqlProfileStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn sqlite_upsert_merges_fields_and_attributes() {
        let store = store().await;

        let mut first = ProfileRecord::default().with_name("Alice");
        first.attributes.insert("locale".into(), "en".into());
        let created = store.upsert_merge("u1", first).await.unwrap();
        assert!(created.created_at.is_some());

        let mut second = ProfileRecord::default().with_email("a@x.com");
        second.attributes.insert("theme".into(), "dark".into());
        let merged = store.upsert_merge("u1", second).await.unwrap();

        assert_eq!(merged.name.as_deref(), Some("Alice"));
        assert_eq!(merged.email.as_deref(), Some("a@x.com"));
        assert_eq!(merged.created_at, created.created_at);
        assert_eq!(merged.attributes.len(), 2);
        assert_eq!(store.get("u1").await.unwrap(), Some(merged));
    }

    #[tokio::test]
    async fn sqlite_get_missing_is_none() {
        let store = store().await;
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}

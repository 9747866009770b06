//! Persistence (spec §3 `AssetRecord`/`HistoryRecord`, §6 non-core
//! collaborator). Grounded directly on `der_headend/src/db.rs`: individually
//! executed `CREATE TABLE IF NOT EXISTS` statements (avoids the
//! multi-statement prepared-statement error some drivers raise), raw
//! `sqlx::query`/`bind` calls rather than the `query!` macro, and
//! `ON CONFLICT ... DO UPDATE SET` upserts keyed on the natural id.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};

use crate::models::{AssetRecord, HistoryRecord};

/// Persistence seam the coordinator writes through (§9: confined, not a
/// process-wide singleton — owned by whatever constructs the coordinator).
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_asset(&self, unique_id: &str) -> Result<Option<AssetRecord>>;
    async fn upsert_asset(&self, asset: &AssetRecord) -> Result<()>;
    async fn append_history(&self, record: &HistoryRecord) -> Result<()>;

    /// Connectivity check backing `/health` (§6): `Err` means the store is
    /// unreachable, not that the query itself failed semantically.
    async fn ping(&self) -> Result<()>;
}

pub async fn maybe_connect_db(database_url: Option<&str>) -> Result<Option<PgPool>> {
    let Some(url) = database_url else {
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("connecting to DATABASE_URL")?;
    init_db(&pool).await?;
    Ok(Some(pool))
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            unique_id text PRIMARY KEY,
            asset_id bigint NOT NULL,
            def_index integer NOT NULL,
            paint_index integer NOT NULL,
            rarity integer NOT NULL,
            quality integer NOT NULL,
            paint_seed integer,
            paint_wear double precision,
            quest_id integer,
            origin integer NOT NULL,
            owner_id text,
            stickers jsonb NOT NULL DEFAULT '[]'::jsonb,
            keychains jsonb NOT NULL DEFAULT '[]'::jsonb,
            first_seen_at timestamptz NOT NULL,
            updated_at timestamptz NOT NULL
        );
    "#,
    )
    .execute(pool)
    .await
    .context("creating assets table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS asset_history (
            unique_id text NOT NULL,
            asset_id bigint NOT NULL,
            event_type text NOT NULL,
            owner_id text,
            created_at timestamptz NOT NULL,
            UNIQUE (unique_id, asset_id)
        );
    "#,
    )
    .execute(pool)
    .await
    .context("creating asset_history table")?;

    Ok(())
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn find_asset(&self, unique_id: &str) -> Result<Option<AssetRecord>> {
        let row = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT unique_id, asset_id, def_index, paint_index, rarity, quality,
                   paint_seed, paint_wear, quest_id, origin, owner_id,
                   stickers, keychains, first_seen_at, updated_at
            FROM assets WHERE unique_id = $1
        "#,
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await
        .context("selecting asset row")?;
        Ok(row.map(Into::into))
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assets (
                unique_id, asset_id, def_index, paint_index, rarity, quality,
                paint_seed, paint_wear, quest_id, origin, owner_id,
                stickers, keychains, first_seen_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            ON CONFLICT (unique_id) DO UPDATE SET
                asset_id = EXCLUDED.asset_id,
                def_index = EXCLUDED.def_index,
                paint_index = EXCLUDED.paint_index,
                rarity = EXCLUDED.rarity,
                quality = EXCLUDED.quality,
                paint_seed = EXCLUDED.paint_seed,
                paint_wear = EXCLUDED.paint_wear,
                quest_id = EXCLUDED.quest_id,
                origin = EXCLUDED.origin,
                owner_id = EXCLUDED.owner_id,
                stickers = EXCLUDED.stickers,
                keychains = EXCLUDED.keychains,
                updated_at = EXCLUDED.updated_at
        "#,
        )
        .bind(&asset.unique_id)
        .bind(asset.asset_id as i64)
        .bind(asset.def_index as i32)
        .bind(asset.paint_index as i32)
        .bind(asset.rarity as i32)
        .bind(asset.quality as i32)
        .bind(asset.paint_seed.map(|v| v as i32))
        .bind(asset.paint_wear)
        .bind(asset.quest_id.map(|v| v as i32))
        .bind(asset.origin as i32)
        .bind(&asset.owner_id)
        .bind(Json(&asset.stickers))
        .bind(Json(&asset.keychains))
        .bind(asset.first_seen_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await
        .context("upserting asset row")?;
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO asset_history (unique_id, asset_id, event_type, owner_id, created_at)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT DO NOTHING
        "#,
        )
        .bind(&record.unique_id)
        .bind(record.asset_id as i64)
        .bind(serde_json::to_string(&record.event_type).unwrap_or_default())
        .bind(&record.owner_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("inserting history row")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("pinging database")?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    unique_id: String,
    asset_id: i64,
    def_index: i32,
    paint_index: i32,
    rarity: i32,
    quality: i32,
    paint_seed: Option<i32>,
    paint_wear: Option<f64>,
    quest_id: Option<i32>,
    origin: i32,
    owner_id: Option<String>,
    stickers: sqlx::types::Json<Vec<crate::models::Sticker>>,
    keychains: sqlx::types::Json<Vec<crate::models::Keychain>>,
    first_seen_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<AssetRow> for AssetRecord {
    fn from(row: AssetRow) -> Self {
        AssetRecord {
            unique_id: row.unique_id,
            asset_id: row.asset_id as u64,
            def_index: row.def_index as u32,
            paint_index: row.paint_index as u32,
            rarity: row.rarity as u32,
            quality: row.quality as u32,
            paint_seed: row.paint_seed.map(|v| v as u32),
            paint_wear: row.paint_wear,
            quest_id: row.quest_id.map(|v| v as u32),
            origin: row.origin as u32,
            owner_id: row.owner_id,
            stickers: row.stickers.0,
            keychains: row.keychains.0,
            first_seen_at: row.first_seen_at,
            updated_at: row.updated_at,
        }
    }
}

/// In-memory `Store`, used in tests and when `DATABASE_URL` is unset —
/// mirrors `der_headend` running with `db: None` and falling back to
/// in-process state (`AppState.latest`).
pub struct InMemoryStore {
    assets: tokio::sync::RwLock<std::collections::HashMap<String, AssetRecord>>,
    history: tokio::sync::RwLock<Vec<HistoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            assets: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            history: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_asset(&self, unique_id: &str) -> Result<Option<AssetRecord>> {
        Ok(self.assets.read().await.get(unique_id).cloned())
    }

    async fn upsert_asset(&self, asset: &AssetRecord) -> Result<()> {
        self.assets
            .write()
            .await
            .insert(asset.unique_id.clone(), asset.clone());
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        self.history.write().await.push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryEventType;
    use chrono::Utc;

    fn asset(unique_id: &str) -> AssetRecord {
        AssetRecord {
            unique_id: unique_id.to_string(),
            asset_id: 1,
            def_index: 7,
            paint_index: 44,
            rarity: 4,
            quality: 4,
            paint_seed: Some(1),
            paint_wear: Some(0.01),
            quest_id: None,
            origin: 8,
            owner_id: Some("76561198000000000".into()),
            stickers: vec![],
            keychains: vec![],
            first_seen_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_asset() {
        let store = InMemoryStore::new();
        store.upsert_asset(&asset("abc12345")).await.unwrap();
        let found = store.find_asset("abc12345").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().asset_id, 1);
    }

    #[tokio::test]
    async fn in_memory_store_returns_none_for_unknown_id() {
        let store = InMemoryStore::new();
        assert!(store.find_asset("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_appends_history() {
        let store = InMemoryStore::new();
        store
            .append_history(&HistoryRecord {
                unique_id: "abc12345".into(),
                asset_id: 1,
                event_type: HistoryEventType::Unboxed,
                owner_id: Some("p".into()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
}

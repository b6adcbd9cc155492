//! SQLite-backed recipe store

use super::RecipeStore;
use crate::error::{RecipeSyncError, Result};
use crate::types::{
    DeclaredType, RecipeId, RecipeStructureMapping, StoreValue, StructureId, TagValue,
    UnitEndpoint, UnitId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS units (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipe_structure_map (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        structure_id INTEGER NOT NULL,
        unit_id INTEGER NOT NULL REFERENCES units(id),
        tag_origin TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        structure_id INTEGER,
        last_synchronized TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_values (
        recipe_id INTEGER NOT NULL,
        unit_id INTEGER NOT NULL,
        tag_name TEXT NOT NULL,
        tag_value TEXT NOT NULL,
        tag_type TEXT NOT NULL,
        PRIMARY KEY (recipe_id, unit_id, tag_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS active_recipe (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        name TEXT NOT NULL,
        activated_at TEXT NOT NULL
    )
    "#,
];

/// Recipe store over a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool and create missing tables
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Connect to a database URL such as `sqlite://recipes.db?mode=rwc`
    pub async fn connect(url: &str) -> Result<Self> {
        // Every connection to :memory: is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| RecipeSyncError::Store(format!("Failed to connect to {}: {}", url, e)))?;
        tracing::debug!("Opened recipe store {}", url);
        Self::new(pool).await
    }

    /// Open or create a database file
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register or update a unit
    pub async fn add_unit(&self, id: UnitId, name: &str, address: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO units (id, name, address) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, address = excluded.address
            "#,
        )
        .bind(id as i64)
        .bind(name)
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Map a registered unit into a recipe structure
    pub async fn map_structure(
        &self,
        structure_id: StructureId,
        unit_id: UnitId,
        tag_origin: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipe_structure_map (structure_id, unit_id, tag_origin) VALUES (?, ?, ?)",
        )
        .bind(structure_id)
        .bind(unit_id as i64)
        .bind(tag_origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create an empty recipe and return its id
    pub async fn create_recipe(&self, name: &str, structure_id: Option<StructureId>) -> Result<RecipeId> {
        let result = sqlx::query("INSERT INTO recipes (name, structure_id) VALUES (?, ?)")
            .bind(name)
            .bind(structure_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn synchronized_at(&self, recipe_id: RecipeId) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_synchronized FROM recipes WHERE id = ?")
            .bind(recipe_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<DateTime<Utc>>, _>("last_synchronized")?),
            None => Ok(None),
        }
    }

    pub async fn active_recipe(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT name FROM active_recipe WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("name")?)),
            None => Ok(None),
        }
    }
}

fn unit_id(row: &SqliteRow, column: &str) -> Result<UnitId> {
    let raw: i64 = row.try_get(column)?;
    UnitId::try_from(raw)
        .map_err(|_| RecipeSyncError::Store(format!("unit id {} out of range", raw)))
}

#[async_trait]
impl RecipeStore for SqliteStore {
    async fn recipe_structure_map(&self) -> Result<Vec<RecipeStructureMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT m.unit_id, u.name AS unit_name, m.structure_id, m.tag_origin, u.address
            FROM recipe_structure_map m
            JOIN units u ON u.id = m.unit_id
            ORDER BY m.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RecipeStructureMapping> {
                Ok(RecipeStructureMapping {
                    unit_id: unit_id(row, "unit_id")?,
                    unit_name: row.try_get("unit_name")?,
                    structure_id: row.try_get("structure_id")?,
                    tag_origin: row.try_get("tag_origin")?,
                    address: row.try_get("address")?,
                })
            })
            .collect()
    }

    async fn units(&self) -> Result<Vec<UnitEndpoint>> {
        let rows = sqlx::query("SELECT id, address FROM units ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<UnitEndpoint> {
                Ok(UnitEndpoint {
                    id: unit_id(row, "id")?,
                    address: row.try_get("address")?,
                })
            })
            .collect()
    }

    async fn upsert_tag_values(&self, rows: &[TagValue]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO tag_values (recipe_id, unit_id, tag_name, tag_value, tag_type)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(recipe_id, unit_id, tag_name)
                DO UPDATE SET tag_value = excluded.tag_value, tag_type = excluded.tag_type
                "#,
            )
            .bind(row.recipe_id)
            .bind(row.unit_id as i64)
            .bind(&row.tag_name)
            .bind(row.value.to_string())
            .bind(row.declared.name())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::debug!("Committed {} tag values", rows.len());
        Ok(())
    }

    async fn tag_values(&self, recipe_id: RecipeId) -> Result<Vec<TagValue>> {
        let rows = sqlx::query(
            r#"
            SELECT unit_id, tag_name, tag_value, tag_type
            FROM tag_values
            WHERE recipe_id = ?
            ORDER BY unit_id, rowid
            "#,
        )
        .bind(recipe_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TagValue> {
                let tag_type: String = row.try_get("tag_type")?;
                let declared = tag_type
                    .parse::<DeclaredType>()
                    .map_err(RecipeSyncError::Store)?;
                Ok(TagValue {
                    recipe_id,
                    unit_id: unit_id(row, "unit_id")?,
                    tag_name: row.try_get("tag_name")?,
                    value: StoreValue::Text(row.try_get("tag_value")?),
                    declared,
                })
            })
            .collect()
    }

    async fn mark_recipe_synchronized(&self, recipe_id: RecipeId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE recipes SET last_synchronized = ? WHERE id = ?")
            .bind(at)
            .bind(recipe_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!("Recipe {} not found, synchronization time not recorded", recipe_id);
        }
        Ok(())
    }

    async fn set_active_recipe(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO active_recipe (id, name, activated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, activated_at = excluded.activated_at
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn row(recipe_id: RecipeId, unit_id: UnitId, tag: &str, value: StoreValue) -> TagValue {
        TagValue {
            recipe_id,
            unit_id,
            tag_name: tag.to_string(),
            value,
            declared: DeclaredType::Float,
        }
    }

    #[tokio::test]
    async fn test_structure_map_joins_units() {
        let store = memory_store().await;
        store.add_unit(1, "Oven", "opc.tcp://10.0.0.11:4840").await.unwrap();
        store.add_unit(3, "Master", "opc.tcp://10.0.0.13:4840").await.unwrap();
        store.map_structure(7, 1, "ns=3;s=\"A\"").await.unwrap();
        store.map_structure(7, 3, "ns=3;s=\"B\"").await.unwrap();

        let map = store.recipe_structure_map().await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].unit_name, "Oven");
        assert_eq!(map[1].address, "opc.tcp://10.0.0.13:4840");
        assert_eq!(store.units().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let store = memory_store().await;
        let recipe = store.create_recipe("Bread", Some(7)).await.unwrap();
        store
            .upsert_tag_values(&[
                row(recipe, 1, "\"A\"[1].\"Speed\"", StoreValue::Float(1.5)),
                row(recipe, 1, "\"A\"[2].\"Speed\"", StoreValue::text("2.5")),
            ])
            .await
            .unwrap();
        store
            .upsert_tag_values(&[row(recipe, 1, "\"A\"[1].\"Speed\"", StoreValue::text("9"))])
            .await
            .unwrap();

        let rows = store.tag_values(recipe).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, StoreValue::text("9"));
        assert_eq!(rows[1].value, StoreValue::text("2.5"));
        assert_eq!(rows[1].declared, DeclaredType::Float);
    }

    #[tokio::test]
    async fn test_synchronized_timestamp() {
        let store = memory_store().await;
        let recipe = store.create_recipe("Bread", None).await.unwrap();
        assert!(store.synchronized_at(recipe).await.unwrap().is_none());

        let at = Utc::now();
        store.mark_recipe_synchronized(recipe, at).await.unwrap();
        let stored = store.synchronized_at(recipe).await.unwrap().unwrap();
        assert_eq!(stored.timestamp(), at.timestamp());

        // Unknown recipes are tolerated
        store.mark_recipe_synchronized(recipe + 100, at).await.unwrap();
    }

    #[tokio::test]
    async fn test_active_recipe_replaced() {
        let store = memory_store().await;
        assert!(store.active_recipe().await.unwrap().is_none());
        store.set_active_recipe("Bread").await.unwrap();
        store.set_active_recipe("Rolls").await.unwrap();
        assert_eq!(store.active_recipe().await.unwrap().as_deref(), Some("Rolls"));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("recipes.db");

        {
            let store = SqliteStore::from_path(&path).await.unwrap();
            store.add_unit(1, "Oven", "opc.tcp://a").await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::from_path(&path).await.unwrap();
        assert_eq!(store.units().await.unwrap().len(), 1);
    }
}

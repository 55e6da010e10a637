//! SQLite-backed item store.
//!
//! One row per item. Stage flags are plain columns so eligibility queries
//! stay simple equality/existence filters; list fields are JSON text.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{CreateOutcome, ItemStore};
use crate::error::StoreError;
use crate::item::{Item, NewItem, Stage, StageFlag, StageFlags, StagePredicate, StageUpdate};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id              TEXT    NOT NULL PRIMARY KEY,
    source_link     TEXT    NOT NULL UNIQUE,
    source          TEXT,
    title           TEXT    NOT NULL,
    body            TEXT    NOT NULL,
    posted_date     TEXT,
    scraped_at      TEXT    NOT NULL,

    -- Generated content
    derived_title   TEXT,
    derived_text    TEXT,
    hashtags        TEXT    NOT NULL DEFAULT '[]',
    image_prompts   TEXT    NOT NULL DEFAULT '[]',
    media_refs      TEXT    NOT NULL DEFAULT '[]',
    audio_ref       TEXT,
    video_ref       TEXT,

    -- Stage flags
    scraped_done    INTEGER NOT NULL DEFAULT 0,
    scraped_error   TEXT,
    scraped_held    INTEGER NOT NULL DEFAULT 0,
    scraped_at_flag TEXT,
    prompts_done    INTEGER NOT NULL DEFAULT 0,
    prompts_error   TEXT,
    prompts_held    INTEGER NOT NULL DEFAULT 0,
    prompts_at      TEXT,
    images_done     INTEGER NOT NULL DEFAULT 0,
    images_error    TEXT,
    images_held     INTEGER NOT NULL DEFAULT 0,
    images_at       TEXT,
    audio_done      INTEGER NOT NULL DEFAULT 0,
    audio_error     TEXT,
    audio_held      INTEGER NOT NULL DEFAULT 0,
    audio_at        TEXT,
    video_done      INTEGER NOT NULL DEFAULT 0,
    video_error     TEXT,
    video_held      INTEGER NOT NULL DEFAULT 0,
    video_at        TEXT,
    published_done  INTEGER NOT NULL DEFAULT 0,
    published_error TEXT,
    published_held  INTEGER NOT NULL DEFAULT 0,
    published_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_prompts ON items(prompts_done);
CREATE INDEX IF NOT EXISTS idx_items_images ON items(images_done);
CREATE INDEX IF NOT EXISTS idx_items_audio ON items(audio_done);
CREATE INDEX IF NOT EXISTS idx_items_video ON items(video_done);
CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_done);
"#;

/// Column prefix of each stage's flag columns.
fn flag_prefix(stage: Stage) -> &'static str {
    match stage {
        Stage::Scraped => "scraped",
        Stage::PromptsReady => "prompts",
        Stage::ImagesReady => "images",
        Stage::AudioReady => "audio",
        Stage::VideoReady => "video",
        Stage::Published => "published",
    }
}

/// Timestamp column of a stage flag; `scraped_at` is taken by the item itself.
fn flag_at_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Scraped => "scraped_at_flag",
        Stage::PromptsReady => "prompts_at",
        Stage::ImagesReady => "images_at",
        Stage::AudioReady => "audio_at",
        Stage::VideoReady => "video_at",
        Stage::Published => "published_at",
    }
}

/// WHERE clause selecting items eligible for `predicate`.
fn predicate_sql(predicate: StagePredicate) -> &'static str {
    match predicate {
        StagePredicate::NeedsPrompts => {
            "scraped_done = 1 AND prompts_done = 0 AND prompts_held = 0"
        }
        StagePredicate::NeedsImages => {
            "prompts_done = 1 AND images_done = 0 AND images_held = 0 AND image_prompts != '[]'"
        }
        StagePredicate::NeedsAudio => {
            "images_done = 1 AND audio_done = 0 AND audio_held = 0 \
             AND TRIM(COALESCE(derived_text, body)) != ''"
        }
        StagePredicate::NeedsVideo => {
            "audio_done = 1 AND video_done = 0 AND video_held = 0 \
             AND media_refs != '[]' AND audio_ref IS NOT NULL"
        }
        StagePredicate::NeedsPublish => {
            "video_done = 1 AND published_done = 0 AND published_held = 0 \
             AND video_ref IS NOT NULL"
        }
    }
}

/// Persistent store on a local SQLite database.
#[derive(Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };
        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self::from_pool(pool).await?;
        tracing::info!(path = path, "Item store opened");
        Ok(store)
    }

    /// Wrap an existing pool, applying the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_item(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        item: &Item,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE items SET
                derived_title = ?2, derived_text = ?3, hashtags = ?4,
                image_prompts = ?5, media_refs = ?6, audio_ref = ?7, video_ref = ?8
             WHERE id = ?1",
        )
        .bind(item.id.to_string())
        .bind(&item.derived_title)
        .bind(&item.derived_text)
        .bind(serde_json::to_string(&item.hashtags)?)
        .bind(serde_json::to_string(&item.image_prompts)?)
        .bind(serde_json::to_string(&item.media_refs)?)
        .bind(&item.audio_ref)
        .bind(&item.video_ref)
        .execute(&mut **tx)
        .await?;

        for stage in Stage::ALL {
            let prefix = flag_prefix(stage);
            let flag = item.flags.get(stage);
            let sql = format!(
                "UPDATE items SET {p}_done = ?2, {p}_error = ?3, {p}_held = ?4, {at} = ?5 WHERE id = ?1",
                p = prefix,
                at = flag_at_column(stage)
            );
            sqlx::query(&sql)
                .bind(item.id.to_string())
                .bind(flag.done as i32)
                .bind(&flag.last_error)
                .bind(flag.held as i32)
                .bind(flag.updated_at)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

fn json_list(row: &SqliteRow, column: &str) -> Result<Vec<String>, StoreError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_flag(row: &SqliteRow, stage: Stage) -> Result<StageFlag, StoreError> {
    let prefix = flag_prefix(stage);
    Ok(StageFlag {
        done: row.try_get::<i32, _>(format!("{}_done", prefix).as_str())? != 0,
        last_error: row.try_get(format!("{}_error", prefix).as_str())?,
        held: row.try_get::<i32, _>(format!("{}_held", prefix).as_str())? != 0,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>(flag_at_column(stage))?,
    })
}

fn row_to_item(row: &SqliteRow) -> Result<Item, StoreError> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::InvalidRow(format!("id {}: {}", id, e)))?;

    Ok(Item {
        id,
        source_link: row.try_get("source_link")?,
        source: row.try_get("source")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        posted_date: row.try_get("posted_date")?,
        scraped_at: row.try_get("scraped_at")?,
        derived_title: row.try_get("derived_title")?,
        derived_text: row.try_get("derived_text")?,
        hashtags: json_list(row, "hashtags")?,
        image_prompts: json_list(row, "image_prompts")?,
        media_refs: json_list(row, "media_refs")?,
        audio_ref: row.try_get("audio_ref")?,
        video_ref: row.try_get("video_ref")?,
        flags: StageFlags {
            scraped: read_flag(row, Stage::Scraped)?,
            prompts_ready: read_flag(row, Stage::PromptsReady)?,
            image_done: read_flag(row, Stage::ImagesReady)?,
            audio_done: read_flag(row, Stage::AudioReady)?,
            video_done: read_flag(row, Stage::VideoReady)?,
            published: read_flag(row, Stage::Published)?,
        },
    })
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn find_by_stage_predicate(
        &self,
        predicate: StagePredicate,
    ) -> Result<Vec<Item>, StoreError> {
        let sql = format!(
            "SELECT * FROM items WHERE {} ORDER BY rowid",
            predicate_sql(predicate)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let item = row_to_item(row)?;
            if predicate.matches(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn create_if_absent(&self, item: NewItem) -> Result<CreateOutcome, StoreError> {
        let item = Item::scraped(item, Utc::now());
        let result = sqlx::query(
            "INSERT INTO items (
                id, source_link, source, title, body, posted_date, scraped_at,
                scraped_done, scraped_at_flag
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?7)
            ON CONFLICT(source_link) DO NOTHING",
        )
        .bind(item.id.to_string())
        .bind(&item.source_link)
        .bind(&item.source)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.posted_date)
        .bind(item.scraped_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CreateOutcome {
                created: true,
                id: item.id,
            });
        }

        let row = sqlx::query("SELECT id FROM items WHERE source_link = ?1")
            .bind(&item.source_link)
            .fetch_one(&self.pool)
            .await?;
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(CreateOutcome { created: false, id })
    }

    async fn update_stage(
        &self,
        id: Uuid,
        stage: Stage,
        update: StageUpdate,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM items WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        let mut item = row_to_item(&row)?;
        item.apply(stage, update, Utc::now())?;
        self.write_item(&mut tx, &item).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT * FROM items WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn list(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query("SELECT * FROM items ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }
}

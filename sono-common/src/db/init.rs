//! Database initialization
//!
//! Creates the database on first run and brings the schema up idempotently
//! (`CREATE TABLE IF NOT EXISTS`), so it is safe to call on every startup.

use crate::models::TaxonomyLevel;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version
///
/// **IMPORTANT:** Increment this when the schema changes
pub const SCHEMA_VERSION: i64 = 1;

/// SQL expression for the store's clock (RFC 3339, millisecond precision)
///
/// Every `submitted_at` / `created_at` / `updated_at` comes from here so that
/// timestamps are taken from the data store, not the caller.
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Foreign keys are a per-connection setting, so they go on the connect
    // options rather than a one-off PRAGMA against the pool.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Single connection: every connection to `:memory:` is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;

    // Foreign-key anchors owned by the upload/registration services
    create_users_table(pool).await?;
    create_studies_table(pool).await?;
    create_clips_table(pool).await?;

    // Taxonomy
    create_protocols_table(pool).await?;
    for level in TaxonomyLevel::ALL.into_iter().skip(1) {
        create_taxonomy_level_table(pool, level).await?;
    }

    // Scoring template
    create_scoring_sections_table(pool).await?;
    create_scoring_items_table(pool).await?;

    // Selections and evaluation ledger
    create_selections_table(pool).await?;
    create_evaluation_attempts_table(pool).await?;
    create_evaluation_responses_table(pool).await?;
    create_evaluation_forms_table(pool).await?;

    record_schema_version(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn record_schema_version(pool: &SqlitePool) -> Result<()> {
    let result = sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!("Database schema initialized at v{}", SCHEMA_VERSION);
    }

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student'
                CHECK (role IN ('student', 'teacher', 'admin')),
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_studies_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS studies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL REFERENCES users(id),
            title TEXT,
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_clips_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS clips (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            study_id INTEGER NOT NULL REFERENCES studies(id),
            title TEXT,
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_clips_study ON clips(study_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_protocols_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS protocols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// One table per non-root level, keyed unique within the parent
async fn create_taxonomy_level_table(pool: &SqlitePool, level: TaxonomyLevel) -> Result<()> {
    let (Some(parent), Some(parent_column)) = (level.parent(), level.parent_column()) else {
        return Ok(());
    };

    let table = level.table();
    let parent_table = parent.table();

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {parent_column} INTEGER NOT NULL REFERENCES {parent_table}(id),
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW}),
            UNIQUE ({parent_column}, key)
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scoring_sections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoring_sections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            protocol_id INTEGER NOT NULL REFERENCES protocols(id),
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            UNIQUE (protocol_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scoring_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoring_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            section_id INTEGER NOT NULL REFERENCES scoring_sections(id),
            key TEXT NOT NULL,
            label TEXT NOT NULL,
            max_score REAL NOT NULL CHECK (max_score > 0),
            score_scale TEXT,
            UNIQUE (section_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_selections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS selections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            clip_id INTEGER NOT NULL REFERENCES clips(id),
            user_id INTEGER NOT NULL REFERENCES users(id),
            protocol_id INTEGER NOT NULL REFERENCES protocols(id),
            window_id INTEGER NOT NULL REFERENCES windows(id),
            finding_id INTEGER NOT NULL REFERENCES findings(id),
            possible_diagnosis_id INTEGER NOT NULL REFERENCES possible_diagnoses(id),
            subdiagnosis_id INTEGER REFERENCES subdiagnoses(id),
            sub_subdiagnosis_id INTEGER REFERENCES sub_subdiagnoses(id),
            third_order_id INTEGER REFERENCES third_order_diagnoses(id),
            created_at TEXT NOT NULL DEFAULT ({SQL_NOW}),
            updated_at TEXT NOT NULL DEFAULT ({SQL_NOW}),
            UNIQUE (clip_id, user_id)
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_evaluation_attempts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS evaluation_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            clip_id INTEGER NOT NULL REFERENCES clips(id),
            teacher_id INTEGER NOT NULL REFERENCES users(id),
            comment TEXT,
            submitted_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attempts_clip ON evaluation_attempts(clip_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_evaluation_responses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS evaluation_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attempt_id INTEGER NOT NULL REFERENCES evaluation_attempts(id) ON DELETE CASCADE,
            protocol_item_id INTEGER NOT NULL REFERENCES scoring_items(id),
            score REAL NOT NULL,
            updated_at TEXT NOT NULL DEFAULT ({SQL_NOW}),
            UNIQUE (attempt_id, protocol_item_id)
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_evaluation_forms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS evaluation_forms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            study_id INTEGER NOT NULL REFERENCES studies(id),
            teacher_id INTEGER NOT NULL REFERENCES users(id),
            score REAL,
            feedback_summary TEXT,
            submitted_at TEXT NOT NULL DEFAULT ({SQL_NOW})
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_forms_study ON evaluation_forms(study_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_forms_teacher ON evaluation_forms(teacher_id, study_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

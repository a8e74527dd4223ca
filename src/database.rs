use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::reporter::UsageRecord;
use crate::routes::UsageQueryParams;

const DATABASE_NAME: &str = "coderun.sqlite3";

pub const DEFAULT_QUERY_LIMIT: u32 = 50;
pub const MAX_QUERY_LIMIT: u32 = 500;

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "coderun").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS executions (
            id                      INTEGER  PRIMARY KEY AUTOINCREMENT,
            created_time            TEXT     NOT NULL,
            caller                  TEXT     NOT NULL,
            language                TEXT     NOT NULL,
            code_excerpt            TEXT     NOT NULL,
            success                 INTEGER  NOT NULL,
            outcome                 TEXT     NOT NULL,
            execution_time_seconds  REAL     NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_executions_caller ON executions(caller);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Stores one usage record and returns its row id
pub async fn save_usage(record: &UsageRecord, pool: Arc<SqlitePool>) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO executions (created_time, caller, language, code_excerpt, success, outcome, execution_time_seconds)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.created_time)
    .bind(&record.caller)
    .bind(&record.language)
    .bind(&record.code_excerpt)
    .bind(record.success)
    .bind(&record.outcome)
    .bind(record.execution_time_seconds)
    .execute(pool.as_ref())
    .await?;

    log::debug!("Saved usage record {}", result.last_insert_rowid());
    Ok(result.last_insert_rowid())
}

/// Fetches usage records matching the query, newest first
pub async fn fetch_usage_by_query(
    query: &UsageQueryParams,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Vec<UsageRecord>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT caller, language, code_excerpt, success, outcome, execution_time_seconds, created_time \
         FROM executions WHERE 1=1",
    );

    if let Some(caller) = &query.caller {
        qb.push(" AND caller = ").push_bind(caller.clone());
    }
    if let Some(language) = &query.language {
        qb.push(" AND language = ").push_bind(language.to_lowercase());
    }
    if let Some(success) = query.success {
        qb.push(" AND success = ").push_bind(success);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);
    qb.push(" ORDER BY id DESC LIMIT ").push_bind(limit as i64);

    qb.build_query_as::<UsageRecord>()
        .fetch_all(pool.as_ref())
        .await
}

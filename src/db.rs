use std::path::Path;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};

pub type Database = SqlitePool;

const CREATE_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS processed_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    image_blob BLOB,
    keypoints_blob BLOB
)";

/// 打开（必要时创建）结果数据库
pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, sqlx::Error> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .filename(filename)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;

    Ok(pool)
}

/// 插入一条处理结果，图片和特征点均以 BLOB 原样保存
pub async fn insert_result(
    pool: &Database,
    filename: &str,
    image: &[u8],
    keypoints: &[u8],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO processed_images (filename, image_blob, keypoints_blob) VALUES (?, ?, ?)",
    )
    .bind(filename)
    .bind(image)
    .bind(keypoints)
    .execute(pool)
    .await?;
    Ok(())
}

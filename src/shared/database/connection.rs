use crate::shared::errors::{AppError, AppResult};
use rusqlite::Connection;
use std::path::Path;

/// データベース接続を初期化し、マイグレーションを実行する
///
/// # 引数
/// * `database_path` - データベースファイルパス
///
/// # 戻り値
/// データベース接続、または失敗時はエラー
///
/// # 処理内容
/// 1. データベースディレクトリの確保
/// 2. データベース接続の開設
/// 3. テーブル作成とマイグレーションの実行
pub fn initialize_database(database_path: &Path) -> AppResult<Connection> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = database_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::configuration(format!("データディレクトリの作成に失敗: {e}"))
            })?;
            log::info!("データディレクトリを作成: {:?}", parent);
        }
    }

    // データベース接続を開く
    let conn = Connection::open(database_path)?;

    // 書き込み競合に備えてbusy_timeoutを設定
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // テーブルを作成
    run_migrations(&conn)?;

    log::info!("データベースを初期化しました: {:?}", database_path);

    Ok(conn)
}

/// すべてのデータベースマイグレーションを実行する
///
/// # 引数
/// * `conn` - データベース接続
///
/// # 戻り値
/// 成功時はOk(())、失敗時はエラー
pub fn run_migrations(conn: &Connection) -> AppResult<()> {
    // サブスクリプションテーブルを作成
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            cadence TEXT NOT NULL CHECK(cadence IN ('daily', 'weekly', 'monthly', 'yearly')),
            start_date TEXT NOT NULL,
            next_run_at TEXT NOT NULL,
            last_run_at TEXT,
            notification_offset_days INTEGER NOT NULL DEFAULT 1,
            last_reminder_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            expense_category_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // 定期スキャン用のインデックスを作成
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_due
         ON subscriptions(is_active, next_run_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_owner
         ON subscriptions(owner_id)",
        [],
    )?;

    Ok(())
}

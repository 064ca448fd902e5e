/// 共有エラー型とエラーハンドリング
pub mod errors;

/// 共有データベース接続管理
pub mod database;

/// 共有設定管理
pub mod config;

/// 構造化ログと相関コンテキスト
pub mod logging;

// 便利な再エクスポート
pub use config::{get_environment, Environment, EnvironmentConfig, ServiceConfig};
pub use database::{initialize_database, run_migrations};
pub use errors::{AppError, AppResult, ErrorSeverity};
pub use logging::{CorrelationContext, EventSink, LogLevel, StructuredLogEntry};

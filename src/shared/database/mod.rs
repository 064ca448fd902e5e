/// データベース接続とマイグレーション
pub mod connection;

pub use connection::{initialize_database, run_migrations};

/// 環境設定とサービス設定
pub mod environment;

pub use environment::{get_environment, Environment, EnvironmentConfig, ServiceConfig};

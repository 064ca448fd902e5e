/// 機能モジュール
pub mod billing;
pub mod subscriptions;

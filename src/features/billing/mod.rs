/// 課金サイクル処理エンジン
///
/// このモジュールは、期日到来サブスクリプションの定期処理を提供します：
/// - 課金サイクルの日付計算（純粋関数）
/// - リマインダー送信判定（純粋関数）
/// - 外部コラボレータ（Expense / Notification）クライアント
/// - サイクルプロセッサ（アイテム単位の処理と失敗の閉じ込め）
/// - バッチオーケストレータ（固定間隔・非重複のスキャン駆動）
pub mod clients;
pub mod cycle;
pub mod errors;
pub mod processor;
pub mod reminder;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

// 公開インターフェース
pub use clients::{
    ExpenseClient, HttpExpenseClient, HttpNotificationClient, NotificationClient,
};
pub use errors::ProcessingError;
pub use processor::CycleProcessor;
pub use scheduler::{BatchOrchestrator, BatchSummary};

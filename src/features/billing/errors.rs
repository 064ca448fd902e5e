//! 課金サイクル処理専用のエラー型
//!
//! アイテム単位で捕捉され、バッチ全体を停止させないエラーの分類を
//! 提供します。

use crate::shared::errors::{AppError, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// サイクル処理のエラー型
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ProcessingError {
    /// 経費作成の外部呼び出し失敗（次回スキャンで再試行、状態変更なし）
    #[error("経費作成の送信に失敗しました (subscription={subscription_id}): {detail}")]
    ExpenseDispatchFailed {
        subscription_id: String,
        detail: String,
    },

    /// リマインダー送信の失敗（警告のみ、サイクルは続行）
    #[error("リマインダー送信に失敗しました (subscription={subscription_id}): {detail}")]
    ReminderDispatchFailed {
        subscription_id: String,
        detail: String,
    },

    /// スキャンから処理までの間にレコードが消失（処理済みとしてスキップ）
    #[error("サブスクリプションが消失しました (subscription={subscription_id})")]
    SubscriptionVanished { subscription_id: String },

    /// 課金成功後の永続化失敗（二重課金リスクがあるため最重要で報告）
    #[error("課金後の永続化に失敗しました (subscription={subscription_id}): {detail}")]
    PersistFailed {
        subscription_id: String,
        detail: String,
    },
}

impl ProcessingError {
    /// 対象のサブスクリプションIDを取得
    pub fn subscription_id(&self) -> &str {
        match self {
            ProcessingError::ExpenseDispatchFailed {
                subscription_id, ..
            }
            | ProcessingError::ReminderDispatchFailed {
                subscription_id, ..
            }
            | ProcessingError::SubscriptionVanished { subscription_id }
            | ProcessingError::PersistFailed {
                subscription_id, ..
            } => subscription_id,
        }
    }

    /// エラーの重要度を取得
    ///
    /// # 戻り値
    /// エラーの重要度レベル
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ProcessingError::ExpenseDispatchFailed { .. } => ErrorSeverity::Medium,
            ProcessingError::ReminderDispatchFailed { .. } => ErrorSeverity::Low,
            ProcessingError::SubscriptionVanished { .. } => ErrorSeverity::Low,
            ProcessingError::PersistFailed { .. } => ErrorSeverity::Critical,
        }
    }

    /// 次回スキャンで同じ期日が再試行されるエラーか
    pub fn is_retried_by_next_scan(&self) -> bool {
        matches!(self, ProcessingError::ExpenseDispatchFailed { .. })
    }
}

/// ProcessingErrorからAppErrorへの変換（手動トリガの呼び出し元への返却用）
impl From<ProcessingError> for AppError {
    fn from(error: ProcessingError) -> Self {
        match &error {
            ProcessingError::SubscriptionVanished { subscription_id } => AppError::NotFound(
                format!("ID {subscription_id} のサブスクリプションが見つかりません"),
            ),
            ProcessingError::PersistFailed { detail, .. } => AppError::Database(detail.clone()),
            _ => AppError::ExternalService(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense_failed() -> ProcessingError {
        ProcessingError::ExpenseDispatchFailed {
            subscription_id: "sub-1".to_string(),
            detail: "接続失敗".to_string(),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(expense_failed().severity(), ErrorSeverity::Medium);
        assert_eq!(
            ProcessingError::ReminderDispatchFailed {
                subscription_id: "sub-1".to_string(),
                detail: "timeout".to_string(),
            }
            .severity(),
            ErrorSeverity::Low
        );
        assert_eq!(
            ProcessingError::PersistFailed {
                subscription_id: "sub-1".to_string(),
                detail: "disk full".to_string(),
            }
            .severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_retry_classification() {
        // 経費送信失敗のみが次回スキャンで再試行される
        assert!(expense_failed().is_retried_by_next_scan());
        assert!(!ProcessingError::SubscriptionVanished {
            subscription_id: "sub-1".to_string(),
        }
        .is_retried_by_next_scan());
    }

    #[test]
    fn test_subscription_id_accessor() {
        assert_eq!(expense_failed().subscription_id(), "sub-1");
    }

    #[test]
    fn test_vanished_converts_to_not_found() {
        let app_error: AppError = ProcessingError::SubscriptionVanished {
            subscription_id: "sub-9".to_string(),
        }
        .into();
        assert!(matches!(app_error, AppError::NotFound(_)));
    }
}

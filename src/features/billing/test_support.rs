//! 課金エンジンテスト用のスタブクライアント

use super::clients::{ExpenseClient, NotificationClient};
use crate::features::subscriptions::models::Subscription;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::logging::CorrelationContext;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// 呼び出しを記録し、指定した名前のサブスクリプションで失敗する経費クライアント
#[derive(Clone, Default)]
pub(crate) struct StubExpenseClient {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_for: Option<String>,
}

impl ExpenseClient for StubExpenseClient {
    async fn create_expense(&self, _ctx: &CorrelationContext, sub: &Subscription) -> AppResult<()> {
        self.calls.lock().unwrap().push(sub.name.clone());
        if self.fail_for.as_deref() == Some(sub.name.as_str()) {
            return Err(AppError::external_service(
                "Expense".to_string(),
                "接続失敗".to_string(),
            ));
        }
        Ok(())
    }
}

/// 呼び出しを記録するリマインダークライアント
#[derive(Clone)]
pub(crate) struct StubNotificationClient {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub target: bool,
    pub fail: bool,
}

impl Default for StubNotificationClient {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            target: true,
            fail: false,
        }
    }
}

impl NotificationClient for StubNotificationClient {
    fn has_target(&self) -> bool {
        self.target
    }

    async fn send_reminder(
        &self,
        _ctx: &CorrelationContext,
        sub: &Subscription,
        _send_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.calls.lock().unwrap().push(sub.name.clone());
        if self.fail {
            return Err(AppError::external_service(
                "Notification".to_string(),
                "タイムアウト".to_string(),
            ));
        }
        Ok(())
    }
}

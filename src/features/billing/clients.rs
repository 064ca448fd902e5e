//! 外部コラボレータ（Expense / Notification サービス）クライアント
//!
//! サイクルプロセッサは具象実装ではなくトレイト経由でクライアントを
//! 受け取ります。HTTP実装はベースURL未設定の環境（開発時）を許容し、
//! その場合の振る舞いは各メソッドのドキュメントの通りです。

use crate::features::subscriptions::models::Subscription;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::logging::CorrelationContext;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 経費作成リクエスト（Expenseサービスのペイロード）
#[derive(Debug, Serialize)]
pub struct ExpenseRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub items: Vec<ExpenseItem>,
}

/// 経費明細行
#[derive(Debug, Serialize)]
pub struct ExpenseItem {
    pub item_id: String,
    pub item_name: String,
    pub item_price: f64,
    pub item_quantity: u32,
}

impl ExpenseRequest {
    /// サブスクリプションから課金1件分のリクエストを組み立てる
    pub fn from_subscription(sub: &Subscription) -> Self {
        Self {
            description: format!("Subscription payment: {}", sub.name),
            category_id: sub.expense_category_id.clone(),
            items: vec![ExpenseItem {
                item_id: sub.id.clone(),
                item_name: sub.name.clone(),
                item_price: sub.amount,
                item_quantity: 1,
            }],
        }
    }
}

/// リマインダー送信リクエスト（Notificationサービスのペイロード）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub send_at: String,
    pub meta: ReminderMeta,
}

/// リマインダーのメタ情報
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderMeta {
    pub subscription_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ReminderRequest {
    /// サブスクリプションからリマインダーリクエストを組み立てる
    pub fn from_subscription(sub: &Subscription, send_at: DateTime<Utc>) -> Self {
        Self {
            user_id: sub.owner_id.clone(),
            title: format!("サブスクリプションのリマインダー: {}", sub.name),
            body: format!(
                "{}日後に {} {} が課金されます。",
                sub.notification_offset_days, sub.amount, sub.currency
            ),
            send_at: send_at.to_rfc3339(),
            meta: ReminderMeta {
                subscription_id: sub.id.clone(),
                kind: "subscription-reminder".to_string(),
            },
        }
    }
}

/// 経費作成コラボレータ
#[allow(async_fn_in_trait)]
pub trait ExpenseClient {
    /// 課金1件分の経費レコードを作成する
    ///
    /// エラーでない応答を受け取った時点で成功とみなします。
    async fn create_expense(&self, ctx: &CorrelationContext, sub: &Subscription) -> AppResult<()>;
}

/// リマインダー送信コラボレータ
#[allow(async_fn_in_trait)]
pub trait NotificationClient {
    /// 通知先が設定されているか
    fn has_target(&self) -> bool;

    /// リマインダーを送信する（ベストエフォート）
    async fn send_reminder(
        &self,
        ctx: &CorrelationContext,
        sub: &Subscription,
        send_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

/// ExpenseサービスへのHTTPクライアント
#[derive(Debug, Clone)]
pub struct HttpExpenseClient {
    base_url: Option<String>,
    http_client: reqwest::Client,
}

impl HttpExpenseClient {
    /// 新しいHTTPクライアントを作成する
    ///
    /// # 引数
    /// * `base_url` - ExpenseサービスのベースURL（未設定可）
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            http_client: reqwest::Client::new(),
        }
    }
}

impl ExpenseClient for HttpExpenseClient {
    /// 経費レコードを作成する
    ///
    /// ベースURL未設定の場合は送信をスキップして成功扱いにします
    /// （開発環境向け。プロダクションでは設定検証が未設定を拒否する）。
    async fn create_expense(&self, ctx: &CorrelationContext, sub: &Subscription) -> AppResult<()> {
        let Some(base_url) = &self.base_url else {
            log::debug!(
                "EXPENSE_SERVICE_URL未設定のため経費作成をスキップします: subscription={}",
                sub.id
            );
            return Ok(());
        };

        let payload = ExpenseRequest::from_subscription(sub);
        let response = self
            .http_client
            .post(format!("{base_url}/expenses"))
            .header("x-correlation-id", &ctx.correlation_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::external_service("Expense".to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                "Expense".to_string(),
                format!("経費作成が失敗しました: HTTP {}", response.status()),
            ));
        }

        Ok(())
    }
}

/// NotificationサービスへのHTTPクライアント
#[derive(Debug, Clone)]
pub struct HttpNotificationClient {
    base_url: Option<String>,
    http_client: reqwest::Client,
}

impl HttpNotificationClient {
    /// 新しいHTTPクライアントを作成する
    ///
    /// # 引数
    /// * `base_url` - NotificationサービスのベースURL（未設定可）
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            http_client: reqwest::Client::new(),
        }
    }
}

impl NotificationClient for HttpNotificationClient {
    fn has_target(&self) -> bool {
        self.base_url.is_some()
    }

    async fn send_reminder(
        &self,
        ctx: &CorrelationContext,
        sub: &Subscription,
        send_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let Some(base_url) = &self.base_url else {
            // has_target()がfalseのためリマインダー判定段階で到達しない
            return Ok(());
        };

        let payload = ReminderRequest::from_subscription(sub, send_at);
        let response = self
            .http_client
            .post(format!("{base_url}/notifications"))
            .header("x-correlation-id", &ctx.correlation_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::external_service("Notification".to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                "Notification".to_string(),
                format!("リマインダー送信が失敗しました: HTTP {}", response.status()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::models::Cadence;
    use chrono::TimeZone;

    fn subscription() -> Subscription {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Subscription {
            id: "sub-1".to_string(),
            owner_id: "owner-1".to_string(),
            name: "Netflix".to_string(),
            amount: 15.99,
            currency: "EUR".to_string(),
            cadence: Cadence::Monthly,
            start_date: ts,
            next_run_at: ts,
            last_run_at: None,
            notification_offset_days: 3,
            last_reminder_at: None,
            is_active: true,
            expense_category_id: Some("cat-7".to_string()),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_expense_request_payload() {
        let payload = ExpenseRequest::from_subscription(&subscription());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["description"], "Subscription payment: Netflix");
        assert_eq!(json["category_id"], "cat-7");
        assert_eq!(json["items"][0]["item_id"], "sub-1");
        assert_eq!(json["items"][0]["item_price"], 15.99);
        assert_eq!(json["items"][0]["item_quantity"], 1);
    }

    #[test]
    fn test_expense_request_omits_missing_category() {
        let mut sub = subscription();
        sub.expense_category_id = None;
        let json = serde_json::to_value(ExpenseRequest::from_subscription(&sub)).unwrap();
        assert!(json.get("category_id").is_none());
    }

    #[test]
    fn test_reminder_request_payload() {
        let send_at = Utc.with_ymd_and_hms(2024, 12, 29, 0, 0, 0).unwrap();
        let payload = ReminderRequest::from_subscription(&subscription(), send_at);
        let json = serde_json::to_value(&payload).unwrap();

        // Notificationサービスはキー名がcamelCase
        assert_eq!(json["userId"], "owner-1");
        assert_eq!(json["sendAt"], "2024-12-29T00:00:00+00:00");
        assert_eq!(json["meta"]["subscriptionId"], "sub-1");
        assert_eq!(json["meta"]["type"], "subscription-reminder");
        assert!(json["body"].as_str().unwrap().contains("15.99 EUR"));
    }

    #[test]
    fn test_notification_target_presence() {
        assert!(!HttpNotificationClient::new(None).has_target());
        assert!(HttpNotificationClient::new(Some("http://localhost:3002".to_string())).has_target());
    }

    #[tokio::test]
    async fn test_unconfigured_expense_client_is_noop_success() {
        // URL未設定のクライアントは送信せず成功を返す
        let client = HttpExpenseClient::new(None);
        let ctx = CorrelationContext::new();
        assert!(client.create_expense(&ctx, &subscription()).await.is_ok());
    }
}

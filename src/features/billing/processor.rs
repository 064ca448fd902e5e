//! サイクルプロセッサ
//!
//! 期日が到来したサブスクリプション1件分の処理を担当します：
//! リマインダー送信（条件付き・ベストエフォート）、経費レコードの
//! 作成（成功必須）、次回課金日時の前進、そして一括永続化。
//! 失敗は常に対象の1件に閉じ込め、バッチ全体へは伝播させません。

use super::clients::{ExpenseClient, NotificationClient};
use super::cycle;
use super::errors::ProcessingError;
use super::reminder;
use crate::features::subscriptions::models::Subscription;
use crate::features::subscriptions::repository;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::logging::{CorrelationContext, EventSink, LogLevel, StructuredLogEntry};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};

/// サイクルプロセッサ
///
/// 外部コラボレータはトレイト経由で注入されます。レコードストアの
/// 変更は「全フィールドをメモリ上で確定してから一括保存」の規律に
/// 従い、部分更新は行いません。
pub struct CycleProcessor<E, N> {
    /// データベース接続
    db: Arc<Mutex<Connection>>,
    /// 経費作成クライアント
    expense_client: E,
    /// リマインダー送信クライアント
    notification_client: N,
    /// 観測イベントシンク
    sink: EventSink,
}

impl<E: ExpenseClient, N: NotificationClient> CycleProcessor<E, N> {
    /// 新しいサイクルプロセッサを作成する
    ///
    /// # 引数
    /// * `db` - データベース接続
    /// * `expense_client` - 経費作成クライアント
    /// * `notification_client` - リマインダー送信クライアント
    /// * `sink` - 観測イベントシンク
    pub fn new(
        db: Arc<Mutex<Connection>>,
        expense_client: E,
        notification_client: N,
        sink: EventSink,
    ) -> Self {
        Self {
            db,
            expense_client,
            notification_client,
            sink,
        }
    }

    /// 期日到来サブスクリプション1件のサイクルを処理する
    ///
    /// # 引数
    /// * `ctx` - 相関コンテキスト
    /// * `sub` - 処理対象のサブスクリプション
    /// * `now` - 現在時刻（バッチ開始時に一度だけ取得した値）
    ///
    /// # 戻り値
    /// 永続化済みの更新されたサブスクリプション、または失敗時はエラー
    ///
    /// # 処理内容
    /// 1. リマインダー判定と送信（失敗してもサイクルは続行）
    /// 2. 経費レコードの作成（失敗時はレコード無変更のままエラー、
    ///    次回スキャンで同じ期日が再試行される）
    /// 3. last_run_at更新・next_run_at前進・last_reminder_atリセットを
    ///    まとめて一括永続化
    pub async fn process(
        &self,
        ctx: &CorrelationContext,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, ProcessingError> {
        let mut working = sub.clone();

        // 1. リマインダー（ベストエフォート）
        if reminder::should_remind(&working, now, self.notification_client.has_target()) {
            self.dispatch_reminder(ctx, &mut working, now).await;
        }

        // 2. 経費作成（サイクル前進の必須条件）
        if let Err(e) = self.expense_client.create_expense(ctx, &working).await {
            return Err(ProcessingError::ExpenseDispatchFailed {
                subscription_id: working.id.clone(),
                detail: e.details(),
            });
        }

        // 3. サイクルを進めて一括永続化
        // advanceには前進前のnext_run_atを渡す（スキャンごとに1ステップ）
        working.last_run_at = Some(now);
        working.next_run_at = cycle::advance(sub.next_run_at, sub.cadence);
        working.last_reminder_at = None;

        self.persist(ctx, &working)
    }

    /// 期日未到来のサブスクリプションへリマインダーのみを送信する
    ///
    /// # 引数
    /// * `ctx` - 相関コンテキスト
    /// * `sub` - 処理対象のサブスクリプション
    /// * `now` - 現在時刻
    ///
    /// # 戻り値
    /// 永続化済みのサブスクリプション、または失敗時はエラー
    ///
    /// 送信成功時はlast_reminder_atのみが更新され、next_run_at /
    /// last_run_atには触れません。送信失敗時はレコード無変更のため
    /// 次回スキャンで再試行されます。
    pub async fn process_reminder_only(
        &self,
        ctx: &CorrelationContext,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, ProcessingError> {
        if !reminder::should_remind(sub, now, self.notification_client.has_target()) {
            return Ok(sub.clone());
        }

        let send_at = reminder::reminder_time(sub);
        self.notification_client
            .send_reminder(ctx, sub, send_at)
            .await
            .map_err(|e| ProcessingError::ReminderDispatchFailed {
                subscription_id: sub.id.clone(),
                detail: e.details(),
            })?;

        // 実際に送信した時刻を記録する（予定時刻ではない）
        let mut working = sub.clone();
        working.last_reminder_at = Some(now);
        self.persist(ctx, &working)
    }

    /// IDを指定してサイクルを処理する（手動トリガ）
    ///
    /// # 引数
    /// * `ctx` - 相関コンテキスト
    /// * `id` - サブスクリプションID
    /// * `now` - 現在時刻
    ///
    /// # 戻り値
    /// 永続化済みの更新されたサブスクリプション、または失敗時はエラー
    ///
    /// 定期スキャンと同じ処理経路を通ります。期日・アクティブ状態に
    /// かかわらず課金するため、呼び出し側の明示的な意思が前提です。
    pub async fn process_by_id(
        &self,
        ctx: &CorrelationContext,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, ProcessingError> {
        let sub = {
            let conn = self.lock_db().map_err(|e| ProcessingError::PersistFailed {
                subscription_id: id.to_string(),
                detail: e.details(),
            })?;
            match repository::find_by_id(&conn, id) {
                Ok(sub) => sub,
                Err(AppError::NotFound(_)) => {
                    return Err(ProcessingError::SubscriptionVanished {
                        subscription_id: id.to_string(),
                    })
                }
                Err(e) => {
                    return Err(ProcessingError::PersistFailed {
                        subscription_id: id.to_string(),
                        detail: e.details(),
                    })
                }
            }
        };

        self.process(ctx, &sub, now).await
    }

    /// リマインダーを送信し、成功時のみlast_reminder_atを記録する
    ///
    /// 送信失敗は警告として報告するだけで、課金処理は続行します。
    async fn dispatch_reminder(
        &self,
        ctx: &CorrelationContext,
        working: &mut Subscription,
        now: DateTime<Utc>,
    ) {
        let send_at = reminder::reminder_time(working);
        match self
            .notification_client
            .send_reminder(ctx, working, send_at)
            .await
        {
            Ok(()) => {
                working.last_reminder_at = Some(now);
            }
            Err(e) => {
                let warning = ProcessingError::ReminderDispatchFailed {
                    subscription_id: working.id.clone(),
                    detail: e.details(),
                };
                log::warn!("{warning}");
                self.sink.emit(
                    StructuredLogEntry::new(
                        LogLevel::from(warning.severity()),
                        &warning.to_string(),
                        ctx,
                    )
                    .with_context("subscription_id", json!(working.id)),
                );
            }
        }
    }

    /// 変更済みレコードを一括永続化する
    ///
    /// 一時的なデータベースエラーは1回だけ即時再試行します。課金済み
    /// レコードの永続化失敗は再スキャンで安全に再試行できない唯一の
    /// 状態のため、最重要イベントとして報告します。
    fn persist(
        &self,
        ctx: &CorrelationContext,
        sub: &Subscription,
    ) -> Result<Subscription, ProcessingError> {
        let result = match self.try_save(sub) {
            Err(AppError::Database(detail)) => {
                log::warn!(
                    "永続化に失敗したため再試行します (subscription={}): {detail}",
                    sub.id
                );
                self.try_save(sub)
            }
            other => other,
        };

        match result {
            Ok(saved) => Ok(saved),
            Err(AppError::NotFound(_)) => Err(ProcessingError::SubscriptionVanished {
                subscription_id: sub.id.clone(),
            }),
            Err(e) => {
                let error = ProcessingError::PersistFailed {
                    subscription_id: sub.id.clone(),
                    detail: e.details(),
                };
                log::error!("{error}");
                self.sink.emit(
                    StructuredLogEntry::new(LogLevel::Critical, &error.to_string(), ctx)
                        .with_context("subscription_id", json!(sub.id)),
                );
                Err(error)
            }
        }
    }

    /// 保存を1回試行する
    fn try_save(&self, sub: &Subscription) -> AppResult<Subscription> {
        let conn = self.lock_db()?;
        repository::save(&conn, sub)
    }

    /// データベース接続をロックする
    fn lock_db(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| AppError::Database(format!("データベースロックエラー: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::billing::test_support::{StubExpenseClient, StubNotificationClient};
    use crate::features::subscriptions::models::{Cadence, CreateSubscriptionDto};
    use crate::shared::database::run_migrations;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().expect("テスト用データベースの作成に失敗");
        run_migrations(&conn).expect("マイグレーションに失敗");
        Arc::new(Mutex::new(conn))
    }

    fn create_subscription(db: &Arc<Mutex<Connection>>, name: &str) -> Subscription {
        let conn = db.lock().unwrap();
        repository::create(
            &conn,
            CreateSubscriptionDto {
                owner_id: "owner-1".to_string(),
                name: name.to_string(),
                amount: 15.99,
                currency: None,
                cadence: Cadence::Monthly,
                start_date: ts(2025, 1, 1),
                notification_offset_days: Some(3),
                expense_category_id: None,
            },
        )
        .unwrap()
    }

    fn processor(
        db: Arc<Mutex<Connection>>,
        expense: StubExpenseClient,
        notification: StubNotificationClient,
    ) -> CycleProcessor<StubExpenseClient, StubNotificationClient> {
        CycleProcessor::new(db, expense, notification, EventSink::disabled())
    }

    #[tokio::test]
    async fn test_due_cycle_advances_and_persists() {
        // 月次・期日2025-01-01・オフセット3日を2025-01-02に処理
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let expense = StubExpenseClient::default();
        let notification = StubNotificationClient::default();
        let processor = processor(db.clone(), expense.clone(), notification.clone());

        let ctx = CorrelationContext::new();
        let now = ts(2025, 1, 2);
        let updated = processor.process(&ctx, &sub, now).await.unwrap();

        assert_eq!(updated.next_run_at, ts(2025, 2, 1));
        assert_eq!(updated.last_run_at, Some(now));
        assert!(updated.last_reminder_at.is_none());

        // 永続化済みであること
        let persisted = repository::find_by_id(&db.lock().unwrap(), &sub.id).unwrap();
        assert_eq!(persisted.next_run_at, ts(2025, 2, 1));
        assert_eq!(persisted.last_run_at, Some(now));

        // 経費呼び出しは1回、未送信サイクルのためリマインダーも発火
        assert_eq!(expense.calls.lock().unwrap().len(), 1);
        assert_eq!(notification.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expense_failure_leaves_record_untouched() {
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let expense = StubExpenseClient {
            fail_for: Some("Netflix".to_string()),
            ..Default::default()
        };
        let processor = processor(db.clone(), expense, StubNotificationClient::default());

        let ctx = CorrelationContext::new();
        let result = processor.process(&ctx, &sub, ts(2025, 1, 2)).await;

        assert!(matches!(
            result,
            Err(ProcessingError::ExpenseDispatchFailed { .. })
        ));

        // レコードは完全に無変更（次回スキャンで同じ期日が再試行される）
        let persisted = repository::find_by_id(&db.lock().unwrap(), &sub.id).unwrap();
        assert_eq!(persisted, sub);
    }

    #[tokio::test]
    async fn test_reminder_failure_does_not_block_charge() {
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let notification = StubNotificationClient {
            fail: true,
            ..Default::default()
        };
        let processor = processor(db.clone(), StubExpenseClient::default(), notification.clone());

        let ctx = CorrelationContext::new();
        let now = ts(2025, 1, 2);
        let updated = processor.process(&ctx, &sub, now).await.unwrap();

        // リマインダーは失敗したがサイクルは前進している
        assert_eq!(updated.next_run_at, ts(2025, 2, 1));
        assert_eq!(notification.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_subscription_is_reported() {
        let db = test_db();
        let sub = create_subscription(&db, "消える");
        repository::delete(&db.lock().unwrap(), &sub.id).unwrap();

        let processor = processor(
            db.clone(),
            StubExpenseClient::default(),
            StubNotificationClient::default(),
        );

        let ctx = CorrelationContext::new();
        let result = processor.process(&ctx, &sub, ts(2025, 1, 2)).await;
        assert!(matches!(
            result,
            Err(ProcessingError::SubscriptionVanished { .. })
        ));

        let result = processor.process_by_id(&ctx, "missing-id", ts(2025, 1, 2)).await;
        assert!(matches!(
            result,
            Err(ProcessingError::SubscriptionVanished { .. })
        ));
    }

    #[tokio::test]
    async fn test_reminder_only_sets_last_reminder_at() {
        // 期日2025-01-01・オフセット3日を2024-12-30にスキャン
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let expense = StubExpenseClient::default();
        let notification = StubNotificationClient::default();
        let processor = processor(db.clone(), expense.clone(), notification.clone());

        let ctx = CorrelationContext::new();
        let now = ts(2024, 12, 30);
        let updated = processor.process_reminder_only(&ctx, &sub, now).await.unwrap();

        // 送信実時刻が記録され、課金関連フィールドは無変更
        assert_eq!(updated.last_reminder_at, Some(now));
        assert_eq!(updated.next_run_at, ts(2025, 1, 1));
        assert!(updated.last_run_at.is_none());

        // 経費呼び出しは発生しない
        assert!(expense.calls.lock().unwrap().is_empty());
        assert_eq!(notification.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_only_at_most_once_per_cycle() {
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let notification = StubNotificationClient::default();
        let processor = processor(
            db.clone(),
            StubExpenseClient::default(),
            notification.clone(),
        );

        let ctx = CorrelationContext::new();
        let first = processor
            .process_reminder_only(&ctx, &sub, ts(2024, 12, 30))
            .await
            .unwrap();

        // 同一サイクル内の再実行は送信しない
        processor
            .process_reminder_only(&ctx, &first, ts(2024, 12, 31))
            .await
            .unwrap();
        assert_eq!(notification.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_only_failure_leaves_record_untouched() {
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let notification = StubNotificationClient {
            fail: true,
            ..Default::default()
        };
        let processor = processor(db.clone(), StubExpenseClient::default(), notification);

        let ctx = CorrelationContext::new();
        let result = processor
            .process_reminder_only(&ctx, &sub, ts(2024, 12, 30))
            .await;

        assert!(matches!(
            result,
            Err(ProcessingError::ReminderDispatchFailed { .. })
        ));
        let persisted = repository::find_by_id(&db.lock().unwrap(), &sub.id).unwrap();
        assert!(persisted.last_reminder_at.is_none());
    }

    #[tokio::test]
    async fn test_manual_trigger_charges_by_id() {
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let expense = StubExpenseClient::default();
        let processor = processor(db.clone(), expense.clone(), StubNotificationClient::default());

        let ctx = CorrelationContext::from_id("manual-1");
        let now = ts(2025, 1, 2);
        let updated = processor.process_by_id(&ctx, &sub.id, now).await.unwrap();

        assert_eq!(updated.next_run_at, ts(2025, 2, 1));
        assert_eq!(expense.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overdue_advances_one_step_per_pass() {
        // 3周期遅れでも1回の処理で進むのは1サイクルのみ
        let db = test_db();
        let sub = create_subscription(&db, "Netflix");
        let processor = processor(
            db.clone(),
            StubExpenseClient::default(),
            StubNotificationClient::default(),
        );

        let ctx = CorrelationContext::new();
        let updated = processor.process(&ctx, &sub, ts(2025, 4, 15)).await.unwrap();

        // now起点ではなく、前進前のnext_run_at起点で1ステップだけ進む
        assert_eq!(updated.next_run_at, ts(2025, 2, 1));
    }
}

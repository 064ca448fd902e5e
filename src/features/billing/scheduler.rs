//! バッチオーケストレータ
//!
//! 固定間隔でスキャンを起動し、期日到来分の課金とリマインダー送信待ち
//! 分の通知を実行します。バッチは単一ループで直列に駆動されるため、
//! 同一サブスクリプションを2つのバッチが同時に処理することはありません。

use super::clients::{ExpenseClient, NotificationClient};
use super::processor::CycleProcessor;
use crate::features::subscriptions::repository;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::logging::{CorrelationContext, EventSink, LogLevel, StructuredLogEntry};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// バッチ実行結果
#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    /// 期日到来数
    pub due: usize,
    /// サイクル前進に成功した数
    pub advanced: usize,
    /// 失敗数
    pub failed: usize,
    /// リマインダー送信数
    pub reminders_sent: usize,
    /// リマインダー失敗数
    pub reminder_failures: usize,
    /// エラー詳細
    pub errors: Vec<String>,
}

impl BatchSummary {
    /// バッチが何も処理しなかったか
    pub fn is_noop(&self) -> bool {
        self.due == 0 && self.reminders_sent == 0 && self.reminder_failures == 0
    }
}

/// バッチオーケストレータ
pub struct BatchOrchestrator<E, N> {
    /// データベース接続（スキャン用）
    db: Arc<Mutex<Connection>>,
    /// サイクルプロセッサ
    processor: CycleProcessor<E, N>,
    /// 観測イベントシンク
    sink: EventSink,
    /// スキャン間隔
    period: Duration,
}

impl<E: ExpenseClient, N: NotificationClient> BatchOrchestrator<E, N> {
    /// 新しいバッチオーケストレータを作成する
    ///
    /// # 引数
    /// * `db` - データベース接続
    /// * `processor` - サイクルプロセッサ
    /// * `sink` - 観測イベントシンク
    /// * `period` - スキャン間隔
    pub fn new(
        db: Arc<Mutex<Connection>>,
        processor: CycleProcessor<E, N>,
        sink: EventSink,
        period: Duration,
    ) -> Self {
        Self {
            db,
            processor,
            sink,
            period,
        }
    }

    /// 定期スキャンループを実行する
    ///
    /// # 引数
    /// * `shutdown` - シャットダウン用のキャンセレーショントークン
    ///
    /// バッチの実行中はtickを待たないため、バッチ同士が重なることは
    /// ありません。間隔より長いバッチがあった場合、次のバッチは現在の
    /// バッチ完了後に遅延して実行されます。シャットダウン要求は実行中
    /// のバッチを中断せず、バッチ間でのみ観測されます。
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "バッチオーケストレータを開始します: interval={}s",
            self.period.as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("シャットダウン要求を受信しました。バッチ駆動を停止します");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_batch().await {
                        log::error!("バッチスキャンに失敗しました: {}", e.details());
                    }
                }
            }
        }
    }

    /// 1回分のバッチを実行する
    ///
    /// # 戻り値
    /// バッチ実行結果、またはスキャン自体が失敗した場合はエラー
    pub async fn run_batch(&self) -> AppResult<BatchSummary> {
        // nowはバッチ開始時に一度だけ取得し、全アイテムの判定に同じ値を使う
        self.run_batch_at(Utc::now()).await
    }

    /// 指定時刻を基準にバッチを実行する
    ///
    /// # 引数
    /// * `now` - バッチの基準時刻
    ///
    /// # 戻り値
    /// バッチ実行結果、またはスキャン自体が失敗した場合はエラー
    ///
    /// アイテム単位の失敗はサマリーに集計するだけで、残りのアイテムの
    /// 処理は続行します。スキャン結果が空のバッチはイベントを出さない
    /// 非イベントです。
    pub async fn run_batch_at(&self, now: DateTime<Utc>) -> AppResult<BatchSummary> {
        let ctx = CorrelationContext::new();

        let (due, reminders) = {
            let conn = self
                .db
                .lock()
                .map_err(|e| AppError::Database(format!("データベースロックエラー: {e}")))?;
            (
                repository::find_due_active(&conn, now)?,
                repository::find_reminder_pending(&conn, now)?,
            )
        };

        let mut summary = BatchSummary {
            due: due.len(),
            ..Default::default()
        };

        if due.is_empty() && reminders.is_empty() {
            return Ok(summary);
        }

        self.sink.emit(
            StructuredLogEntry::new(
                LogLevel::Info,
                &format!("バッチ処理を開始します: 期日到来={}件", due.len()),
                &ctx,
            )
            .with_context("due", json!(due.len()))
            .with_context("reminders_pending", json!(reminders.len())),
        );

        // 課金パス: アイテム単位で独立に処理し、失敗しても続行する
        for sub in &due {
            match self.processor.process(&ctx, sub, now).await {
                Ok(_) => summary.advanced += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(e.to_string());
                    self.sink.emit(
                        StructuredLogEntry::new(
                            LogLevel::from(e.severity()),
                            &e.to_string(),
                            &ctx,
                        )
                        .with_context("subscription_id", json!(e.subscription_id())),
                    );
                }
            }
        }

        // リマインダーパス: 期日未到来で時間帯が開いている分の送信
        for sub in &reminders {
            match self.processor.process_reminder_only(&ctx, sub, now).await {
                Ok(_) => summary.reminders_sent += 1,
                Err(e) => {
                    summary.reminder_failures += 1;
                    self.sink.emit(
                        StructuredLogEntry::new(
                            LogLevel::from(e.severity()),
                            &e.to_string(),
                            &ctx,
                        )
                        .with_context("subscription_id", json!(e.subscription_id())),
                    );
                }
            }
        }

        self.sink.emit(
            StructuredLogEntry::new(LogLevel::Info, "バッチ処理が完了しました", &ctx)
                .with_context("summary", json!(summary)),
        );

        Ok(summary)
    }
}

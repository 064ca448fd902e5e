//! 構造化ログイベントの送出機能
//!
//! バッチ開始・サマリー・アイテム単位の失敗を構造化イベントとして
//! 観測基盤へ送出します。シンク自体の失敗が課金処理を中断させない
//! よう、送出は常にベストエフォートです。

use crate::shared::errors::ErrorSeverity;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// デバッグ情報
    Debug,
    /// 一般情報
    Info,
    /// 警告
    Warn,
    /// エラー
    Error,
    /// 致命的エラー
    Critical,
}

impl From<ErrorSeverity> for LogLevel {
    fn from(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => LogLevel::Info,
            ErrorSeverity::Medium => LogLevel::Warn,
            ErrorSeverity::High => LogLevel::Error,
            ErrorSeverity::Critical => LogLevel::Critical,
        }
    }
}

/// 相関コンテキスト
///
/// バッチ単位・リクエスト単位で生成され、オーケストレータから
/// 外部呼び出しまで明示的にパラメータとして引き回されます。
/// 暗黙のスレッドローカル状態は使用しません。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// 相関ID
    pub correlation_id: String,
}

impl CorrelationContext {
    /// 新しい相関コンテキストを生成する
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// 既存の相関IDからコンテキストを生成する（手動トリガなど）
    pub fn from_id<S: Into<String>>(correlation_id: S) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 構造化ログエントリ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// タイムスタンプ（UTC）
    pub timestamp: DateTime<Utc>,
    /// ログレベル
    pub level: LogLevel,
    /// メッセージ
    pub message: String,
    /// 相関ID
    pub correlation_id: String,
    /// コンテキスト情報
    pub context: HashMap<String, serde_json::Value>,
}

impl StructuredLogEntry {
    /// 新しいログエントリを作成
    pub fn new(level: LogLevel, message: &str, ctx: &CorrelationContext) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            correlation_id: ctx.correlation_id.clone(),
            context: HashMap::new(),
        }
    }

    /// コンテキスト情報を追加
    pub fn with_context<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// 観測イベントシンク
///
/// エントリをチャネル経由でバックグラウンドのライタータスクへ渡します。
/// 送出失敗（ライター停止後など）は黙って無視します。
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StructuredLogEntry>,
}

impl EventSink {
    /// ライタータスクを起動してシンクを作成する
    ///
    /// # 戻り値
    /// イベントシンク
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StructuredLogEntry>();

        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                write_entry(&entry);
            }
            debug!("イベントシンクのライタータスクを終了します");
        });

        Self { tx }
    }

    /// ライターを持たないシンクを作成する（テスト用）
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// ログエントリを送出する
    ///
    /// # 引数
    /// * `entry` - 構造化ログエントリ
    pub fn emit(&self, entry: StructuredLogEntry) {
        // シンク障害は処理を中断させない
        let _ = self.tx.send(entry);
    }

    /// 情報イベントを送出するヘルパー
    pub fn info(&self, ctx: &CorrelationContext, message: &str) {
        self.emit(StructuredLogEntry::new(LogLevel::Info, message, ctx));
    }

    /// 警告イベントを送出するヘルパー
    pub fn warn(&self, ctx: &CorrelationContext, message: &str) {
        self.emit(StructuredLogEntry::new(LogLevel::Warn, message, ctx));
    }

    /// エラーイベントを送出するヘルパー
    pub fn error(&self, ctx: &CorrelationContext, message: &str) {
        self.emit(StructuredLogEntry::new(LogLevel::Error, message, ctx));
    }
}

/// エントリをlogクレート経由で書き出す
fn write_entry(entry: &StructuredLogEntry) {
    let payload = serde_json::to_string(entry)
        .unwrap_or_else(|_| format!("{{\"message\":\"{}\"}}", entry.message));

    match entry.level {
        LogLevel::Debug => debug!("{payload}"),
        LogLevel::Info => info!("{payload}"),
        LogLevel::Warn => warn!("{payload}"),
        LogLevel::Error => error!("{payload}"),
        LogLevel::Critical => error!("[CRITICAL] {payload}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_severity() {
        // 重要度からログレベルへの変換
        assert_eq!(LogLevel::from(ErrorSeverity::Low), LogLevel::Info);
        assert_eq!(LogLevel::from(ErrorSeverity::Medium), LogLevel::Warn);
        assert_eq!(LogLevel::from(ErrorSeverity::High), LogLevel::Error);
        assert_eq!(LogLevel::from(ErrorSeverity::Critical), LogLevel::Critical);
    }

    #[test]
    fn test_correlation_context_unique() {
        // 相関IDは生成ごとに一意
        let a = CorrelationContext::new();
        let b = CorrelationContext::new();
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_entry_carries_correlation_id() {
        let ctx = CorrelationContext::from_id("batch-123");
        let entry = StructuredLogEntry::new(LogLevel::Info, "テスト", &ctx)
            .with_context("count", serde_json::json!(3));

        assert_eq!(entry.correlation_id, "batch-123");
        assert_eq!(entry.context["count"], serde_json::json!(3));
    }

    #[test]
    fn test_disabled_sink_never_panics() {
        // ライター不在でもemitは失敗しない
        let sink = EventSink::disabled();
        let ctx = CorrelationContext::new();
        sink.info(&ctx, "破棄されるイベント");
        sink.error(&ctx, "これも破棄される");
    }

    #[tokio::test]
    async fn test_spawned_sink_accepts_entries() {
        let sink = EventSink::spawn();
        let ctx = CorrelationContext::new();
        sink.info(&ctx, "バッチ開始");
        sink.warn(&ctx, "リマインダー送信失敗");
        // ライタータスクへの引き渡しが完了するまで待機
        tokio::task::yield_now().await;
    }
}

//! リマインダー送信の判定ロジック
//!
//! 副作用を持たない純粋な判定関数のみを提供します。実際の送信と
//! last_reminder_atの更新はサイクルプロセッサが行います。

use crate::features::subscriptions::models::Subscription;
use chrono::{DateTime, Duration, Utc};

/// 現在のサイクルのリマインダー送信予定時刻を計算する
///
/// # 引数
/// * `sub` - サブスクリプション
///
/// # 戻り値
/// next_run_atからnotification_offset_days日前の時刻
pub fn reminder_time(sub: &Subscription) -> DateTime<Utc> {
    sub.next_run_at - Duration::days(sub.notification_offset_days)
}

/// リマインダーを送信すべきかを判定する
///
/// # 引数
/// * `sub` - サブスクリプション
/// * `now` - 現在時刻（バッチ開始時に一度だけ取得した値）
/// * `has_target` - 通知先（Notificationサービス）が設定されているか
///
/// # 戻り値
/// 送信すべき場合はtrue
///
/// 1サイクルにつき送信は最大1回。スキャン間隔の粒度により予定時刻
/// より遅れて送信されることは許容されます。
pub fn should_remind(sub: &Subscription, now: DateTime<Utc>, has_target: bool) -> bool {
    // 通知先がない、またはリマインダー無効
    if !has_target || sub.notification_offset_days <= 0 {
        return false;
    }

    let reminder_at = reminder_time(sub);

    // リマインダーの時間帯がまだ開いていない
    if now < reminder_at {
        return false;
    }

    // このサイクル分は送信済み
    match sub.last_reminder_at {
        Some(last) => last < reminder_at,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::models::Cadence;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn subscription(offset_days: i64) -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            owner_id: "owner-1".to_string(),
            name: "Netflix".to_string(),
            amount: 15.99,
            currency: "EUR".to_string(),
            cadence: Cadence::Monthly,
            start_date: ts(2025, 1, 1),
            next_run_at: ts(2025, 1, 1),
            last_run_at: None,
            notification_offset_days: offset_days,
            last_reminder_at: None,
            is_active: true,
            expense_category_id: None,
            created_at: ts(2024, 12, 1),
            updated_at: ts(2024, 12, 1),
        }
    }

    #[test]
    fn test_disabled_offset_never_reminds() {
        // オフセット0はリマインダー無効
        let sub = subscription(0);
        assert!(!should_remind(&sub, ts(2024, 12, 31), true));
        assert!(!should_remind(&sub, ts(2025, 1, 1), true));
    }

    #[test]
    fn test_no_target_never_reminds() {
        let sub = subscription(3);
        assert!(!should_remind(&sub, ts(2024, 12, 30), false));
    }

    #[test]
    fn test_reminder_time_calculation() {
        let sub = subscription(3);
        assert_eq!(reminder_time(&sub), ts(2024, 12, 29));
    }

    #[test]
    fn test_window_not_yet_open() {
        let sub = subscription(3);
        assert!(!should_remind(&sub, ts(2024, 12, 28), true));
    }

    #[test]
    fn test_window_open_and_unsent() {
        let sub = subscription(3);
        assert!(should_remind(&sub, ts(2024, 12, 29), true));
        // スキャン間隔による遅延も許容
        assert!(should_remind(&sub, ts(2024, 12, 31), true));
    }

    #[test]
    fn test_at_most_once_per_cycle() {
        let mut sub = subscription(3);
        sub.last_reminder_at = Some(ts(2024, 12, 30));

        // 同一サイクル内では再送しない
        assert!(!should_remind(&sub, ts(2024, 12, 31), true));

        // サイクルが進むと再び送信対象になる
        sub.next_run_at = ts(2025, 2, 1);
        sub.last_reminder_at = None;
        assert!(should_remind(&sub, ts(2025, 1, 29), true));
    }

    #[test]
    fn test_stale_reminder_from_previous_cycle() {
        // 前サイクルのlast_reminder_atが残っていても新サイクルでは送信する
        let mut sub = subscription(3);
        sub.next_run_at = ts(2025, 2, 1);
        sub.last_reminder_at = Some(ts(2024, 12, 30));

        assert!(should_remind(&sub, ts(2025, 1, 29), true));
    }

    #[test]
    fn test_idempotent_decision() {
        // 入力が同じなら判定結果も同じ
        let sub = subscription(3);
        let first = should_remind(&sub, ts(2024, 12, 30), true);
        let second = should_remind(&sub, ts(2024, 12, 30), true);
        assert_eq!(first, second);
        assert!(first);
    }
}

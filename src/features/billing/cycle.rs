//! 課金サイクルの日付計算
//!
//! 副作用を持たない純粋な日付演算のみを提供します。

use crate::features::subscriptions::models::Cadence;
use chrono::{DateTime, Duration, Months, Utc};

/// 次回課金日時を1サイクル分進める
///
/// # 引数
/// * `current` - 進める前のnext_run_at（「現在時刻」ではない）
/// * `cadence` - 課金サイクル
///
/// # 戻り値
/// 1サイクル後の日時
///
/// 呼び出し側は必ずadvance前のnext_run_atを渡すこと。複数周期分
/// 遅延しているサブスクリプションはスキャンごとに1ステップずつ
/// 追いつく（1回のスキャンで課金されるのは常に最大1回）。
///
/// 月次は日番号を維持し、存在しない日はその月の末日に丸められる
/// （1月31日 -> 2月28日/29日）。年次は閏日を2月28日に丸める。
pub fn advance(current: DateTime<Utc>, cadence: Cadence) -> DateTime<Utc> {
    match cadence {
        Cadence::Daily => current + Duration::days(1),
        Cadence::Weekly => current + Duration::days(7),
        Cadence::Monthly => current
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| current + Duration::days(31)),
        Cadence::Yearly => current
            .checked_add_months(Months::new(12))
            .unwrap_or_else(|| current + Duration::days(365)),
    }
}

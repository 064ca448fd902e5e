use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 課金サイクル（繰り返し単位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// 毎日
    Daily,
    /// 毎週
    Weekly,
    /// 毎月
    Monthly,
    /// 毎年
    Yearly,
}

impl Cadence {
    /// データベース保存用の文字列表現を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Yearly => "yearly",
        }
    }
}

impl FromStr for Cadence {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            "yearly" => Ok(Cadence::Yearly),
            other => Err(AppError::validation(format!(
                "不正な課金サイクルです: {other}"
            ))),
        }
    }
}

/// サブスクリプションデータモデル
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    /// Account/AuthサービスのユーザーID（本サービスでは解釈しない）
    pub owner_id: String,
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub cadence: Cadence,
    pub start_date: DateTime<Utc>,
    /// 次回の課金予定日時（作成時はstart_dateと同値）
    pub next_run_at: DateTime<Utc>,
    /// 最後に課金が成功した日時
    pub last_run_at: Option<DateTime<Utc>>,
    /// 課金の何日前にリマインダーを送るか（0で無効）
    pub notification_offset_days: i64,
    /// 現在のサイクルでリマインダーを送信した日時
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Expenseサービス側のカテゴリ参照（そのまま引き渡すのみ）
    pub expense_category_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// サブスクリプション作成用DTO
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionDto {
    pub owner_id: String,
    pub name: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub cadence: Cadence,
    pub start_date: DateTime<Utc>,
    pub notification_offset_days: Option<i64>,
    pub expense_category_id: Option<String>,
}

/// サブスクリプション更新用DTO
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubscriptionDto {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub cadence: Option<Cadence>,
    pub start_date: Option<DateTime<Utc>>,
    pub notification_offset_days: Option<i64>,
    pub expense_category_id: Option<String>,
}

/// 作成DTOのバリデーション
///
/// # 引数
/// * `dto` - サブスクリプション作成用DTO
///
/// # 戻り値
/// 成功時はOk(())、失敗時はバリデーションエラー
pub fn validate_create_dto(dto: &CreateSubscriptionDto) -> AppResult<()> {
    if dto.owner_id.trim().is_empty() {
        return Err(AppError::validation("owner_idは必須です"));
    }
    if dto.name.trim().is_empty() {
        return Err(AppError::validation("名前は必須です"));
    }
    if dto.amount < 0.0 || !dto.amount.is_finite() {
        return Err(AppError::validation("金額は0以上である必要があります"));
    }
    if let Some(offset) = dto.notification_offset_days {
        if offset < 0 {
            return Err(AppError::validation(
                "通知オフセット日数は0以上である必要があります",
            ));
        }
    }
    Ok(())
}

/// 更新DTOのバリデーション
///
/// # 引数
/// * `dto` - サブスクリプション更新用DTO
///
/// # 戻り値
/// 成功時はOk(())、失敗時はバリデーションエラー
pub fn validate_update_dto(dto: &UpdateSubscriptionDto) -> AppResult<()> {
    if let Some(name) = &dto.name {
        if name.trim().is_empty() {
            return Err(AppError::validation("名前は空にできません"));
        }
    }
    if let Some(amount) = dto.amount {
        if amount < 0.0 || !amount.is_finite() {
            return Err(AppError::validation("金額は0以上である必要があります"));
        }
    }
    if let Some(offset) = dto.notification_offset_days {
        if offset < 0 {
            return Err(AppError::validation(
                "通知オフセット日数は0以上である必要があります",
            ));
        }
    }
    Ok(())
}

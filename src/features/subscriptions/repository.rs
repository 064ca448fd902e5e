use super::models::{CreateSubscriptionDto, Subscription, UpdateSubscriptionDto};
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, owner_id, name, amount, currency, cadence, start_date, \
     next_run_at, last_run_at, notification_offset_days, last_reminder_at, is_active, \
     expense_category_id, created_at, updated_at";

/// UTC日時をデータベース保存用の文字列へ変換する
///
/// ミリ秒固定桁のRFC3339を使用します。全カラムで桁数が揃うため、
/// SQL上の文字列比較がそのまま時系列順になります。
pub(crate) fn fmt_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}

/// RFC3339文字列をUTC日時へ変換する
fn parse_timestamp(column: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// 行をサブスクリプションへマッピングする
fn map_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let cadence_text: String = row.get(5)?;
    let cadence = super::models::Cadence::from_str(&cadence_text).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("不正な課金サイクル: {cadence_text}").into(),
        )
    })?;

    let last_run_at = row
        .get::<_, Option<String>>(8)?
        .map(|s| parse_timestamp(8, s))
        .transpose()?;
    let last_reminder_at = row
        .get::<_, Option<String>>(10)?
        .map(|s| parse_timestamp(10, s))
        .transpose()?;

    Ok(Subscription {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        cadence,
        start_date: parse_timestamp(6, row.get(6)?)?,
        next_run_at: parse_timestamp(7, row.get(7)?)?,
        last_run_at,
        notification_offset_days: row.get(9)?,
        last_reminder_at,
        is_active: row.get::<_, i64>(11)? != 0,
        expense_category_id: row.get(12)?,
        created_at: parse_timestamp(13, row.get(13)?)?,
        updated_at: parse_timestamp(14, row.get(14)?)?,
    })
}

/// サブスクリプションを作成する
///
/// # 引数
/// * `conn` - データベース接続
/// * `dto` - サブスクリプション作成用DTO
///
/// # 戻り値
/// 作成されたサブスクリプション、または失敗時はエラー
///
/// 初回課金はstart_dateに行われるため、next_run_atはstart_dateで初期化されます。
pub fn create(conn: &Connection, dto: CreateSubscriptionDto) -> AppResult<Subscription> {
    super::models::validate_create_dto(&dto)?;

    let id = Uuid::new_v4().to_string();
    let now = fmt_timestamp(&Utc::now());
    let currency = dto.currency.unwrap_or_else(|| "EUR".to_string());
    let notification_offset_days = dto.notification_offset_days.unwrap_or(1);

    conn.execute(
        "INSERT INTO subscriptions (id, owner_id, name, amount, currency, cadence, start_date, \
         next_run_at, last_run_at, notification_offset_days, last_reminder_at, is_active, \
         expense_category_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, NULL, 1, ?10, ?11, ?12)",
        params![
            id,
            dto.owner_id,
            dto.name,
            dto.amount,
            currency,
            dto.cadence.as_str(),
            fmt_timestamp(&dto.start_date),
            fmt_timestamp(&dto.start_date),
            notification_offset_days,
            dto.expense_category_id,
            now,
            now
        ],
    )?;

    find_by_id(conn, &id)
}

/// IDでサブスクリプションを取得する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - サブスクリプションID
///
/// # 戻り値
/// サブスクリプション、または失敗時はエラー
pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Subscription> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM subscriptions WHERE id = ?1"),
        params![id],
        map_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            AppError::NotFound(format!("ID {id} のサブスクリプションが見つかりません"))
        }
        _ => AppError::Database(e.to_string()),
    })
}

/// 所有者のアクティブなサブスクリプション一覧を取得する
///
/// # 引数
/// * `conn` - データベース接続
/// * `owner_id` - 所有者ID
///
/// # 戻り値
/// 次回課金日時の昇順で並んだサブスクリプションのリスト、または失敗時はエラー
pub fn find_by_owner(conn: &Connection, owner_id: &str) -> AppResult<Vec<Subscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM subscriptions \
         WHERE owner_id = ?1 AND is_active = 1 ORDER BY next_run_at ASC"
    ))?;
    let subscriptions = stmt.query_map(params![owner_id], map_row)?;

    subscriptions
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))
}

/// 課金期日が到来したアクティブなサブスクリプションを取得する
///
/// # 引数
/// * `conn` - データベース接続
/// * `now` - 現在時刻
///
/// # 戻り値
/// 次回課金日時の昇順で並んだ期日到来サブスクリプションのリスト、または失敗時はエラー
///
/// 期日到来がなければ空リストを返します（エラーにはしない）。
pub fn find_due_active(conn: &Connection, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM subscriptions \
         WHERE is_active = 1 AND next_run_at <= ?1 ORDER BY next_run_at ASC"
    ))?;
    let subscriptions = stmt.query_map(params![fmt_timestamp(&now)], map_row)?;

    subscriptions
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))
}

/// リマインダー送信待ちのアクティブなサブスクリプションを取得する
///
/// # 引数
/// * `conn` - データベース接続
/// * `now` - 現在時刻
///
/// # 戻り値
/// 次回課金日時の昇順で並んだリマインダー対象のリスト、または失敗時はエラー
///
/// 対象条件: リマインダー有効（オフセット1日以上）かつ期日未到来で、
/// リマインダーの時間帯（next_run_at - オフセット日数）が開いており、
/// 現在のサイクル分がまだ送信されていないもの。期日到来分は課金パスが
/// 扱うためここには含めません。
pub fn find_reminder_pending(conn: &Connection, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM subscriptions \
         WHERE is_active = 1 \
           AND notification_offset_days > 0 \
           AND next_run_at > ?1 \
           AND datetime(next_run_at, '-' || notification_offset_days || ' days') <= datetime(?1) \
           AND (last_reminder_at IS NULL \
                OR datetime(last_reminder_at) \
                   < datetime(next_run_at, '-' || notification_offset_days || ' days')) \
         ORDER BY next_run_at ASC"
    ))?;
    let subscriptions = stmt.query_map(params![fmt_timestamp(&now)], map_row)?;

    subscriptions
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))
}

/// サブスクリプションを部分更新する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - サブスクリプションID
/// * `dto` - サブスクリプション更新用DTO
///
/// # 戻り値
/// 更新されたサブスクリプション、または失敗時はエラー
pub fn update(conn: &Connection, id: &str, dto: UpdateSubscriptionDto) -> AppResult<Subscription> {
    super::models::validate_update_dto(&dto)?;

    // 既存のサブスクリプションを取得
    let existing = find_by_id(conn, id)?;

    // 更新するフィールドを決定
    let name = dto.name.unwrap_or(existing.name);
    let amount = dto.amount.unwrap_or(existing.amount);
    let currency = dto.currency.unwrap_or(existing.currency);
    let cadence = dto.cadence.unwrap_or(existing.cadence);
    let start_date = dto.start_date.unwrap_or(existing.start_date);
    let notification_offset_days = dto
        .notification_offset_days
        .unwrap_or(existing.notification_offset_days);
    let expense_category_id = dto.expense_category_id.or(existing.expense_category_id);

    let now = fmt_timestamp(&Utc::now());
    conn.execute(
        "UPDATE subscriptions \
         SET name = ?1, amount = ?2, currency = ?3, cadence = ?4, start_date = ?5, \
             notification_offset_days = ?6, expense_category_id = ?7, updated_at = ?8 \
         WHERE id = ?9",
        params![
            name,
            amount,
            currency,
            cadence.as_str(),
            fmt_timestamp(&start_date),
            notification_offset_days,
            expense_category_id,
            now,
            id
        ],
    )?;

    find_by_id(conn, id)
}

/// サブスクリプションの全フィールドを保存する（フルレコード置換）
///
/// # 引数
/// * `conn` - データベース接続
/// * `sub` - 保存するサブスクリプション
///
/// # 戻り値
/// 保存されたサブスクリプション、または失敗時はエラー
///
/// 課金エンジンはサイクル処理中の全変更（next_run_at / last_run_at /
/// last_reminder_at）をメモリ上で確定させてから、この関数で一括永続化します。
/// 対象レコードが消えていた場合はNotFoundを返します。
pub fn save(conn: &Connection, sub: &Subscription) -> AppResult<Subscription> {
    let now = fmt_timestamp(&Utc::now());

    let rows_affected = conn.execute(
        "UPDATE subscriptions \
         SET owner_id = ?1, name = ?2, amount = ?3, currency = ?4, cadence = ?5, \
             start_date = ?6, next_run_at = ?7, last_run_at = ?8, \
             notification_offset_days = ?9, last_reminder_at = ?10, is_active = ?11, \
             expense_category_id = ?12, updated_at = ?13 \
         WHERE id = ?14",
        params![
            sub.owner_id,
            sub.name,
            sub.amount,
            sub.currency,
            sub.cadence.as_str(),
            fmt_timestamp(&sub.start_date),
            fmt_timestamp(&sub.next_run_at),
            sub.last_run_at.map(|dt| fmt_timestamp(&dt)),
            sub.notification_offset_days,
            sub.last_reminder_at.map(|dt| fmt_timestamp(&dt)),
            sub.is_active as i64,
            sub.expense_category_id,
            now,
            sub.id
        ],
    )?;

    if rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "ID {} のサブスクリプションが見つかりません",
            sub.id
        )));
    }

    find_by_id(conn, &sub.id)
}

/// サブスクリプションのアクティブ状態を設定する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - サブスクリプションID
/// * `active` - アクティブにするか
///
/// # 戻り値
/// 更新されたサブスクリプション、または失敗時はエラー
///
/// 非アクティブ化されたサブスクリプションは定期スキャンの対象外になります。
pub fn set_active(conn: &Connection, id: &str, active: bool) -> AppResult<Subscription> {
    let now = fmt_timestamp(&Utc::now());

    let rows_affected = conn.execute(
        "UPDATE subscriptions SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        params![active as i64, now, id],
    )?;

    if rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "ID {id} のサブスクリプションが見つかりません"
        )));
    }

    find_by_id(conn, id)
}

/// サブスクリプションを完全に削除する
///
/// # 引数
/// * `conn` - データベース接続
/// * `id` - サブスクリプションID
///
/// # 戻り値
/// 成功時はOk(())、失敗時はエラー
pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
    let rows_affected = conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;

    if rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "ID {id} のサブスクリプションが見つかりません"
        )));
    }

    Ok(())
}

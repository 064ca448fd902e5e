/// サブスクリプション管理モジュール
///
/// このモジュールは、サブスクリプションレコードの管理機能を提供します：
/// - サブスクリプションの作成、読み取り、更新、削除
/// - アクティブ状態の切り替え（一時停止／再開）
/// - 課金期日が到来したレコードのスキャン
pub mod models;
pub mod repository;

// 公開インターフェース
pub use models::{Cadence, CreateSubscriptionDto, Subscription, UpdateSubscriptionDto};

pub use repository::{
    create, delete, find_by_id, find_by_owner, find_due_active, find_reminder_pending, save,
    set_active, update,
};

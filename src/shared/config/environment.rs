use crate::shared::errors::{AppError, AppResult};
use std::path::PathBuf;

/// アプリケーションの実行環境を表す列挙型
#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    /// 開発環境
    Development,
    /// プロダクション環境
    Production,
}

/// 環境設定を管理する構造体
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// 実行環境
    pub environment: String,
    /// デバッグモードの有効/無効
    pub debug_mode: bool,
    /// ログレベル
    pub log_level: String,
}

impl EnvironmentConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # 戻り値
    /// 環境設定
    pub fn from_env() -> Self {
        let environment = get_environment();
        let debug_mode = environment == Environment::Development;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if debug_mode {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        Self {
            environment: format!("{environment:?}").to_lowercase(),
            debug_mode,
            log_level,
        }
    }

    /// プロダクション環境かどうかを判定
    ///
    /// # 戻り値
    /// プロダクション環境の場合はtrue
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 開発環境かどうかを判定
    ///
    /// # 戻り値
    /// 開発環境の場合はtrue
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

/// 現在の実行環境を判定する
///
/// # 戻り値
/// 現在の実行環境（Development または Production）
///
/// # 判定ロジック
/// 1. 実行時環境変数 ENVIRONMENT を確認
/// 2. デバッグビルドの場合は Development
/// 3. リリースビルドの場合は Production
pub fn get_environment() -> Environment {
    // 実行時環境変数を確認
    if let Ok(env_var) = std::env::var("ENVIRONMENT") {
        let env = match env_var.as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        log::debug!("環境判定: 実行時環境変数を使用 -> {env_var} -> {env:?}");
        return env;
    }

    // フォールバック: ビルド設定に基づく判定
    let env = if cfg!(debug_assertions) {
        Environment::Development
    } else {
        Environment::Production
    };
    log::debug!(
        "環境判定: ビルド設定を使用 -> debug_assertions={} -> {env:?}",
        cfg!(debug_assertions)
    );
    env
}

/// サービス全体の設定を管理する構造体
///
/// 外部コラボレータのURL、定期スキャン間隔、データベースパスを保持します。
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Expenseサービスのベースurl（未設定の場合は経費連携をスキップ）
    pub expense_service_url: Option<String>,
    /// Notificationサービスのベースurl（未設定の場合はリマインダー無効）
    pub notification_service_url: Option<String>,
    /// 定期スキャンの間隔（秒）
    pub scan_interval_secs: u64,
    /// データベースファイルパス
    pub database_path: PathBuf,
}

impl ServiceConfig {
    /// 環境変数からサービス設定を読み込む
    ///
    /// # 戻り値
    /// サービス設定、または失敗時はエラー
    pub fn from_env() -> AppResult<Self> {
        let expense_service_url = read_optional_url("EXPENSE_SERVICE_URL")?;
        let notification_service_url = read_optional_url("NOTIFICATION_SERVICE_URL")?;

        let scan_interval_secs = match std::env::var("SCAN_INTERVAL_SECS") {
            Ok(value) => value.parse::<u64>().map_err(|_| {
                AppError::configuration(format!("SCAN_INTERVAL_SECS が不正です: {value}"))
            })?,
            // 基準動作は1分間隔
            Err(_) => 60,
        };
        if scan_interval_secs == 0 {
            return Err(AppError::configuration(
                "SCAN_INTERVAL_SECS は1以上である必要があります",
            ));
        }

        let database_path = match std::env::var("DATABASE_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_database_path()?,
        };

        Ok(Self {
            expense_service_url,
            notification_service_url,
            scan_interval_secs,
            database_path,
        })
    }

    /// 設定の妥当性を検証する
    ///
    /// # 引数
    /// * `env_config` - 環境設定
    ///
    /// # 戻り値
    /// 成功時はOk(())、失敗時はエラー
    ///
    /// # 検証内容
    /// プロダクション環境では両コラボレータURLの設定が必須。
    /// 開発環境では未設定を警告のみで許容します。
    pub fn validate(&self, env_config: &EnvironmentConfig) -> AppResult<()> {
        let mut missing = Vec::new();

        if self.expense_service_url.is_none() {
            missing.push("EXPENSE_SERVICE_URL");
        }
        if self.notification_service_url.is_none() {
            missing.push("NOTIFICATION_SERVICE_URL");
        }

        if missing.is_empty() {
            return Ok(());
        }

        if env_config.is_production() {
            return Err(AppError::configuration(format!(
                "プロダクション環境で必須の設定が未設定です: {}",
                missing.join(", ")
            )));
        }

        log::warn!(
            "未設定の外部サービスURLがあります（開発環境のため続行）: {}",
            missing.join(", ")
        );
        Ok(())
    }
}

/// 任意のURL環境変数を読み込む
///
/// 空文字列は未設定として扱います。
fn read_optional_url(key: &str) -> AppResult<Option<String>> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
                return Err(AppError::configuration(format!(
                    "{key} はhttp(s)のURLである必要があります: {trimmed}"
                )));
            }
            // 末尾スラッシュを除去してパス結合を単純化
            Ok(Some(trimmed.trim_end_matches('/').to_string()))
        }
        Err(_) => Ok(None),
    }
}

/// デフォルトのデータベースファイルパスを取得する
///
/// # 戻り値
/// データディレクトリ配下のデータベースパス、または失敗時はエラー
///
/// # ファイル名の規則
/// - 開発環境: "dev_subscriptions.db"
/// - プロダクション環境: "subscriptions.db"
fn default_database_path() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::configuration("データディレクトリの取得に失敗しました"))?
        .join("subscription-billing");

    let filename = if get_environment() == Environment::Production {
        "subscriptions.db"
    } else {
        "dev_subscriptions.db"
    };

    Ok(data_dir.join(filename))
}

use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subscription_billing::features::billing::{
    BatchOrchestrator, CycleProcessor, HttpExpenseClient, HttpNotificationClient,
};
use subscription_billing::shared::config::EnvironmentConfig;
use subscription_billing::shared::database;
use subscription_billing::shared::errors::AppResult;
use subscription_billing::shared::logging::EventSink;
use subscription_billing::shared::ServiceConfig;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // ログレベルを.envから拾えるよう、環境変数の読み込みを先に行う
    let dotenv_loaded = dotenv::dotenv().is_ok();

    // ログシステムを初期化
    initialize_logging_system();

    if dotenv_loaded {
        info!(".envファイルを読み込みました");
    } else {
        // .envファイルがない場合は無視（本番環境では環境変数が直接設定される）
        warn!(".envファイルが見つかりません。環境変数が直接設定されていることを確認してください。");
    }

    if let Err(e) = run().await {
        error!("サービスの起動に失敗しました: {}", e.details());
        std::process::exit(1);
    }
}

/// サービス本体を起動する
async fn run() -> AppResult<()> {
    info!("サービス初期化を開始します...");

    // 設定の読み込みと検証
    let env_config = EnvironmentConfig::from_env();
    let config = ServiceConfig::from_env()?;
    config.validate(&env_config)?;

    // データベースを初期化
    info!("データベースを初期化しています...");
    let conn = database::initialize_database(&config.database_path)?;
    let db = Arc::new(Mutex::new(conn));
    info!("データベースの初期化が完了しました");

    // 観測イベントシンクと外部サービスクライアントを構築
    let sink = EventSink::spawn();
    let expense_client = HttpExpenseClient::new(config.expense_service_url.clone());
    let notification_client = HttpNotificationClient::new(config.notification_service_url.clone());

    let processor = CycleProcessor::new(
        db.clone(),
        expense_client,
        notification_client,
        sink.clone(),
    );
    let orchestrator = BatchOrchestrator::new(
        db,
        processor,
        sink,
        Duration::from_secs(config.scan_interval_secs),
    );

    // Ctrl-Cでバッチ間シャットダウン（実行中のバッチは完了させる）
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-Cを受信しました。シャットダウンします...");
            signal_token.cancel();
        }
    });

    info!("サービス初期化が完了しました");
    orchestrator.run(shutdown).await;

    info!("サービスを終了します");
    Ok(())
}

/// ログシステムを初期化
fn initialize_logging_system() {
    // 環境設定を取得
    let env_config = EnvironmentConfig::from_env();

    // ログレベルを設定
    let log_level = match env_config.log_level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    // env_loggerを初期化
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .init();

    info!(
        "ログシステムを初期化しました: level={}, environment={}",
        env_config.log_level, env_config.environment
    );
}

use annotation_backend::config::Config;
use annotation_backend::dictionary_watcher::DictionaryWatcher;
use annotation_backend::lexicon::LexiconStore;
use annotation_backend::record_store::RecordStore;
use annotation_backend::segmenter::Segmenter;
use annotation_backend::server::{create_router, AppState};
use anyhow::{Context, Result};
use env_logger::Env;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    // 設定を読み込み
    let mut config = Config::load_or_default(config_path)?;
    config.apply_env_overrides();

    log::info!("annotation-backend を起動します");
    log::info!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    // レコードストア
    let store = Arc::new(RecordStore::from_config(&config.storage)?);
    log::info!("データフォルダ: {:?}", store.root());

    // 辞書と監視タスク
    let lexicon = Arc::new(LexiconStore::from_config(&config.dictionary)?);
    let watcher = DictionaryWatcher::new(Arc::clone(&lexicon), config.dictionary.poll_interval());
    let watcher_task = tokio::spawn(watcher.run());

    let segmenter = Arc::new(Segmenter::new(lexicon, &config.segmenter));

    let app = create_router(AppState { segmenter, store });

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("待ち受けに失敗: {}", addr))?;
    log::info!("サーバーを開始しました: http://{} (Ctrl+C で停止)", addr);

    // 停止を待つ
    let shutdown = async move {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("サーバーの実行に失敗")?;

    // クリーンアップ
    log::info!("停止処理を開始します...");
    watcher_task.abort();

    log::info!("annotation-backend を終了しました");

    Ok(())
}

use crate::lexicon::LexiconStore;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// ユーザー辞書ファイルの監視
///
/// 一定間隔でファイルの更新時刻を確認し、変化があれば辞書を再構築する。
/// OSのファイル変更通知は使わず、ポーリングのみで検出する。
///
/// # 状態遷移
///
/// - 更新時刻が前回と異なる（ファイルの作成・削除を含む）→ 再構築を1回実行
/// - 再構築の成否にかかわらず、記録する更新時刻は新しい値に更新する
///   （壊れたファイルで再構築が連続しないように）
pub struct DictionaryWatcher {
    store: Arc<LexiconStore>,
    poll_interval: Duration,
    /// 最後に確認した更新時刻（ファイルがなければ `None`）
    last_modified: Option<SystemTime>,
}

impl DictionaryWatcher {
    /// 監視を作成し、初回の再構築を行う
    ///
    /// 更新時刻は再構築の前に記録するため、その間の変更は次回のポーリングで検出される。
    pub fn new(store: Arc<LexiconStore>, poll_interval: Duration) -> Self {
        let last_modified = modified_time(store.custom_path());

        if let Err(e) = store.rebuild() {
            log::error!("辞書の初回構築に失敗しました。ベース語彙のみで動作します: {:#}", e);
        }

        Self {
            store,
            poll_interval,
            last_modified,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 更新時刻を1回確認し、変化していれば再構築する
    ///
    /// # Returns
    /// * `true` - 再構築を実行した（失敗を含む）
    /// * `false` - 変化なし
    pub fn poll_once(&mut self) -> bool {
        let current = modified_time(self.store.custom_path());
        if current == self.last_modified {
            return false;
        }

        log::info!(
            "ユーザー辞書の変更を検出しました: {:?}",
            self.store.custom_path()
        );
        self.last_modified = current;

        if let Err(e) = self.store.rebuild() {
            log::error!("辞書の再構築に失敗しました。現在の辞書を維持します: {:#}", e);
        }

        true
    }

    /// 監視ループを実行（プロセス終了まで戻らない）
    ///
    /// `tokio::spawn` の中で呼び出す。更新時刻の確認と再構築は
    /// `spawn_blocking` 上で行い、ランタイムのワーカーを止めない。
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // 最初の即時tickをスキップ
        ticker.tick().await;

        log::info!(
            "辞書監視を開始しました: {:?} ({}ms間隔)",
            self.store.custom_path(),
            self.poll_interval.as_millis()
        );

        let mut watcher = self;
        loop {
            ticker.tick().await;
            watcher = match tokio::task::spawn_blocking(move || {
                watcher.poll_once();
                watcher
            })
            .await
            {
                Ok(watcher) => watcher,
                Err(e) => {
                    log::error!("辞書監視タスクが異常終了しました: {}", e);
                    return;
                }
            };
        }
    }
}

/// ファイルの更新時刻を取得
fn modified_time(path: &Path) -> Option<SystemTime> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(time) => Some(time),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            log::debug!("更新時刻を取得できません: {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmenterConfig;
    use crate::segmenter::Segmenter;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store_with(path: &Path) -> Arc<LexiconStore> {
        let base: HashSet<String> = ["ตัด", "คำ"].iter().map(|w| w.to_string()).collect();
        Arc::new(LexiconStore::new(base, path))
    }

    /// 更新時刻を確実に変えて書き込む
    fn write_with_mtime(path: &Path, content: &str, offset_secs: u64) {
        fs::write(path, content).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[test]
    fn test_initial_rebuild_loads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.txt");
        fs::write(&path, "ตัดคำ\n").unwrap();

        let store = store_with(&path);
        let _watcher = DictionaryWatcher::new(Arc::clone(&store), Duration::from_millis(50));

        assert!(store.current().contains("ตัดคำ"));
    }

    #[test]
    fn test_poll_once_detects_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.txt");
        let store = store_with(&path);
        let mut watcher = DictionaryWatcher::new(Arc::clone(&store), Duration::from_millis(50));

        // ファイルなし → 変化なし
        assert!(!watcher.poll_once());

        // ファイル作成
        write_with_mtime(&path, "ตัดคำ\n", 10);
        assert!(watcher.poll_once());
        assert!(store.current().contains("ตัดคำ"));

        // 変化なしなら再構築しない
        let version = store.current().version();
        assert!(!watcher.poll_once());
        assert_eq!(store.current().version(), version);

        // ファイル削除 → ベース語彙のみ
        fs::remove_file(&path).unwrap();
        assert!(watcher.poll_once());
        assert!(!store.current().contains("ตัดคำ"));
        assert!(store.current().contains("ตัด"));
    }

    #[test]
    fn test_failed_rebuild_records_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.txt");
        write_with_mtime(&path, "ตัดคำ\n", 10);

        let store = store_with(&path);
        let mut watcher = DictionaryWatcher::new(Arc::clone(&store), Duration::from_millis(50));
        let good_version = store.current().version();

        // 不正なUTF-8に書き換え
        fs::write(&path, [0xffu8, 0xfe, 0x80]).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(20))
            .unwrap();

        assert!(watcher.poll_once());
        // 古い辞書を維持
        assert_eq!(store.current().version(), good_version);
        assert!(store.current().contains("ตัดคำ"));

        // 同じ更新時刻のままなら再試行しない
        assert!(!watcher.poll_once());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_background_watcher_updates_segmentation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.txt");
        let store = store_with(&path);
        let segmenter = Segmenter::new(Arc::clone(&store), &SegmenterConfig::default());

        let watcher = DictionaryWatcher::new(Arc::clone(&store), Duration::from_millis(50));
        let handle = tokio::spawn(watcher.run());

        assert_eq!(segmenter.segment("ตัดคำ"), vec!["ตัด", "คำ"]);

        write_with_mtime(&path, "ตัดคำ\n", 10);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(segmenter.segment("ตัดคำ"), vec!["ตัดคำ"]);

        fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(segmenter.segment("ตัดคำ"), vec!["ตัด", "คำ"]);
        assert!(!handle.is_finished());

        handle.abort();
    }
}

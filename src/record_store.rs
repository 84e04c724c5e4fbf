use crate::change_token::change_token;
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::record_file::{
    change_line, change_log_header, normalize_key, parse_records, remove_key, render_records,
    sanitize_value, upsert_raw_line, upsert_record,
};
use crate::types::{ChangeToken, MoveOutcome, Record};
use anyhow::{Context, Result};
use atomic_write_file::AtomicWriteFile;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// データフォルダ内のTSVファイルをキー付きレコード集合として扱うストア
///
/// 書き換えはすべて「全体を読み込み → 変更 → 一時ファイルに全体を書き込み → 置換」で行い、
/// 書き込み途中で失敗しても元のファイルは壊れない。
/// 同じファイルへの更新はパスごとのロックで直列化する。
pub struct RecordStore {
    root: PathBuf,
    trash_file: String,
    change_log_file: String,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RecordStore {
    pub fn new<P: AsRef<Path>>(root: P, trash_file: &str, change_log_file: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            trash_file: trash_file.to_string(),
            change_log_file: change_log_file.to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 設定からストアを作成
    ///
    /// データフォルダが存在しない場合は作成する。
    ///
    /// # Errors
    ///
    /// データフォルダの作成に失敗した場合にエラーを返す。
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let root = config.data_dir();
        fs::create_dir_all(&root)
            .with_context(|| format!("データフォルダの作成に失敗: {:?}", root))?;
        Ok(Self::new(root, &config.trash_file, &config.change_log_file))
    }

    /// データフォルダ
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// ゴミ箱ファイル名
    pub fn trash_file(&self) -> &str {
        &self.trash_file
    }

    /// ファイル名をデータフォルダ内のパスに解決
    ///
    /// 絶対パスや `..` を含むファイル名は拒否する。
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(filename);
        let valid = !filename.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StoreError::InvalidFileName(filename.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// ファイル内容をそのまま読み込み
    ///
    /// ファイルが存在しない場合は空文字列を返す。
    pub fn load(&self, filename: &str) -> Result<String, StoreError> {
        let path = self.resolve(filename)?;
        Ok(read_optional(&path)?.unwrap_or_default())
    }

    /// ファイル全体を上書き
    pub fn save(&self, filename: &str, content: &str) -> Result<(), StoreError> {
        let path = self.resolve(filename)?;
        self.with_locks(&[path.as_path()], || {
            write_atomic(&path, content)?;
            log::debug!("ファイルを保存しました: {:?} ({}バイト)", path, content.len());
            Ok(())
        })
    }

    /// レコード一覧を取得
    pub fn records(&self, filename: &str) -> Result<Vec<Record>, StoreError> {
        let path = self.resolve(filename)?;
        Ok(read_optional(&path)?
            .map(|content| parse_records(&content))
            .unwrap_or_default())
    }

    /// キーが一致するレコードを更新、なければ追加
    ///
    /// 値の改行は空白に置き換えて保存する。キーは [`normalize_key`] で正規化する。
    ///
    /// # Examples
    ///
    /// ```
    /// # use annotation_backend::record_store::RecordStore;
    /// # let dir = tempfile::TempDir::new().unwrap();
    /// let store = RecordStore::new(dir.path(), "trash.tsv", "ListOfChange.tsv");
    /// store.upsert("Correct.tsv", "clip1.wav", "hello").unwrap();
    /// store.upsert("Correct.tsv", "clip1.wav", "hello world").unwrap();
    /// assert_eq!(
    ///     store.load("Correct.tsv").unwrap(),
    ///     "filename\ttext\nclip1.wav\thello world\n"
    /// );
    /// ```
    pub fn upsert(&self, filename: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.resolve(filename)?;
        let key = normalize_key(key);
        self.with_locks(&[path.as_path()], || {
            let mut records = read_optional(&path)?
                .map(|content| parse_records(&content))
                .unwrap_or_default();

            upsert_record(&mut records, &key, &sanitize_value(value));

            write_atomic(&path, &render_records(&records))?;
            log::debug!("レコードを保存しました: {:?} キー={} ({}件)", path, key, records.len());
            Ok(())
        })
    }

    /// キーが一致するレコードを削除
    ///
    /// キーは [`upsert`](Self::upsert) と同じく正規化してから比較する。
    /// ファイルが存在しない、または空の場合は何もしない。
    ///
    /// # Returns
    /// 削除した行数
    pub fn delete(&self, filename: &str, key: &str) -> Result<usize, StoreError> {
        let path = self.resolve(filename)?;
        self.with_locks(&[path.as_path()], || {
            let Some(content) = read_optional(&path)? else {
                log::debug!("削除対象のファイルがありません: {:?}", path);
                return Ok(0);
            };
            let Some(removal) = remove_key(&content, key) else {
                return Ok(0);
            };

            if !removal.removed.is_empty() {
                write_atomic(&path, &removal.content)?;
                log::debug!("レコードを削除しました: {:?} キー={}", path, key);
            }
            Ok(removal.removed.len())
        })
    }

    /// レコードをゴミ箱ファイルへ移動
    ///
    /// 移動元から削除した行を、そのままの形でゴミ箱に追加（同じキーがあれば置換）する。
    /// ゴミ箱を先に書き込むため、途中で失敗してもレコードは失われない。
    /// キーが見つからない場合はどちらのファイルも変更しない。
    pub fn move_to_trash(&self, source: &str, key: &str) -> Result<MoveOutcome, StoreError> {
        let source_path = self.resolve(source)?;
        let trash_path = self.resolve(&self.trash_file)?;
        if source_path == trash_path {
            return Err(StoreError::SameFile(source.to_string()));
        }

        self.with_locks(&[source_path.as_path(), trash_path.as_path()], || {
            let Some(content) = read_optional(&source_path)? else {
                return Ok(MoveOutcome::NotFound);
            };
            let Some(removal) = remove_key(&content, key).filter(|r| !r.removed.is_empty())
            else {
                return Ok(MoveOutcome::NotFound);
            };

            let mut trash = read_optional(&trash_path)?;
            for line in &removal.removed {
                trash = Some(upsert_raw_line(trash.as_deref(), key, line));
            }
            if let Some(trash) = &trash {
                write_atomic(&trash_path, trash)?;
            }
            write_atomic(&source_path, &removal.content)?;

            log::info!(
                "ゴミ箱へ移動しました: {} ({} → {})",
                normalize_key(key),
                source,
                self.trash_file
            );
            Ok(MoveOutcome::Moved)
        })
    }

    /// 修正履歴に1行追記
    ///
    /// 既存の行は書き換えない。ファイルがなければヘッダー付きで作成する。
    pub fn append_change(&self, original: &str, changed: &str) -> Result<(), StoreError> {
        let path = self.resolve(&self.change_log_file)?;
        self.with_locks(&[path.as_path()], || {
            let mut line = if path.exists() {
                String::new()
            } else {
                change_log_header()
            };
            line.push_str(&change_line(original, changed));

            ensure_parent(&path)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StoreError::io(&path, e))?;
            file.write_all(line.as_bytes())
                .map_err(|e| StoreError::io(&path, e))
        })
    }

    /// ファイルの変更検知トークン
    pub fn mtime(&self, filename: &str) -> Result<ChangeToken, StoreError> {
        let path = self.resolve(filename)?;
        Ok(change_token(&path))
    }

    /// パスごとのロックを取得して `f` を実行
    ///
    /// 複数のパスは常にパス順でロックする（デッドロック回避）。
    /// 実行後、他に使用者のいないロックはマップから取り除く。
    fn with_locks<T, F>(&self, paths: &[&Path], f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
    {
        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();

        let locks: Vec<Arc<Mutex<()>>> = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            paths
                .iter()
                .map(|path| Arc::clone(map.entry(path.to_path_buf()).or_default()))
                .collect()
        };

        let result = {
            let _guards: Vec<MutexGuard<'_, ()>> = locks
                .iter()
                .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
                .collect();
            f()
        };

        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for (path, lock) in paths.iter().zip(locks) {
            // マップとこのハンドルのみ
            if Arc::strong_count(&lock) == 2 {
                map.remove(*path);
            }
        }

        result
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// ファイルを読み込み（存在しなければ `None`）
fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }
    Ok(())
}

/// 一時ファイルに全体を書き込んでから置換
///
/// コミット前に失敗した場合、一時ファイルは破棄され元のファイルは変わらない。
fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let mut file = AtomicWriteFile::open(path).map_err(|e| StoreError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    file.commit().map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> RecordStore {
        RecordStore::new(dir.path(), "trash.tsv", "ListOfChange.tsv")
    }

    #[test]
    fn test_correct_tsv_scenario() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("Correct.tsv"), "filename\ttext\nclip1.wav\thello\n").unwrap();

        store.upsert("Correct.tsv", "clip1.wav", "hello world").unwrap();
        assert_eq!(
            store.load("Correct.tsv").unwrap(),
            "filename\ttext\nclip1.wav\thello world\n"
        );

        store.delete("Correct.tsv", "clip1.wav").unwrap();
        assert_eq!(store.load("Correct.tsv").unwrap(), "filename\ttext\n");
    }

    #[test]
    fn test_upsert_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert("fail.tsv", "clip1.wav", "สวัสดี\tครับ").unwrap();
        store.upsert("fail.tsv", "clip2.wav", "line1\nline2").unwrap();

        let records = store.records("fail.tsv").unwrap();
        assert_eq!(
            records,
            vec![
                Record::new("clip1.wav", "สวัสดี\tครับ"),
                Record::new("clip2.wav", "line1 line2"),
            ]
        );
    }

    #[test]
    fn test_upsert_twice_keeps_single_record() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert("Correct.tsv", "a", "v1").unwrap();
        store.upsert("Correct.tsv", "b", "x").unwrap();
        store.upsert("Correct.tsv", "a", "v2").unwrap();

        let records = store.records("Correct.tsv").unwrap();
        assert_eq!(records, vec![Record::new("a", "v2"), Record::new("b", "x")]);
    }

    #[test]
    fn test_upsert_into_headerless_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("Correct.tsv"), "a\t1\n").unwrap();

        store.upsert("Correct.tsv", "b", "2").unwrap();
        assert_eq!(
            store.load("Correct.tsv").unwrap(),
            "filename\ttext\na\t1\nb\t2\n"
        );
    }

    #[test]
    fn test_delete_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
            store.upsert("Correct.tsv", key, value).unwrap();
        }

        assert_eq!(store.delete("Correct.tsv", "b").unwrap(), 1);

        let records = store.records("Correct.tsv").unwrap();
        assert_eq!(
            records,
            vec![
                Record::new("a", "1"),
                Record::new("c", "3"),
                Record::new("d", "4")
            ]
        );
    }

    #[test]
    fn test_delete_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.delete("missing.tsv", "a").unwrap(), 0);
        assert!(!dir.path().join("missing.tsv").exists());
    }

    #[test]
    fn test_delete_empty_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("empty.tsv"), "").unwrap();
        assert_eq!(store.delete("empty.tsv", "a").unwrap(), 0);
        assert_eq!(store.load("empty.tsv").unwrap(), "");
    }

    #[test]
    fn test_move_to_trash() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        // 改行除去前の値（タブを含む）がそのまま移動することを確認
        fs::write(
            dir.path().join("Correct.tsv"),
            "filename\ttext\nclip1.wav\thello\tworld\nclip2.wav\tbye\n",
        )
        .unwrap();

        let outcome = store.move_to_trash("Correct.tsv", "clip1.wav").unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);

        assert_eq!(
            store.load("Correct.tsv").unwrap(),
            "filename\ttext\nclip2.wav\tbye\n"
        );
        assert_eq!(
            store.load("trash.tsv").unwrap(),
            "filename\ttext\nclip1.wav\thello\tworld\n"
        );
    }

    #[test]
    fn test_move_to_trash_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let original = "filename\ttext\nclip2.wav\tbye\n";
        fs::write(dir.path().join("Correct.tsv"), original).unwrap();
        fs::write(dir.path().join("trash.tsv"), "filename\ttext\nold.wav\tx\n").unwrap();

        let outcome = store.move_to_trash("Correct.tsv", "clip1.wav").unwrap();
        assert_eq!(outcome, MoveOutcome::NotFound);
        assert_eq!(store.load("Correct.tsv").unwrap(), original);
        assert_eq!(
            store.load("trash.tsv").unwrap(),
            "filename\ttext\nold.wav\tx\n"
        );

        let outcome = store.move_to_trash("missing.tsv", "clip1.wav").unwrap();
        assert_eq!(outcome, MoveOutcome::NotFound);
    }

    #[test]
    fn test_move_to_trash_same_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.move_to_trash("trash.tsv", "a").unwrap_err();
        assert!(matches!(err, StoreError::SameFile(_)));
    }

    #[test]
    fn test_append_change() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.append_change("ผิด", "ถูก").unwrap();
        store.append_change("teh", "the").unwrap();
        store.append_change("teh", "the").unwrap();

        assert_eq!(
            store.load("ListOfChange.tsv").unwrap(),
            "original\tchanged\nผิด\tถูก\nteh\tthe\nteh\tthe\n"
        );
    }

    #[test]
    fn test_load_and_save() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert_eq!(store.load("notes.txt").unwrap(), "");
        store.save("sub/notes.txt", "raw\ncontent").unwrap();
        assert_eq!(store.load("sub/notes.txt").unwrap(), "raw\ncontent");
        store.save("sub/notes.txt", "overwritten").unwrap();
        assert_eq!(store.load("sub/notes.txt").unwrap(), "overwritten");
    }

    #[test]
    fn test_invalid_file_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for name in ["", "../secret.tsv", "/etc/passwd", "a/../../b.tsv"] {
            let err = store.load(name).unwrap_err();
            assert!(matches!(err, StoreError::InvalidFileName(_)), "{}", name);
        }
        assert!(store.resolve("./Correct.tsv").is_ok());
    }

    #[test]
    fn test_mtime_increases_after_upsert() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.mtime("Correct.tsv").unwrap().is_absent());

        store.upsert("Correct.tsv", "a", "1").unwrap();
        let path = dir.path().join("Correct.tsv");
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        let before = store.mtime("Correct.tsv").unwrap();

        store.upsert("Correct.tsv", "a", "2").unwrap();
        let after = store.mtime("Correct.tsv").unwrap();
        assert!(after.mtime > before.mtime);
    }

    #[test]
    fn test_key_with_tab_can_be_deleted_after_upsert() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert("Correct.tsv", "a\tb.wav", "v1").unwrap();
        store.upsert("Correct.tsv", "a\tb.wav", "v2").unwrap();
        assert_eq!(
            store.records("Correct.tsv").unwrap(),
            vec![Record::new("a b.wav", "v2")]
        );

        assert_eq!(store.delete("Correct.tsv", "a\tb.wav").unwrap(), 1);
        assert!(store.records("Correct.tsv").unwrap().is_empty());
    }

    #[test]
    fn test_key_with_newline_can_be_moved_after_upsert() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert("Correct.tsv", "a\nb.wav", "text").unwrap();
        let outcome = store.move_to_trash("Correct.tsv", "a\nb.wav").unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);

        assert!(store.records("Correct.tsv").unwrap().is_empty());
        assert_eq!(
            store.records("trash.tsv").unwrap(),
            vec![Record::new("a b.wav", "text")]
        );
    }

    #[test]
    fn test_lock_map_does_not_grow() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for i in 0..1000 {
            store.delete(&format!("missing_{}.tsv", i), "k").unwrap();
        }
        store.upsert("Correct.tsv", "a", "1").unwrap();
        store.move_to_trash("Correct.tsv", "a").unwrap();
        store.append_change("x", "y").unwrap();
        store.save("notes.txt", "raw").unwrap();

        assert_eq!(store.lock_count(), 0);
    }

    #[test]
    fn test_concurrent_upserts_do_not_lose_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .upsert("Correct.tsv", &format!("clip_{}_{}.wav", t, i), "text")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.records("Correct.tsv").unwrap().len(), 80);
        assert_eq!(store.lock_count(), 0);
    }
}

use regex_lite::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 音声ファイルとして扱う拡張子
fn audio_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\.(wav|mp3|m4a|flac)$").expect("固定パターン"))
}

/// ファイル名が音声ファイルかどうか
pub fn is_audio_file(name: &str) -> bool {
    audio_pattern().is_match(name)
}

/// 走査の起点を決定
///
/// 指定パスが存在しなければデータフォルダからの相対パスとして再試行する。
/// どちらも存在しない場合は `None`。
pub fn resolve_scan_root(path: &str, data_root: &Path) -> Option<PathBuf> {
    let direct = PathBuf::from(path);
    if direct.exists() {
        return Some(direct);
    }
    let internal = data_root.join(path);
    internal.exists().then_some(internal)
}

/// 音声ファイルを再帰的に列挙
///
/// 結果は絶対パスで、ソート済み。
/// 読み取れないサブディレクトリは読み飛ばし、シンボリックリンクのディレクトリはたどらない。
///
/// # Arguments
/// * `path` - 走査するディレクトリ（存在しなければ `data_root` からの相対パス）
/// * `data_root` - データフォルダ
pub fn scan_audio(path: &str, data_root: &Path) -> Vec<String> {
    let Some(root) = resolve_scan_root(path, data_root) else {
        log::debug!("走査対象が見つかりません: {}", path);
        return Vec::new();
    };
    let root = fs::canonicalize(&root).unwrap_or(root);

    let mut found = Vec::new();
    if root.is_file() {
        if root.file_name().and_then(|n| n.to_str()).is_some_and(is_audio_file) {
            found.push(root.to_string_lossy().into_owned());
        }
        return found;
    }

    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("ディレクトリを読み取れません: {:?}: {}", dir, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let entry_path = entry.path();
            if file_type.is_dir() {
                pending.push(entry_path);
            } else if entry.file_name().to_str().is_some_and(is_audio_file) {
                found.push(entry_path.to_string_lossy().into_owned());
            }
        }
    }

    found.sort();
    log::debug!("音声ファイルを{}件検出しました: {}", found.len(), path);
    found
}

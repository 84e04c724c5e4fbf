use crate::types::ChangeToken;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// ファイルの変更検知トークンを取得
///
/// メタデータのみを参照し、内容は読まない。
/// ファイルが存在しない、または更新時刻を取得できない場合は [`ChangeToken::ABSENT`]。
pub fn change_token(path: &Path) -> ChangeToken {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(time) => time,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("更新時刻を取得できません: {:?}: {}", path, e);
            }
            return ChangeToken::ABSENT;
        }
    };

    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();

    ChangeToken { mtime }
}

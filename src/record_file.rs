//! レコードファイル（TSV）の読み書き形式
//!
//! I/Oを伴わない純粋な変換のみを扱う。
//!
//! # ファイル形式
//!
//! ```text
//! filename<TAB>text
//! clip1.wav<TAB>สวัสดีครับ
//! clip2.wav<TAB>hello<TAB>world
//! ```
//!
//! - 1列目がキー、2列目以降をタブで再結合したものが値
//! - 列が2つ未満の行はレコードとして扱わない
//! - 1行目がヘッダーと一致する場合のみヘッダーとして読み飛ばす。
//!   一致しない1行目はデータ行として扱う

use crate::types::{Record, CHANGE_LOG_HEADER, FIELD_DELIMITER, RECORD_HEADER};

/// 値の改行を除去（`\n` は空白、`\r` は削除）
///
/// `\r\n` は空白1つになる。タブは値の一部として残す。
pub fn sanitize_value(value: &str) -> String {
    value.replace('\n', " ").replace('\r', "")
}

/// キーや修正履歴の列を1列に収まるように整える
///
/// 改行に加えてタブも空白に置き換える。
pub fn sanitize_field(field: &str) -> String {
    sanitize_value(field).replace(FIELD_DELIMITER, " ")
}

/// レコードキーの正規化
///
/// キーが1列目に収まるように [`sanitize_field`] を適用する。
/// 追加・削除・移動のすべてでこの形のキーを比較に使う。
pub fn normalize_key(key: &str) -> String {
    sanitize_field(key)
}

/// 1行をレコードとしてパース
///
/// 空行や列が2つ未満の行は `None`。
pub fn parse_line(line: &str) -> Option<Record> {
    if line.trim().is_empty() {
        return None;
    }
    let (key, value) = line.split_once(FIELD_DELIMITER)?;
    Some(Record::new(key, value))
}

/// 行の1列目（キー）
pub fn line_key(line: &str) -> &str {
    line.split(FIELD_DELIMITER).next().unwrap_or(line)
}

fn is_header(line: &str) -> bool {
    line.trim() == RECORD_HEADER
}

/// ファイル内容をレコード列にパース
pub fn parse_records(content: &str) -> Vec<Record> {
    let mut lines = content.lines().peekable();
    if lines.peek().is_some_and(|first| is_header(first)) {
        lines.next();
    }
    lines.filter_map(parse_line).collect()
}

/// ヘッダー付きのファイル内容を生成
///
/// 値は書き込み時に改行を除去する。
pub fn render_records(records: &[Record]) -> String {
    let mut content = String::with_capacity(RECORD_HEADER.len() + 1 + records.len() * 32);
    content.push_str(RECORD_HEADER);
    content.push('\n');
    for record in records {
        content.push_str(&record.key);
        content.push(FIELD_DELIMITER);
        content.push_str(&sanitize_value(&record.value));
        content.push('\n');
    }
    content
}

/// キーが一致するレコードを更新、なければ末尾に追加
///
/// 更新時は元の位置を保つ。
pub fn upsert_record(records: &mut Vec<Record>, key: &str, value: &str) {
    match records.iter_mut().find(|r| r.key == key) {
        Some(record) => record.value = value.to_string(),
        None => records.push(Record::new(key, value)),
    }
}

/// [`remove_key`] の結果
#[derive(Debug, PartialEq, Eq)]
pub struct KeyRemoval {
    /// 書き戻す内容
    pub content: String,
    /// 削除した行（元の文字列のまま）
    pub removed: Vec<String>,
}

/// キーが一致する行を削除
///
/// 1行目は内容にかかわらずヘッダーとしてそのまま残す。
/// 空行は取り除き、残りの行は順序を保つ。
/// キーは [`normalize_key`] してから比較する。内容が空なら `None`。
pub fn remove_key(content: &str, key: &str) -> Option<KeyRemoval> {
    let key = normalize_key(key);
    let mut lines = content.lines();
    let header = lines.next()?;

    let mut kept = vec![header];
    let mut removed = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if line_key(line) == key {
            removed.push(line.to_string());
        } else {
            kept.push(line);
        }
    }

    Some(KeyRemoval {
        content: join_lines(&kept),
        removed,
    })
}

/// 元の行をそのまま使ってキー単位で追加・置換
///
/// ゴミ箱への移動で使う。既存内容がなければヘッダーを付ける。
pub fn upsert_raw_line(existing: Option<&str>, key: &str, raw_line: &str) -> String {
    let key = normalize_key(key);
    let mut lines: Vec<&str> = existing
        .map(|content| content.lines().filter(|l| !l.trim().is_empty()).collect())
        .unwrap_or_default();

    if lines.first().map_or(true, |first| !is_header(first)) {
        lines.insert(0, RECORD_HEADER);
    }

    match lines.iter().skip(1).position(|line| line_key(line) == key) {
        Some(index) => lines[index + 1] = raw_line,
        None => lines.push(raw_line),
    }

    join_lines(&lines)
}

/// 修正履歴の1行
pub fn change_line(original: &str, changed: &str) -> String {
    format!(
        "{}{}{}\n",
        sanitize_field(original),
        FIELD_DELIMITER,
        sanitize_field(changed)
    )
}

/// 修正履歴ファイルのヘッダー行（改行付き）
pub fn change_log_header() -> String {
    format!("{}\n", CHANGE_LOG_HEADER)
}

fn join_lines(lines: &[&str]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

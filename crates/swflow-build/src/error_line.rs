//! ビルダー出力の最終行に現れる構造化エラー
//!
//! `{"error": "...", "errorDetail": {"message": "..."}}`

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorRecord {
    pub error: String,
    /// `errorDetail`
    pub error_detail: ErrorDetail,
}

impl ErrorRecord {
    /// 詳細メッセージ（空なら None）
    pub fn detail(&self) -> Option<&str> {
        Some(self.error_detail.message.as_str()).filter(|m| !m.is_empty())
    }
}

/// 1行を解析
///
/// 文字列の `error` を持つ JSON オブジェクトだけを構造化エラーとみなします。
/// 配列やスカラー、`error` が空のものは None。
pub fn parse_error_line(line: &str) -> Option<ErrorRecord> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let object = value.as_object()?;
    let error = object.get("error")?.as_str().filter(|e| !e.is_empty())?;

    let error_detail = object
        .get("errorDetail")
        .cloned()
        .and_then(|detail| serde_json::from_value(detail).ok())
        .unwrap_or_default();

    Some(ErrorRecord {
        error: error.to_string(),
        error_detail,
    })
}

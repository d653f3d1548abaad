//! ベースイメージの設定解決
//!
//! イメージの `ENV` / `USER` / `WORKDIR` を状態の初期値として取り込みます。
//! 解決しない場合は既定の PATH だけを持つ状態になります。

use crate::error::Result;
use crate::state::Platform;

/// イメージ設定のうち、実行ステップの環境になる部分
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    /// `KEY=VALUE` 形式
    pub env: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
}

impl ImageConfig {
    /// 環境変数をキーと値の組に分解（後勝ち）
    pub(crate) fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for entry in &self.env {
            let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            if key.is_empty() {
                continue;
            }
            pairs.retain(|(k, _)| k != key);
            pairs.push((key.to_string(), value.to_string()));
        }
        pairs
    }
}

/// イメージ参照から設定を取得する
///
/// 実装はデーモンクライアントのアダプタとテスト用のフェイク。
#[allow(async_fn_in_trait)]
pub trait ImageMetaResolver {
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ImageConfig>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_pairs() {
        let config = ImageConfig {
            env: vec![
                "PATH=/opt/java/bin:/usr/bin".to_string(),
                "JAVA_OPTS=-Xmx1g -Dkey=value".to_string(),
                "EMPTY".to_string(),
                "=ignored".to_string(),
                "PATH=/usr/bin".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.env_pairs(),
            vec![
                ("JAVA_OPTS".to_string(), "-Xmx1g -Dkey=value".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ]
        );
    }
}

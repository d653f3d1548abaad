//! swflow tool configuration
//!
//! ビルドデーモン、ビルダーコマンド、ベースイメージ、出力先の既定値を保持し、
//! 任意の YAML 設定ファイルで上書きできるようにします。

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 設定ファイルの候補名（作業ディレクトリ内）
const LOCAL_CANDIDATES: [&str; 2] = [".swflow.yaml", "swflow.yaml"];

/// ツール全体の設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub buildkit: BuildkitConfig,
    pub builder: BuilderConfig,
    pub images: ImagesConfig,
    pub output: OutputConfig,
}

/// BuildKit デーモンコンテナの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildkitConfig {
    pub image: String,
    pub container_name: String,
}

impl Default for BuildkitConfig {
    fn default() -> Self {
        Self {
            image: "moby/buildkit:latest".to_string(),
            container_name: "buildkitd".to_string(),
        }
    }
}

/// 外部ビルダー（buildctl）の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub program: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            program: "buildctl".to_string(),
        }
    }
}

/// ビルドグラフで使うベースイメージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Quarkus プロジェクトをパッケージングするイメージ
    pub builder: String,
    /// 実行用イメージ
    pub runtime: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            builder: "quay.io/lmotta/kn-workflow:2.10.0.Final".to_string(),
            runtime: "openjdk:11".to_string(),
        }
    }
}

/// 出力先の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// マニフェスト出力ディレクトリ（type=local）
    pub local_dir: String,
    /// イメージアーカイブ（type=oci）
    pub archive: String,
    /// セッション経由のダウンロード先
    pub download_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            local_dir: "output".to_string(),
            archive: "output.tar".to_string(),
            // 既存の挙動に合わせて "kubernets" のまま
            download_dir: "./kubernets".to_string(),
        }
    }
}

/// swflow のグローバル設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("swflow"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 SWFLOW_CONFIG_PATH (直接パス指定)
/// 2. 作業ディレクトリ: .swflow.yaml, swflow.yaml
/// 3. ~/.config/swflow/config.yaml (グローバル設定)
pub fn find_config_file(working_dir: &Path) -> Option<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("SWFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(
            "SWFLOW_CONFIG_PATH が存在しないファイルを指しています: {}",
            path.display()
        );
    }

    // 2. 作業ディレクトリで検索
    for filename in &LOCAL_CANDIDATES {
        let path = working_dir.join(filename);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. グローバル設定ファイル
    let global = get_config_dir().ok()?.join("config.yaml");
    global.exists().then_some(global)
}

/// 設定をロード（ファイルがなければ既定値）
pub fn load(working_dir: &Path) -> Result<ToolConfig> {
    match find_config_file(working_dir) {
        Some(path) => load_from(&path),
        None => {
            tracing::debug!("設定ファイルなし、既定値を使用します");
            Ok(ToolConfig::default())
        }
    }
}

/// 指定したパスの設定ファイルを読み込む
pub fn load_from(path: &Path) -> Result<ToolConfig> {
    tracing::debug!("Loading config: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(ToolConfig::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

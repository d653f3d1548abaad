use crate::stage::StageKind;
use swflow_container::ContainerError;
use swflow_llb::LlbError;
use swflow_session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("either --image or --image-name should be used")]
    MissingImageName,

    #[error("不正なイメージ名 '{name}': {reason}")]
    InvalidImageName { name: String, reason: String },

    #[error("不正なイメージタグ '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("ビルドの準備に失敗しました: {0}")]
    Setup(String),

    #[error(transparent)]
    Daemon(#[from] ContainerError),

    #[error("ビルドグラフの構築に失敗しました: {0}")]
    Graph(#[from] LlbError),

    #[error("セッションエラー: {0}")]
    Session(#[from] SessionError),

    #[error("[{stage}] ビルダーを起動できません: {source}")]
    StageLaunch {
        stage: StageKind,
        #[source]
        source: std::io::Error,
    },

    #[error("[{stage}] ビルダーが失敗しました ({status})")]
    StageFailed { stage: StageKind, status: String },

    /// ビルダーが最終行に出力した構造化エラー
    #[error("[{stage}] {message}")]
    StageError {
        stage: StageKind,
        message: String,
        detail: Option<String>,
    },

    #[error("ビルドは中断されました")]
    Cancelled,
}

impl BuildError {
    /// 失敗したステージ
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            BuildError::StageLaunch { stage, .. }
            | BuildError::StageFailed { stage, .. }
            | BuildError::StageError { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::MissingImageName => "イメージ名が指定されていません\n\
                 \n\
                 解決方法:\n\
                 1. --image で完全なイメージ名を指定してください:\n\
                    swflow build --image quay.io/org/app:1.0\n\
                 2. または --image-name で名前だけを指定してください"
                .to_string(),
            BuildError::StageLaunch { stage, source } => {
                format!(
                    "[{}] ビルダーを起動できません: {}\n\
                     \n\
                     buildctl がインストールされ、PATH に含まれているか確認してください。",
                    stage, source
                )
            }
            BuildError::StageError {
                stage,
                message,
                detail,
            } => match detail {
                Some(detail) if detail != message => {
                    format!("[{}] ビルドに失敗しました: {}\n  詳細: {}", stage, message, detail)
                }
                _ => format!("[{}] ビルドに失敗しました: {}", stage, message),
            },
            BuildError::StageFailed { stage, status } => {
                format!(
                    "[{}] ビルドに失敗しました ({})\n\
                     \n\
                     上のビルドログを確認してください。出力済みの成果物は残されています。",
                    stage, status
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の値を確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("コンテナ '{container}' は既に存在します")]
    ContainerAlreadyExists { container: String },

    #[error(
        "イメージ '{image}' が見つかりません\n\nヒント:\n  • イメージ名とタグを確認してください\n  • docker pull {image} でイメージをダウンロードしてください"
    )]
    ImageNotFound { image: String },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("サポートされていない DOCKER_HOST です: {0}")]
    UnsupportedHost(String),

    #[error("セッション用のコネクションアップグレードに失敗しました: {0}")]
    HijackFailed(String),

    /// Close 済みのクライアントを使おうとした（呼び出し側の不具合）
    #[error("クライアントは既にクローズされています")]
    ClientClosed,

    #[error("クライアントは既にクローズ済みです（二重クローズ）")]
    AlreadyClosed,
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }
            | bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            } => {
                // 404/409 は呼び出し側で文脈に応じて変換する
                ContainerError::DockerApiError(err.to_string())
            }
            _ => {
                // 接続エラーの可能性をチェック
                let err_str = err.to_string();
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                {
                    ContainerError::DockerConnectionFailed(err_str)
                } else {
                    ContainerError::DockerApiError(err_str)
                }
            }
        }
    }
}

impl From<hyper::Error> for ContainerError {
    fn from(err: hyper::Error) -> Self {
        ContainerError::HijackFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

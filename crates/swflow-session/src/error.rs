use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("セッション用コネクションを確立できません: {0}")]
    Dial(String),

    #[error("セッションコネクションエラー: {0}")]
    Connection(#[from] hyper::Error),

    #[error("同期ディレクトリ '{0}' は公開されていません")]
    UnknownDir(String),

    #[error("不正なパターン '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("不正なパス: {0}")]
    InvalidPath(String),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for tonic::Status {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::UnknownDir(_) => tonic::Status::not_found(err.to_string()),
            SessionError::InvalidPattern { .. } | SessionError::InvalidPath(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

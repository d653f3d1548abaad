use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlbError {
    #[error("コマンドを分割できません（クォートが閉じていません）: {0}")]
    InvalidCommand(String),

    #[error("空のコマンドは実行できません")]
    EmptyCommand,

    #[error("イメージ '{reference}' の設定を取得できません: {message}")]
    ImageResolve { reference: String, message: String },

    #[error("定義のデコードに失敗しました: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LlbError>;

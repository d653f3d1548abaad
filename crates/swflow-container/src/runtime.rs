use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;

/// コンテナ作成のパラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub privileged: bool,
    pub auto_remove: bool,
}

/// イメージ設定のうち、ビルドステップの実行環境になる部分
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMeta {
    /// `KEY=VALUE` 形式
    pub env: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
}

/// デーモンに対して実行する操作
///
/// 実装は Docker デーモン（[`crate::DaemonClient`]）とテスト用のフェイク。
#[allow(async_fn_in_trait)]
pub trait DaemonApi: Send + Sync + 'static {
    /// アップグレード後の双方向コネクション
    type Conn: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static;

    /// コンテナを作成し、IDを返す
    ///
    /// 同名コンテナが存在する場合は `ContainerError::ContainerAlreadyExists`。
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// ローカルにあるイメージの設定を取得
    ///
    /// イメージがなければ `ContainerError::ImageNotFound`。
    async fn inspect_image(&self, reference: &str) -> Result<ImageMeta>;

    /// レジストリからイメージを取得（`platform` は `os/arch`）
    async fn pull_image(&self, reference: &str, platform: &str) -> Result<()>;

    /// 既存の HTTP コネクションを生の双方向ストリームにアップグレード
    fn dial_hijack(
        &self,
        path: &str,
        proto: &str,
        meta: &HashMap<String, Vec<String>>,
    ) -> impl Future<Output = Result<Self::Conn>> + Send;
}

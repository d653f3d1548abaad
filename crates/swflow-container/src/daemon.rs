//! BuildKit デーモンコンテナのライフサイクル管理

use crate::error::{ContainerError, Result};
use crate::guard::ClientGuard;
use crate::runtime::{ContainerSpec, DaemonApi};

/// ensure_running の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    /// 新しくコンテナを作成して起動した
    Started { id: String },
    /// 同名コンテナが既に存在した
    AlreadyRunning,
}

/// BuildKit デーモンコンテナ
#[derive(Debug, Clone)]
pub struct BuildkitDaemon {
    image: String,
    container_name: String,
}

impl Default for BuildkitDaemon {
    fn default() -> Self {
        Self::new("moby/buildkit:latest", "buildkitd")
    }
}

impl BuildkitDaemon {
    pub fn new(image: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            container_name: container_name.into(),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// ビルダーが接続する BUILDKIT_HOST の値
    pub fn host(&self) -> String {
        format!("docker-container://{}", self.container_name)
    }

    pub fn spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            privileged: true,
            auto_remove: true,
        }
    }

    /// デーモンコンテナが起動していることを保証
    ///
    /// 同名コンテナが既にある場合は起動済みとみなします。
    /// それ以外のエラーはすべて致命的です。
    pub async fn ensure_running<C: DaemonApi>(&self, guard: &ClientGuard<C>) -> Result<DaemonStatus> {
        let client = guard.acquire().await?;

        match client.create_container(&self.spec()).await {
            Ok(id) => {
                tracing::info!("Created buildkit container {} ({})", self.container_name, id);
                client.start_container(&id).await?;
                Ok(DaemonStatus::Started { id })
            }
            Err(ContainerError::ContainerAlreadyExists { .. }) => {
                tracing::debug!("buildkit container {} already exists", self.container_name);
                Ok(DaemonStatus::AlreadyRunning)
            }
            Err(e) => Err(e),
        }
    }
}

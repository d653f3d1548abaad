//! クライアントガード経由でベースイメージの設定を解決する

use std::sync::Arc;
use swflow_container::{ClientGuard, ContainerError, DaemonApi, ImageMeta};
use swflow_llb::{ImageConfig, ImageMetaResolver, LlbError, Platform};

/// Docker デーモンのイメージ情報を使うリゾルバ
///
/// ローカルにないイメージは対象プラットフォームで pull してから読み取ります。
pub struct GuardedResolver<C> {
    guard: Arc<ClientGuard<C>>,
}

impl<C> GuardedResolver<C> {
    pub fn new(guard: Arc<ClientGuard<C>>) -> Self {
        Self { guard }
    }
}

fn platform_string(platform: &Platform) -> String {
    if platform.variant.is_empty() {
        format!("{}/{}", platform.os, platform.architecture)
    } else {
        format!(
            "{}/{}/{}",
            platform.os, platform.architecture, platform.variant
        )
    }
}

fn to_config(meta: ImageMeta) -> ImageConfig {
    ImageConfig {
        env: meta.env,
        user: meta.user,
        working_dir: meta.working_dir,
    }
}

impl<C: DaemonApi> ImageMetaResolver for GuardedResolver<C> {
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> swflow_llb::Result<ImageConfig> {
        let resolve_error = |e: ContainerError| LlbError::ImageResolve {
            reference: reference.to_string(),
            message: e.to_string(),
        };
        let client = self.guard.acquire().await.map_err(resolve_error)?;

        let meta = match client.inspect_image(reference).await {
            Ok(meta) => meta,
            Err(ContainerError::ImageNotFound { .. }) => {
                client
                    .pull_image(reference, &platform_string(platform))
                    .await
                    .map_err(resolve_error)?;
                client.inspect_image(reference).await.map_err(resolve_error)?
            }
            Err(e) => return Err(resolve_error(e)),
        };
        Ok(to_config(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_daemon::FakeDaemon;

    fn runtime_meta() -> ImageMeta {
        ImageMeta {
            env: vec!["JAVA_HOME=/usr/local/openjdk-11".to_string()],
            user: None,
            working_dir: Some("/deployments".to_string()),
        }
    }

    #[test]
    fn test_platform_string() {
        assert_eq!(platform_string(&Platform::linux_amd64()), "linux/amd64");
        let arm = Platform {
            os: "linux".to_string(),
            architecture: "arm".to_string(),
            variant: "v7".to_string(),
        };
        assert_eq!(platform_string(&arm), "linux/arm/v7");
    }

    #[tokio::test]
    async fn test_local_image_is_not_pulled() {
        let daemon = FakeDaemon::default().with_local_image("openjdk:11", runtime_meta());
        let guard = Arc::new(ClientGuard::new(daemon));
        let resolver = GuardedResolver::new(guard.clone());

        let config = resolver
            .resolve_image_config("openjdk:11", &Platform::linux_amd64())
            .await
            .unwrap();
        assert_eq!(config.working_dir.as_deref(), Some("/deployments"));
        assert_eq!(config.env, vec!["JAVA_HOME=/usr/local/openjdk-11"]);

        let calls = guard.call(|daemon| daemon.calls()).await.unwrap();
        assert_eq!(calls, ["inspect openjdk:11"]);
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_for_platform() {
        let daemon = FakeDaemon::default().with_remote_image("openjdk:11", runtime_meta());
        let guard = Arc::new(ClientGuard::new(daemon));
        let resolver = GuardedResolver::new(guard.clone());

        let config = resolver
            .resolve_image_config("openjdk:11", &Platform::linux_amd64())
            .await
            .unwrap();
        assert_eq!(config, to_config(runtime_meta()));

        let calls = guard.call(|daemon| daemon.calls()).await.unwrap();
        assert_eq!(
            calls,
            [
                "inspect openjdk:11",
                "pull openjdk:11 linux/amd64",
                "inspect openjdk:11"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_image_fails() {
        let guard = Arc::new(ClientGuard::new(FakeDaemon::without_registry()));
        let resolver = GuardedResolver::new(guard);

        let error = resolver
            .resolve_image_config("quay.io/acme/nothing:1", &Platform::linux_amd64())
            .await
            .unwrap_err();
        assert!(matches!(
            &error,
            LlbError::ImageResolve { reference, .. } if reference == "quay.io/acme/nothing:1"
        ));
    }

    #[tokio::test]
    async fn test_closed_guard_refuses_resolution() {
        let guard = Arc::new(ClientGuard::new(FakeDaemon::default()));
        guard.close().await.unwrap();

        let error = GuardedResolver::new(guard)
            .resolve_image_config("openjdk:11", &Platform::linux_amd64())
            .await
            .unwrap_err();
        assert!(matches!(error, LlbError::ImageResolve { .. }));
    }
}

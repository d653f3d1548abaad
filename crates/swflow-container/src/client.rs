//! Docker デーモンクライアント
//!
//! コンテナ操作は bollard、セッション用のコネクションアップグレード（hijack）は
//! hyper で Docker ソケットに直接リクエストを送って行います。

use crate::error::{ContainerError, Result};
use crate::runtime::{ContainerSpec, DaemonApi, ImageMeta};
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{CreateContainerOptionsBuilder, StartContainerOptions};
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http::{Request, StatusCode, header};
use http_body_util::Empty;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Docker デーモンの接続先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonHost {
    Unix(PathBuf),
    Tcp(String),
}

impl DaemonHost {
    /// DOCKER_HOST から接続先を決定（未設定ならデフォルトソケット）
    pub fn from_env() -> Result<Self> {
        match std::env::var("DOCKER_HOST") {
            Ok(value) if !value.is_empty() => Self::parse(&value),
            _ => Ok(DaemonHost::Unix(PathBuf::from(DEFAULT_DOCKER_SOCKET))),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        if let Some(path) = value.strip_prefix("unix://") {
            return Ok(DaemonHost::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = value
            .strip_prefix("tcp://")
            .or_else(|| value.strip_prefix("http://"))
        {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(ContainerError::UnsupportedHost(value.to_string()));
            }
            return Ok(DaemonHost::Tcp(addr.to_string()));
        }
        Err(ContainerError::UnsupportedHost(value.to_string()))
    }
}

/// Docker デーモンへのハンドル
#[derive(Debug, Clone)]
pub struct DaemonClient {
    docker: Docker,
    host: DaemonHost,
}

impl DaemonClient {
    pub fn new(docker: Docker, host: DaemonHost) -> Self {
        Self { docker, host }
    }

    /// ローカルのデフォルト設定で接続
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(Self::new(docker, DaemonHost::from_env()?))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn host(&self) -> &DaemonHost {
        &self.host
    }

    /// 接続テスト
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(())
    }

    async fn upgrade<T>(
        io: T,
        path: &str,
        proto: &str,
        meta: &HashMap<String, Vec<String>>,
    ) -> Result<Upgraded>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!("hijack connection closed: {}", e);
            }
        });

        let mut request = Request::post(path)
            .header(header::HOST, "docker")
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, proto);
        for (key, values) in meta {
            for value in values {
                request = request.header(key.as_str(), value.as_str());
            }
        }
        let request = request
            .body(Empty::<Bytes>::new())
            .map_err(|e| ContainerError::HijackFailed(e.to_string()))?;

        let response = sender.send_request(request).await?;
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(ContainerError::HijackFailed(format!(
                "unexpected status {} from {}",
                response.status(),
                path
            )));
        }

        Ok(hyper::upgrade::on(response).await?)
    }
}

/// イメージ参照をイメージ名とタグに分離
///
/// レジストリのポート番号はタグとして扱いません。
pub fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((image, tag)) if !tag.contains('/') && !tag.is_empty() => (image, tag),
        _ => (reference, "latest"),
    }
}

impl DaemonApi for DaemonClient {
    type Conn = Upgraded;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                auto_remove: Some(spec.auto_remove),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.docker.create_container(Some(options), body).await {
            Ok(response) => Ok(response.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Err(ContainerError::ContainerAlreadyExists {
                container: spec.name.clone(),
            }),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::ImageNotFound {
                image: spec.image.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageMeta> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => {
                let config = inspect.config.unwrap_or_default();
                Ok(ImageMeta {
                    env: config.env.unwrap_or_default(),
                    user: config.user.filter(|u| !u.is_empty()),
                    working_dir: config.working_dir.filter(|d| !d.is_empty()),
                })
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::ImageNotFound {
                image: reference.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, reference: &str, platform: &str) -> Result<()> {
        let (image, tag) = split_reference(reference);
        tracing::info!("Pulling {}:{} ({})", image, tag, platform);

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: image,
            tag,
            platform,
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(info) = stream.next().await {
            match info {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!("{}: {}", reference, status);
                    }
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => {
                    return Err(ContainerError::ImageNotFound {
                        image: reference.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn dial_hijack(
        &self,
        path: &str,
        proto: &str,
        meta: &HashMap<String, Vec<String>>,
    ) -> Result<Upgraded> {
        tracing::debug!("Dialing {} ({}) via {:?}", path, proto, self.host);
        match &self.host {
            DaemonHost::Unix(socket) => {
                let stream = UnixStream::connect(socket)
                    .await
                    .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
                Self::upgrade(stream, path, proto, meta).await
            }
            DaemonHost::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
                Self::upgrade(stream, path, proto, meta).await
            }
        }
    }
}

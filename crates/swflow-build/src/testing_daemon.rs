//! テスト用のフェイクデーモン

use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::sync::Mutex;
use swflow_container::{ContainerError, ContainerSpec, DaemonApi, ImageMeta};
use tokio::io::DuplexStream;

/// 呼び出しを記録するフェイクデーモン
///
/// hijack の相手側は保持し続けるため、セッションはキャンセルまで待機します。
/// レジストリ上にないイメージの pull は、`without_registry` でなければ
/// 空の設定で成功します。
#[derive(Default)]
pub struct FakeDaemon {
    existing: bool,
    missing_image: bool,
    refuse_hijack: bool,
    no_registry: bool,
    local_images: Mutex<HashMap<String, ImageMeta>>,
    remote_images: HashMap<String, ImageMeta>,
    calls: Mutex<Vec<String>>,
    dials: Mutex<Vec<String>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl FakeDaemon {
    /// 同名コンテナが既に存在する
    pub fn existing() -> Self {
        Self {
            existing: true,
            ..Default::default()
        }
    }

    pub fn missing_image() -> Self {
        Self {
            missing_image: true,
            ..Default::default()
        }
    }

    /// セッションのアップグレードを拒否する
    pub fn refusing_hijack() -> Self {
        Self {
            refuse_hijack: true,
            ..Default::default()
        }
    }

    /// pull できるイメージがない
    pub fn without_registry() -> Self {
        Self {
            no_registry: true,
            ..Default::default()
        }
    }

    /// ローカルに既にあるイメージ
    pub fn with_local_image(self, reference: &str, meta: ImageMeta) -> Self {
        self.local_images
            .lock()
            .unwrap()
            .insert(reference.to_string(), meta);
        self
    }

    /// pull すると取得できるイメージ
    pub fn with_remote_image(mut self, reference: &str, meta: ImageMeta) -> Self {
        self.remote_images.insert(reference.to_string(), meta);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dials(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }
}

impl DaemonApi for FakeDaemon {
    type Conn = TokioIo<DuplexStream>;

    async fn create_container(&self, spec: &ContainerSpec) -> swflow_container::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {} {}", spec.name, spec.image));
        if self.existing {
            return Err(ContainerError::ContainerAlreadyExists {
                container: spec.name.clone(),
            });
        }
        if self.missing_image {
            return Err(ContainerError::ImageNotFound {
                image: spec.image.clone(),
            });
        }
        Ok("abc123".to_string())
    }

    async fn start_container(&self, id: &str) -> swflow_container::Result<()> {
        self.calls.lock().unwrap().push(format!("start {}", id));
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> swflow_container::Result<ImageMeta> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("inspect {}", reference));
        self.local_images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| ContainerError::ImageNotFound {
                image: reference.to_string(),
            })
    }

    async fn pull_image(&self, reference: &str, platform: &str) -> swflow_container::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("pull {} {}", reference, platform));
        let meta = match self.remote_images.get(reference) {
            Some(meta) => meta.clone(),
            None if self.no_registry => {
                return Err(ContainerError::ImageNotFound {
                    image: reference.to_string(),
                });
            }
            None => ImageMeta::default(),
        };
        self.local_images
            .lock()
            .unwrap()
            .insert(reference.to_string(), meta);
        Ok(())
    }

    async fn dial_hijack(
        &self,
        path: &str,
        proto: &str,
        _meta: &HashMap<String, Vec<String>>,
    ) -> swflow_container::Result<Self::Conn> {
        self.dials.lock().unwrap().push(format!("{} {}", path, proto));
        if self.refuse_hijack {
            return Err(ContainerError::HijackFailed("session not supported".to_string()));
        }
        let (io, peer) = tokio::io::duplex(1 << 16);
        self.peers.lock().unwrap().push(peer);
        Ok(TokioIo::new(io))
    }
}

//! ビルドデーモンとのセッション
//!
//! デーモンへの HTTP コネクションを `/session` でアップグレードし、その上で
//! こちら側が gRPC サーバーとして振る舞います。

use crate::error::{Result, SessionError};
use crate::filesync::{FsSyncProvider, FsSyncTarget, SyncedDir, reset_ownership};
use crate::proto::filesync::file_send_server::FileSendServer;
use crate::proto::filesync::file_sync_server::FileSyncServer;
use crate::proto::health::health_server::{Health, HealthServer};
use crate::proto::{HealthCheckRequest, HealthCheckResponse, ServingStatus};
use hyper::body::Incoming;
use hyper_util::rt::TokioExecutor;
use hyper_util::service::TowerToHyperService;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tower::ServiceExt;

/// アップグレード先のパス
pub const SESSION_PATH: &str = "/session";
/// アップグレード後のプロトコル
pub const SESSION_PROTO: &str = "h2c";

const HEADER_UUID: &str = "X-Docker-Expose-Session-Uuid";
const HEADER_NAME: &str = "X-Docker-Expose-Session-Name";
const HEADER_SHARED_KEY: &str = "X-Docker-Expose-Session-Sharedkey";
const HEADER_METHOD: &str = "X-Docker-Expose-Session-Grpc-Method";

const METHOD_HEALTH: &str = "/grpc.health.v1.Health/Check";
const METHOD_FILE_SYNC: &str = "/moby.filesync.v1.FileSync/DiffCopy";
const METHOD_FILE_SEND: &str = "/moby.filesync.v1.FileSend/DiffCopy";

/// セッションの共有キー（作業ディレクトリのパス文字列の SHA-256）
pub fn shared_key(working_dir: &Path) -> String {
    hex::encode(Sha256::digest(working_dir.to_string_lossy().as_bytes()))
}

/// アップグレード済みコネクションを提供する
///
/// 実装はデーモンクライアントのアダプタと、テスト用のインメモリパイプ。
pub trait Dialer: Send + 'static {
    type Conn: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static;

    fn dial(
        &self,
        path: &str,
        proto: &str,
        meta: &HashMap<String, Vec<String>>,
    ) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// セッションに付与する機能
#[derive(Debug, Clone)]
pub enum Capability {
    Upload(FsSyncProvider),
    Download(FsSyncTarget),
}

/// 1 回のパイプライン実行に対応するセッション
#[derive(Debug)]
pub struct Session {
    id: String,
    name: String,
    shared_key: String,
    upload: Option<FsSyncProvider>,
    download: Option<FsSyncTarget>,
}

impl Session {
    /// 作業ディレクトリに紐づくセッションを作成
    pub fn open(working_dir: &Path) -> Self {
        let name = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| working_dir.to_string_lossy().into_owned());
        let session = Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name,
            shared_key: shared_key(working_dir),
            upload: None,
            download: None,
        };
        tracing::debug!(
            "Opened session {} ({}) key={}",
            session.id,
            session.name,
            session.shared_key
        );
        session
    }

    /// ビルドコンテキスト用の標準的な機能を付与
    ///
    /// `context` と `dockerfile` の両方を作業ディレクトリで公開し、
    /// 所有者は uid/gid=0 に書き換えます。
    pub fn grant_workflow(self, working_dir: &Path, download_dir: &Path) -> Self {
        self.grant(Capability::Upload(FsSyncProvider::new([
            SyncedDir::new("context", working_dir).with_map(reset_ownership()),
            SyncedDir::new("dockerfile", working_dir),
        ])))
        .grant(Capability::Download(FsSyncTarget::new(download_dir)))
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Upload(provider) => self.upload = Some(provider),
            Capability::Download(target) => self.download = Some(target),
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_key(&self) -> &str {
        &self.shared_key
    }

    /// 公開する gRPC メソッド
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods = vec![METHOD_HEALTH];
        if self.upload.is_some() {
            methods.push(METHOD_FILE_SYNC);
        }
        if self.download.is_some() {
            methods.push(METHOD_FILE_SEND);
        }
        methods
    }

    /// アップグレード要求に付けるヘッダー
    pub fn metadata(&self) -> HashMap<String, Vec<String>> {
        let mut meta = HashMap::new();
        meta.insert(HEADER_UUID.to_string(), vec![self.id.clone()]);
        meta.insert(HEADER_NAME.to_string(), vec![self.name.clone()]);
        meta.insert(HEADER_SHARED_KEY.to_string(), vec![self.shared_key.clone()]);
        meta.insert(
            HEADER_METHOD.to_string(),
            self.methods().into_iter().map(str::to_string).collect(),
        );
        meta
    }

    fn routes(&self) -> Routes {
        let mut routes = Routes::new(HealthServer::new(HealthService));
        if let Some(provider) = &self.upload {
            routes = routes.add_service(FileSyncServer::new(provider.clone()));
        }
        if let Some(target) = &self.download {
            routes = routes.add_service(FileSendServer::new(target.clone()));
        }
        routes
    }

    /// コネクションを取得してセッションを処理
    ///
    /// トークンがキャンセルされるか、コネクションが閉じるまで戻りません。
    pub async fn run<D: Dialer>(self, token: CancellationToken, dialer: D) -> Result<()> {
        let meta = self.metadata();
        let conn = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            conn = dialer.dial(SESSION_PATH, SESSION_PROTO, &meta) => conn?,
        };
        tracing::info!("Session {} attached", self.id);
        self.serve(conn, token).await
    }

    /// 確立済みのコネクション上で gRPC を処理
    pub async fn serve<IO>(self, io: IO, token: CancellationToken) -> Result<()>
    where
        IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        // tonic の Routes は BoxBody のリクエストしか受け付けない
        let routes = self
            .routes()
            .map_request(|request: http::Request<Incoming>| request.map(tonic::body::boxed));
        let service = TowerToHyperService::new(routes);
        let builder = hyper::server::conn::http2::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                result?;
                tracing::debug!("Session {} connection closed", self.id);
            }
            _ = token.cancelled() => {
                tracing::debug!("Session {} cancelled", self.id);
            }
        }
        Ok(())
    }
}

/// セッションの生存確認
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthService;

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        _request: tonic::Request<HealthCheckRequest>,
    ) -> std::result::Result<tonic::Response<HealthCheckResponse>, tonic::Status> {
        Ok(tonic::Response::new(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        }))
    }
}

/// Dialer の失敗を表すヘルパー
pub fn dial_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Dial(err.to_string())
}

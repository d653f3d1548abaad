//! 2 ステージのビルドパイプライン
//!
//! `Init → SessionStarting → GraphBuilding → Stage1Running → Stage1Done
//!  → Stage2Running → Stage2Done | Failed`
//!
//! セッションはタスクグループ上で並行に動かし、ステージは直列に実行します。
//! ステージ 2 はステージ 1 が成功したときだけ起動します。

use crate::dialer::GuardedDialer;
use crate::error::{BuildError, Result};
use crate::group::TaskGroup;
use crate::image::BuildOptions;
use crate::resolver::GuardedResolver;
use crate::sink::LogSink;
use crate::stage::{BuilderInvocation, StageKind, StageLauncher, run_stage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swflow_config::{OutputConfig, ToolConfig};
use swflow_container::{BuildkitDaemon, ClientGuard, DaemonApi, DaemonStatus};
use swflow_llb::{WorkflowGraph, WorkflowGraphOptions};
use swflow_session::Session;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    SessionStarting,
    GraphBuilding,
    Stage1Running,
    Stage1Done,
    Stage2Running,
    Stage2Done,
    Failed,
}

/// パイプライン 1 回分の設定
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub working_dir: PathBuf,
    pub graph: WorkflowGraphOptions,
    pub daemon: BuildkitDaemon,
    pub builder_program: String,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// ツール設定とコマンドオプションから組み立てる
    pub fn new(working_dir: PathBuf, tool: &ToolConfig, options: &BuildOptions) -> Result<Self> {
        let image = options.image_ref()?;
        tracing::debug!("Resolved image reference: {}", image);

        let graph = WorkflowGraphOptions {
            context_dir: working_dir.clone(),
            extensions: options.extension_list(),
            knative_name: options.knative_name(&image),
            registry: image.registry.clone(),
            group: image.repository.clone(),
            name: image.name.clone(),
            tag: image.tag.clone(),
            builder_image: tool.images.builder.clone(),
            runtime_image: tool.images.runtime.clone(),
            ..Default::default()
        };

        Ok(Self {
            working_dir,
            graph,
            daemon: BuildkitDaemon::new(&tool.buildkit.image, &tool.buildkit.container_name),
            builder_program: tool.builder.program.clone(),
            output: tool.output.clone(),
        })
    }

    fn invocation(&self, kind: StageKind) -> BuilderInvocation {
        BuilderInvocation::new(
            &self.builder_program,
            &kind.output_target(&self.output),
            &self.daemon.host(),
        )
    }
}

/// 成功したパイプラインの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub daemon: DaemonStatus,
    pub elapsed: Duration,
}

pub struct Pipeline<L> {
    config: PipelineConfig,
    launcher: L,
    sink: Arc<dyn LogSink>,
    state: PipelineState,
    history: Vec<PipelineState>,
    elapsed: Option<Duration>,
}

impl<L: StageLauncher> Pipeline<L> {
    pub fn new(config: PipelineConfig, launcher: L, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            launcher,
            sink,
            state: PipelineState::Init,
            history: vec![PipelineState::Init],
            elapsed: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// これまでに通過した状態
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// 最後の実行にかかった時間（失敗時も記録）
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// パイプラインを実行
    ///
    /// 終了時（成功・失敗とも）にクライアントガードをクローズします。
    /// 失敗したパイプラインは再試行せず、そのまま呼び出し側へ返します。
    pub async fn run<C: DaemonApi>(
        &mut self,
        guard: Arc<ClientGuard<C>>,
        token: &CancellationToken,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let result = self.execute(&guard, token).await;

        if let Err(e) = guard.close().await {
            tracing::debug!("Client guard close: {}", e);
        }

        let elapsed = start.elapsed();
        self.elapsed = Some(elapsed);
        match result {
            Ok(daemon) => {
                tracing::info!("Pipeline finished in {:?}", elapsed);
                Ok(PipelineReport { daemon, elapsed })
            }
            Err(e) => {
                self.transition(PipelineState::Failed);
                tracing::info!("Pipeline failed after {:?}: {}", elapsed, e);
                Err(e)
            }
        }
    }

    async fn execute<C: DaemonApi>(
        &mut self,
        guard: &Arc<ClientGuard<C>>,
        token: &CancellationToken,
    ) -> Result<DaemonStatus> {
        let daemon = self.config.daemon.ensure_running(guard.as_ref()).await?;
        tracing::info!("BuildKit daemon {:?} ({})", daemon, self.config.daemon.host());

        self.transition(PipelineState::SessionStarting);
        let download_dir = self.config.working_dir.join(&self.config.output.download_dir);
        let session = Session::open(&self.config.working_dir)
            .grant_workflow(&self.config.working_dir, &download_dir);
        let mut group = TaskGroup::new(token);
        let session_token = group.token();
        let dialer = GuardedDialer::new(guard.clone());
        group.spawn(async move { Ok(session.run(session_token, dialer).await?) });

        let stages = self.run_stages(guard, &group.token()).await;
        let background = group.shutdown().await;

        match (stages, background) {
            // セッションの失敗でステージが止まった場合はその原因を返す
            (Err(BuildError::Cancelled), Some(cause)) if !token.is_cancelled() => Err(cause),
            (Err(e), _) => Err(e),
            (Ok(()), Some(e)) => {
                tracing::warn!("Session ended with error after build: {}", e);
                Ok(daemon)
            }
            (Ok(()), None) => Ok(daemon),
        }
    }

    async fn run_stages<C: DaemonApi>(
        &mut self,
        guard: &Arc<ClientGuard<C>>,
        token: &CancellationToken,
    ) -> Result<()> {
        self.transition(PipelineState::GraphBuilding);
        let resolver = GuardedResolver::new(guard.clone());
        let graph = tokio::select! {
            graph = WorkflowGraph::resolve(&self.config.graph, &resolver) => graph?,
            _ = token.cancelled() => return Err(BuildError::Cancelled),
        };

        let manifests = graph.output_files.marshal();
        self.transition(PipelineState::Stage1Running);
        run_stage(
            &self.launcher,
            StageKind::Manifests,
            &self.config.invocation(StageKind::Manifests),
            &manifests,
            self.sink.clone(),
            token,
        )
        .await?;
        self.transition(PipelineState::Stage1Done);

        let runner = graph.runner_image.marshal();
        self.transition(PipelineState::Stage2Running);
        run_stage(
            &self.launcher,
            StageKind::RunnerImage,
            &self.config.invocation(StageKind::RunnerImage),
            &runner,
            self.sink.clone(),
            token,
        )
        .await?;
        self.transition(PipelineState::Stage2Done);
        Ok(())
    }
}

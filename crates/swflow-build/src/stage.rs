//! 外部ビルダー（buildctl）の 1 回の実行
//!
//! マーシャル済みの定義を標準入力に流し込み、stdout / stderr を行単位で
//! 並行に読み出してシンクへ渡します。終了後に終了コードと stdout の最終行
//! （構造化エラー）から結果を判定します。

use crate::error::{BuildError, Result};
use crate::error_line::parse_error_line;
use crate::sink::{LogSink, StreamKind};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use swflow_config::OutputConfig;
use swflow_llb::Definition;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// ビルダーが接続するデーモンを指定する環境変数
pub const BUILDKIT_HOST_ENV: &str = "BUILDKIT_HOST";

/// パイプラインのステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Kubernetes マニフェストをローカルディレクトリへ出力
    Manifests,
    /// ランタイムイメージを OCI アーカイブへ出力
    RunnerImage,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Manifests => write!(f, "manifests"),
            StageKind::RunnerImage => write!(f, "runner-image"),
        }
    }
}

impl StageKind {
    /// `--output` の値
    pub fn output_target(&self, output: &OutputConfig) -> String {
        match self {
            StageKind::Manifests => format!("type=local,dest={}", output.local_dir),
            StageKind::RunnerImage => format!("type=oci,dest={}", output.archive),
        }
    }
}

/// ビルダーの起動パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// 子プロセスにだけ渡す環境変数
    pub envs: Vec<(String, String)>,
}

impl BuilderInvocation {
    pub fn new(program: &str, output_target: &str, buildkit_host: &str) -> Self {
        let args = [
            "build",
            "--progress",
            "plain",
            "--local",
            "context=.",
            "--output",
            output_target,
        ];
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            envs: vec![(BUILDKIT_HOST_ENV.to_string(), buildkit_host.to_string())],
        }
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// プロセスの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageExit {
    code: Option<i32>,
}

impl StageExit {
    pub fn from_code(code: Option<i32>) -> Self {
        Self { code }
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for StageExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self::from_code(status.code())
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// 起動済みのビルダープロセス
pub trait StageProcess: Send + 'static {
    type Stdin: AsyncWrite + Unpin + Send + 'static;
    type Stdout: AsyncRead + Unpin + Send + 'static;
    type Stderr: AsyncRead + Unpin + Send + 'static;

    fn take_stdin(&mut self) -> Option<Self::Stdin>;
    fn take_stdout(&mut self) -> Option<Self::Stdout>;
    fn take_stderr(&mut self) -> Option<Self::Stderr>;

    fn wait(&mut self) -> impl Future<Output = std::io::Result<StageExit>> + Send;

    /// 終了を要求（完了は `wait` で待つ）
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// ビルダープロセスを起動する
///
/// 実装は実プロセス（[`ProcessLauncher`]）とテスト用のスクリプト。
pub trait StageLauncher: Send + Sync {
    type Process: StageProcess;

    fn launch(&self, invocation: &BuilderInvocation) -> std::io::Result<Self::Process>;
}

/// tokio のプロセスとして起動
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    working_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

impl StageLauncher for ProcessLauncher {
    type Process = tokio::process::Child;

    fn launch(&self, invocation: &BuilderInvocation) -> std::io::Result<Self::Process> {
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!("Spawned {} (pid {:?})", invocation.program, child.id());
        Ok(child)
    }
}

impl StageProcess for tokio::process::Child {
    type Stdin = tokio::process::ChildStdin;
    type Stdout = tokio::process::ChildStdout;
    type Stderr = tokio::process::ChildStderr;

    fn take_stdin(&mut self) -> Option<Self::Stdin> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Self::Stdout> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Self::Stderr> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> std::io::Result<StageExit> {
        tokio::process::Child::wait(self).await.map(StageExit::from)
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        tokio::process::Child::start_kill(self)
    }
}

/// 行単位で読み出してシンクへ渡し、最後の行を返す
///
/// UTF-8 として不正なバイトは置換文字にして、EOF まで読み続けます。
/// 読み取りエラー以外でパイプを先に閉じてはいけません。
async fn drain<R>(reader: R, stream: StreamKind, sink: Arc<dyn LogSink>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut last = None;
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']);
                sink.line(stream, line);
                last = Some(line.to_string());
            }
            Err(e) => {
                tracing::debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
    last
}

/// 終了状態と stdout の最終行からステージの結果を判定
///
/// 構造化エラーがあれば、終了コードが 0 でも失敗として扱います。
pub fn evaluate(kind: StageKind, exit: StageExit, last_stdout_line: Option<&str>) -> Result<()> {
    if let Some(record) = last_stdout_line.and_then(parse_error_line) {
        return Err(BuildError::StageError {
            stage: kind,
            detail: record.detail().map(str::to_string),
            message: record.error,
        });
    }
    if !exit.success() {
        return Err(BuildError::StageFailed {
            stage: kind,
            status: exit.to_string(),
        });
    }
    Ok(())
}

/// 1 ステージを実行
///
/// トークンがキャンセルされるとプロセスを終了させて `Cancelled` を返します。
pub async fn run_stage<L: StageLauncher>(
    launcher: &L,
    kind: StageKind,
    invocation: &BuilderInvocation,
    definition: &Definition,
    sink: Arc<dyn LogSink>,
    token: &CancellationToken,
) -> Result<()> {
    if token.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    sink.stage_started(kind, invocation);
    let mut process = launcher
        .launch(invocation)
        .map_err(|source| BuildError::StageLaunch {
            stage: kind,
            source,
        })?;

    let pipe_error = |name: &str| BuildError::Setup(format!("{} pipe is not available", name));
    let mut stdin = process.take_stdin().ok_or_else(|| pipe_error("stdin"))?;
    let stdout = process.take_stdout().ok_or_else(|| pipe_error("stdout"))?;
    let stderr = process.take_stderr().ok_or_else(|| pipe_error("stderr"))?;

    let bytes = definition.to_bytes();
    let writer = tokio::spawn(async move {
        stdin.write_all(&bytes).await?;
        stdin.shutdown().await
    });
    let stdout_task = tokio::spawn(drain(stdout, StreamKind::Stdout, sink.clone()));
    let stderr_task = tokio::spawn(drain(stderr, StreamKind::Stderr, sink));

    let waited = tokio::select! {
        exit = process.wait() => Some(exit),
        _ = token.cancelled() => None,
    };

    let Some(exit) = waited else {
        tracing::info!("Stopping {} stage", kind);
        if let Err(e) = process.start_kill() {
            tracing::debug!("Failed to kill builder: {}", e);
        }
        let _ = process.wait().await;
        writer.abort();
        stdout_task.abort();
        stderr_task.abort();
        return Err(BuildError::Cancelled);
    };

    let exit = exit.map_err(|e| BuildError::StageFailed {
        stage: kind,
        status: e.to_string(),
    })?;
    let last_line = stdout_task.await.ok().flatten();
    let _ = stderr_task.await;

    match writer.await {
        Ok(Err(e)) => tracing::debug!("Definition write to {} stage ended early: {}", kind, e),
        Err(e) => tracing::debug!("Definition writer aborted: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::debug!("{} stage finished with {}", kind, exit);
    evaluate(kind, exit, last_line.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, Script, ScriptedLauncher};
    use swflow_llb::State;

    fn invocation(kind: StageKind) -> BuilderInvocation {
        BuilderInvocation::new(
            "buildctl",
            &kind.output_target(&OutputConfig::default()),
            "docker-container://buildkitd",
        )
    }

    #[test]
    fn test_invocation_args() {
        let manifests = invocation(StageKind::Manifests);
        assert_eq!(
            manifests.command_line(),
            "buildctl build --progress plain --local context=. --output type=local,dest=output"
        );
        assert_eq!(
            manifests.env(BUILDKIT_HOST_ENV),
            Some("docker-container://buildkitd")
        );

        let runner = invocation(StageKind::RunnerImage);
        assert_eq!(runner.args.last().unwrap(), "type=oci,dest=output.tar");
    }

    #[test]
    fn test_evaluate() {
        let ok = StageExit::from_code(Some(0));
        let failed = StageExit::from_code(Some(1));
        let kind = StageKind::Manifests;

        assert!(evaluate(kind, ok, Some("#5 DONE 0.1s")).is_ok());
        assert!(evaluate(kind, ok, None).is_ok());

        let error = evaluate(
            kind,
            failed,
            Some(r#"{"error":"disk full","errorDetail":{"message":"no space"}}"#),
        )
        .unwrap_err();
        assert!(error.to_string().contains("disk full"));
        assert!(matches!(
            &error,
            BuildError::StageError { detail: Some(d), .. } if d == "no space"
        ));

        // JSON でない最終行は終了コードだけで判定
        let error = evaluate(kind, failed, Some("not json")).unwrap_err();
        assert!(matches!(error, BuildError::StageFailed { .. }));
        let error = evaluate(kind, failed, Some(r#"{"message":"x"}"#)).unwrap_err();
        assert!(matches!(error, BuildError::StageFailed { .. }));
        let error = evaluate(kind, failed, Some(r#"["error","detail"]"#)).unwrap_err();
        assert!(matches!(error, BuildError::StageFailed { .. }));

        // 構造化エラーは終了コード 0 でも失敗
        let error = evaluate(kind, ok, Some(r#"{"error":"late failure"}"#)).unwrap_err();
        assert!(matches!(error, BuildError::StageError { .. }));
    }

    #[tokio::test]
    async fn test_run_stage_streams_output_and_pipes_definition() {
        let launcher = ScriptedLauncher::new(vec![Script::success(
            &["#1 resolve image", "#2 DONE"],
            &["progress on stderr"],
        )]);
        let sink = Arc::new(RecordingSink::default());
        let definition = State::image("alpine", None).marshal();

        run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation(StageKind::Manifests),
            &definition,
            sink.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let lines = sink.lines();
        assert!(lines.contains(&(StreamKind::Stdout, "#1 resolve image".to_string())));
        assert!(lines.contains(&(StreamKind::Stdout, "#2 DONE".to_string())));
        assert!(lines.contains(&(StreamKind::Stderr, "progress on stderr".to_string())));
        assert_eq!(launcher.stdin_received(), vec![definition.to_bytes()]);
    }

    #[tokio::test]
    async fn test_run_stage_reports_error_line() {
        let launcher = ScriptedLauncher::new(vec![Script::failure(
            1,
            &[
                "#3 ERROR",
                r#"{"error":"disk full","errorDetail":{"message":"no space"}}"#,
            ],
        )]);
        let sink = Arc::new(RecordingSink::default());

        let error = run_stage(
            &launcher,
            StageKind::RunnerImage,
            &invocation(StageKind::RunnerImage),
            &State::scratch().marshal(),
            sink.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(error.stage(), Some(StageKind::RunnerImage));
        assert!(error.to_string().contains("disk full"));
        // 失敗時もログは出力済み
        assert_eq!(sink.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stage_launch_error() {
        let launcher = ScriptedLauncher::new(vec![Script::launch_error()]);
        let error = run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation(StageKind::Manifests),
            &State::scratch().marshal(),
            Arc::new(RecordingSink::default()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, BuildError::StageLaunch { .. }));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let launcher = ScriptedLauncher::new(vec![Script::hang()]);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let error = run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation(StageKind::Manifests),
            &State::scratch().marshal(),
            Arc::new(RecordingSink::default()),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(error, BuildError::Cancelled));
        assert_eq!(launcher.kills(), 1);
    }

    #[tokio::test]
    async fn test_real_process_launch_failure() {
        let launcher = ProcessLauncher::new(".");
        let mut invocation = invocation(StageKind::Manifests);
        invocation.program = "swflow-definitely-missing-builder".to_string();

        let error = run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation,
            &State::scratch().marshal(),
            Arc::new(RecordingSink::default()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, BuildError::StageLaunch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_non_utf8_output_is_drained() {
        let launcher = ProcessLauncher::new(".");
        let invocation = BuilderInvocation {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "printf 'caf\\351\\n'; i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done"
                    .to_string(),
            ],
            envs: Vec::new(),
        };
        let sink = Arc::new(RecordingSink::default());

        run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation,
            &State::scratch().marshal(),
            sink.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let lines: Vec<String> = sink
            .lines()
            .into_iter()
            .filter(|(stream, _)| *stream == StreamKind::Stdout)
            .map(|(_, l)| l)
            .collect();
        assert_eq!(lines.len(), 2001);
        assert_eq!(lines[0], "caf\u{FFFD}");
        assert_eq!(lines[2000], "line 1999");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_receives_env_and_stdin() {
        let launcher = ProcessLauncher::new(".");
        let invocation = BuilderInvocation {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo host=$BUILDKIT_HOST; wc -c | tr -d ' '".to_string(),
            ],
            envs: vec![(BUILDKIT_HOST_ENV.to_string(), "docker-container://test".to_string())],
        };
        let definition = State::image("alpine", None).marshal();
        let sink = Arc::new(RecordingSink::default());

        run_stage(
            &launcher,
            StageKind::Manifests,
            &invocation,
            &definition,
            sink.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let lines: Vec<String> = sink.lines().into_iter().map(|(_, l)| l).collect();
        assert_eq!(lines[0], "host=docker-container://test");
        assert_eq!(lines[1], definition.to_bytes().len().to_string());
    }
}

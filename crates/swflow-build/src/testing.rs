//! テスト用のビルダーとシンク

use crate::sink::{LogSink, StreamKind};
use crate::stage::{BuilderInvocation, StageExit, StageLauncher, StageProcess};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, DuplexStream};

/// 1 回の起動で再生する内容
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    pub launch_error: bool,
    pub hang: bool,
}

impl Script {
    pub fn success(stdout: &[&str], stderr: &[&str]) -> Self {
        Self {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: stderr.iter().map(|s| s.to_string()).collect(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stdout: &[&str]) -> Self {
        Self {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn launch_error() -> Self {
        Self {
            launch_error: true,
            ..Default::default()
        }
    }

    /// キャンセルされるまで終了しない
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Record {
    launches: Vec<BuilderInvocation>,
    stdin: Vec<Vec<u8>>,
    kills: usize,
}

/// 起動を記録し、スクリプトを順に再生するランチャー
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            record: Arc::default(),
        }
    }

    pub fn launches(&self) -> Vec<BuilderInvocation> {
        self.record.lock().unwrap().launches.clone()
    }

    pub fn stdin_received(&self) -> Vec<Vec<u8>> {
        self.record.lock().unwrap().stdin.clone()
    }

    pub fn kills(&self) -> usize {
        self.record.lock().unwrap().kills
    }
}

impl StageLauncher for ScriptedLauncher {
    type Process = ScriptedProcess;

    fn launch(&self, invocation: &BuilderInvocation) -> std::io::Result<ScriptedProcess> {
        self.record
            .lock()
            .unwrap()
            .launches
            .push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no script left for launch");
        if script.launch_error {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "buildctl: not found",
            ));
        }

        let join = |lines: &[String]| {
            let mut text = lines.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            Cursor::new(text.into_bytes())
        };
        let (stdin, stdin_peer) = tokio::io::duplex(1 << 20);
        Ok(ScriptedProcess {
            stdin: Some(stdin),
            stdin_peer: Some(stdin_peer),
            stdout: Some(join(&script.stdout)),
            stderr: Some(join(&script.stderr)),
            exit_code: script.exit_code,
            hang: script.hang,
            killed: false,
            record: self.record.clone(),
        })
    }
}

pub struct ScriptedProcess {
    stdin: Option<DuplexStream>,
    stdin_peer: Option<DuplexStream>,
    stdout: Option<Cursor<Vec<u8>>>,
    stderr: Option<Cursor<Vec<u8>>>,
    exit_code: Option<i32>,
    hang: bool,
    killed: bool,
    record: Arc<Mutex<Record>>,
}

impl StageProcess for ScriptedProcess {
    type Stdin = DuplexStream;
    type Stdout = Cursor<Vec<u8>>;
    type Stderr = Cursor<Vec<u8>>;

    fn take_stdin(&mut self) -> Option<DuplexStream> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Cursor<Vec<u8>>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Cursor<Vec<u8>>> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> std::io::Result<StageExit> {
        if let Some(mut peer) = self.stdin_peer.take() {
            let mut received = Vec::new();
            peer.read_to_end(&mut received).await?;
            self.record.lock().unwrap().stdin.push(received);
        }
        if self.killed {
            return Ok(StageExit::from_code(None));
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(StageExit::from_code(self.exit_code))
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.killed = true;
        self.record.lock().unwrap().kills += 1;
        Ok(())
    }
}

/// 受け取った行を記録するシンク
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(StreamKind, String)>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<(StreamKind, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn line(&self, stream: StreamKind, line: &str) {
        self.lines.lock().unwrap().push((stream, line.to_string()));
    }
}

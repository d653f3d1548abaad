//! ビルダー出力の表示先

use crate::stage::{BuilderInvocation, StageKind};
use colored::Colorize;

/// 出力ストリームの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// ステージのログ行を受け取る
///
/// stdout / stderr の読み取りタスクから並行に呼ばれます。
pub trait LogSink: Send + Sync + 'static {
    fn line(&self, stream: StreamKind, line: &str);

    fn stage_started(&self, _kind: StageKind, _invocation: &BuilderInvocation) {}
}

/// コンソールにそのまま出力
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn line(&self, _stream: StreamKind, line: &str) {
        println!("{}", line);
    }

    fn stage_started(&self, kind: StageKind, invocation: &BuilderInvocation) {
        println!(
            "{} [{}] {}",
            "→".blue(),
            kind.to_string().cyan(),
            invocation.command_line().dimmed()
        );
    }
}

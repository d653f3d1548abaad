//! swflow build pipeline
//!
//! BuildKit デーモンの準備、ファイル同期セッション、ビルドグラフの構築、
//! 2 回の buildctl 実行（マニフェスト出力 → ランタイムイメージ出力）を
//! ひとつのキャンセル可能なパイプラインとしてまとめます。

pub mod dialer;
pub mod error;
pub mod error_line;
pub mod group;
pub mod image;
pub mod pipeline;
pub mod resolver;
pub mod sink;
pub mod stage;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod testing_daemon;

pub use dialer::GuardedDialer;
pub use error::{BuildError, Result};
pub use error_line::{ErrorRecord, parse_error_line};
pub use image::{BuildOptions, ImageRef, check_image_name, split_image_tag};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport, PipelineState};
pub use resolver::GuardedResolver;
pub use sink::{ConsoleSink, LogSink, StreamKind};
pub use stage::{
    BUILDKIT_HOST_ENV, BuilderInvocation, ProcessLauncher, StageExit, StageKind, StageLauncher,
    StageProcess, run_stage,
};

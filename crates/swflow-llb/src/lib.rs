//! BuildKit LLB graph construction
//!
//! ビルドをシェルスクリプトではなくデータ（不変の状態 DAG）として表現し、
//! `buildctl build` が標準入力から読める protobuf 定義にマーシャルします。

pub mod definition;
pub mod error;
pub mod image;
pub mod pb;
pub mod state;
pub mod workflow;

pub use definition::Definition;
pub use error::{LlbError, Result};
pub use image::{ImageConfig, ImageMetaResolver};
pub use state::{CopyInfo, Exec, ExecState, Platform, State};
pub use workflow::{WorkflowGraph, WorkflowGraphOptions};

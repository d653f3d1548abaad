//! 構造化された並行タスクのグループ
//!
//! いずれかのタスクが失敗するとグループのトークンをキャンセルし、
//! 兄弟タスクと前面の処理に伝えます。最初のエラーは `shutdown` で回収します。

use crate::error::{BuildError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct TaskGroup {
    tasks: JoinSet<Result<()>>,
    token: CancellationToken,
}

impl TaskGroup {
    /// 親トークンのキャンセルもグループに伝播する
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token: parent.child_token(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            let result = task.await;
            if let Err(e) = &result {
                tracing::debug!("Task failed, cancelling group: {}", e);
                token.cancel();
            }
            result
        });
    }

    /// グループをキャンセルして全タスクの終了を待ち、最初のエラーを返す
    pub async fn shutdown(mut self) -> Option<BuildError> {
        self.token.cancel();
        let mut first = None;
        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => BuildError::Setup(format!("background task panicked: {}", e)),
            };
            if first.is_none() {
                first = Some(error);
            }
        }
        first
    }
}

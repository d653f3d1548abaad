//! Close 後の利用を防ぐクライアントガード
//!
//! デーモン API ハンドルを `RwLock<Option<C>>` に閉じ込め、
//! Open / Closed の2状態として扱います。
//! - 利用側は読み取りロックを取り、Open であることを確認してから委譲する
//! - `close` は書き込みロックを取り、ハンドルを一度だけ取り出す
//!
//! Close 後の呼び出しは `ContainerError::ClientClosed` になります。

use crate::error::{ContainerError, Result};
use tokio::sync::{RwLock, RwLockReadGuard};

/// Close 後の呼び出しを拒否するクライアントラッパー
#[derive(Debug)]
pub struct ClientGuard<C> {
    slot: RwLock<Option<C>>,
}

/// 読み取りロックを保持したままのクライアント参照
///
/// これが生きている間 `close` はブロックされます。
pub type ClientLease<'a, C> = RwLockReadGuard<'a, C>;

impl<C> ClientGuard<C> {
    pub fn new(client: C) -> Self {
        Self {
            slot: RwLock::new(Some(client)),
        }
    }

    /// クライアントを借用（非同期処理の間ロックを保持する）
    pub async fn acquire(&self) -> Result<ClientLease<'_, C>> {
        let guard = self.slot.read().await;
        RwLockReadGuard::try_map(guard, Option::as_ref).map_err(|_| {
            tracing::error!("closed client used");
            ContainerError::ClientClosed
        })
    }

    /// 読み取りロック下で同期処理を実行
    pub async fn call<R>(&self, op: impl FnOnce(&C) -> R) -> Result<R> {
        let client = self.acquire().await?;
        Ok(op(&client))
    }

    /// クライアントをクローズし、ハンドルを返す
    ///
    /// 実行中の `acquire` がすべて解放されるまで待ちます。
    pub async fn close(&self) -> Result<C> {
        let mut slot = self.slot.write().await;
        slot.take().ok_or(ContainerError::AlreadyClosed)
    }

    pub async fn is_closed(&self) -> bool {
        self.slot.read().await.is_none()
    }
}

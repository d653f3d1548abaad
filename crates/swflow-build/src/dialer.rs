//! クライアントガード経由でセッション用コネクションを張る

use std::collections::HashMap;
use std::sync::Arc;
use swflow_container::{ClientGuard, DaemonApi};
use swflow_session::{Dialer, dial_error};

/// ガード越しにデーモンの hijack を呼ぶ Dialer
///
/// リースはアップグレードが終わるまでの間だけ保持します。
pub struct GuardedDialer<C> {
    guard: Arc<ClientGuard<C>>,
}

impl<C> GuardedDialer<C> {
    pub fn new(guard: Arc<ClientGuard<C>>) -> Self {
        Self { guard }
    }
}

impl<C: DaemonApi> Dialer for GuardedDialer<C> {
    type Conn = C::Conn;

    async fn dial(
        &self,
        path: &str,
        proto: &str,
        meta: &HashMap<String, Vec<String>>,
    ) -> swflow_session::Result<Self::Conn> {
        let client = self.guard.acquire().await.map_err(dial_error)?;
        client
            .dial_hijack(path, proto, meta)
            .await
            .map_err(dial_error)
    }
}

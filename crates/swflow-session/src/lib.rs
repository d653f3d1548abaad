//! BuildKit file-sync session
//!
//! ビルドデーモンへの HTTP コネクションを乗っ取り（hijack）、その上で
//! ローカルのビルドコンテキストを同期する gRPC セッションを提供します。

pub mod error;
pub mod filesync;
pub mod proto;
pub mod session;

pub use error::{Result, SessionError};
pub use filesync::{FsSyncProvider, FsSyncTarget, MapResult, StatMap, SyncedDir, reset_ownership};
pub use session::{
    Capability, Dialer, HealthService, SESSION_PATH, SESSION_PROTO, Session, dial_error,
    shared_key,
};

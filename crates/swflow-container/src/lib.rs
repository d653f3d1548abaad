pub mod client;
pub mod daemon;
pub mod error;
pub mod guard;
pub mod runtime;

pub use client::*;
pub use daemon::*;
pub use error::*;
pub use guard::*;
pub use runtime::*;

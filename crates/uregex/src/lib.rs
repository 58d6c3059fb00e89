//! Regular-expression sessions backed by pooled, sandboxed engine instances.
//!
//! A [`Session`] borrows one execution context from a [`Pool`], keeps its pattern and
//! subject as UTF-16 inside that context's linear memory, and talks to the engine only
//! through exported functions. Contexts are recycled across sessions; groups of
//! contexts sharing a compiled program are retired after a configurable number of
//! acquisitions.
//!
//! ```no_run
//! let mut session = uregex::create_session()?;
//! session.set_regex_string("[a-z]+", uregex::RegexFlags::NONE)?;
//! session.set_match_string("abc def ghi")?;
//! assert_eq!(session.replace("X", 1, 2)?, "abc X ghi");
//! session.close()?;
//! # Ok::<(), uregex::Error>(())
//! ```

pub mod buffer;
pub mod call;
pub mod codec;
pub mod config;
mod diag;
mod error;
mod flags;
pub mod pool;
mod session;

pub use buffer::{BufferView, ManagedBuffer, Span};
pub use call::{ForeignCalls, ReplaceOutput, Scratch};
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use flags::RegexFlags;
pub use pool::{ContextId, Pool, PoolStats, PooledContext};
pub use session::{Session, SessionState};

pub use uregex_contracts::UErrorCode;

/// Opens a session on the process-wide pool.
pub fn create_session() -> Result<Session> {
    Session::new()
}

/// Sets the recycle budget of the process-wide pool.
pub fn set_pool_fetch_max(fetch_max: u64) {
    Pool::global().set_fetch_max(fetch_max);
}

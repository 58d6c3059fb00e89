//! In-process matching program for the session layer.
//!
//! The program behaves like a sandboxed module: each instance owns a private linear
//! memory, exposes its entry points through the shared function table and exchanges
//! UTF-16 strings and out-parameters by address only. Matching itself is backed by
//! `regex-automata`, with offsets translated to UTF-16 code units at the boundary.

mod instance;
mod matcher;
mod memory;
mod program;
mod replace;

pub use instance::EngineInstance;
pub use memory::{NULL_GUARD, PAGE_SIZE};
pub use program::{
    EngineConfig, EngineLoader, EngineProgram, EngineStats, EngineStatsSnapshot, LOADER_NAME,
};

//! Sandbox module containing all execution-related components.

pub mod config;
pub mod dispatch;
pub mod emscripten;
pub mod fs;
pub mod instance;
pub mod io;
pub mod limits;
pub mod runtime;
pub mod wasi;

//! # catdoc sandbox
//!
//! Text and metadata extraction for legacy Word `.doc` files, delegated to
//! catdoc compiled to WebAssembly and run in Wasmtime. The host side does
//! not parse documents; it runs the module and interprets what it prints.
//!
//! - **Shared compilation**: the engine and compiled module are built once
//!   per runtime and reused by every call
//! - **Per-call isolation**: each call gets a fresh instance with its own
//!   mounts, environment and output buffers
//! - **Synthetic input**: the caller's stream is served to the program as
//!   `/input_file`; the host filesystem is never used for it
//! - **Read-only charset tables** mounted at `/charsets`
//!
//! ## Example
//!
//! ```rust,ignore
//! use catdoc_sandbox_rs::prelude::*;
//! use std::fs::File;
//!
//! fn main() -> Result<()> {
//!     let catdoc = Catdoc::new(
//!         CatdocConfig::builder()
//!             .module_path("assets/catdoc.wasm")
//!             .charsets_dir("assets/charsets")
//!             .build(),
//!     )?;
//!
//!     println!("{}", catdoc.version()?);
//!     println!("{}", catdoc.title(File::open("report.doc")?)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! catdoc signals failure either by exiting with a non-zero status or by
//! writing to stderr while returning normally. Both surface as errors
//! ([`CatdocError::Exit`] and [`CatdocError::Diagnostic`]); any partial
//! stdout stays available through [`CatdocError::partial_output`].

macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::debug!($($arg)*);
    };
}
pub(crate) use debug;

pub mod catdoc;
pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use catdoc::{
    annotation_authors, author, comments, keywords, last_author, subject, text, title, version,
    Catdoc, Operation,
};
pub use error::{CatdocError, Result};
pub use sandbox::config::{CatdocConfig, CatdocConfigBuilder, CharsetOverrides, ModuleSource};
pub use sandbox::dispatch::{CallOutput, Termination};
pub use sandbox::fs::{SingleFileFs, VirtualFs};
pub use sandbox::runtime::{global_runtime, Prepared, Runtime};

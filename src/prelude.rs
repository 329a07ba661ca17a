//! Prelude module for convenient imports.

pub use crate::catdoc::{Catdoc, Operation};
pub use crate::error::{CatdocError, Result};
pub use crate::sandbox::{config::CatdocConfig, fs::SingleFileFs};

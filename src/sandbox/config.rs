//! Sandbox configuration with builder pattern.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CatdocError, Result};

/// Environment variable naming the charset catdoc should assume for input.
pub const SRC_CHARSET_VAR: &str = "CATDOC_SRC_CHARSET";
/// Environment variable naming the charset catdoc should emit.
pub const DST_CHARSET_VAR: &str = "CATDOC_DST_CHARSET";
/// Overrides the module path used by [`CatdocConfig::from_env`].
pub const WASM_PATH_VAR: &str = "CATDOC_WASM_PATH";
/// Overrides the charset directory used by [`CatdocConfig::from_env`].
pub const CHARSETS_DIR_VAR: &str = "CATDOC_CHARSETS_DIR";

/// Where the catdoc module image comes from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// A `.wasm` file on the host filesystem, read on first use.
    Path(PathBuf),
    /// An image already in memory. Text format is accepted as well.
    Bytes(Arc<[u8]>),
}

impl ModuleSource {
    /// Read the module image.
    pub fn load(&self) -> Result<Arc<[u8]>> {
        match self {
            ModuleSource::Path(path) => std::fs::read(path).map(Arc::from).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CatdocError::ModuleNotFound(path.display().to_string())
                } else {
                    CatdocError::Io(e)
                }
            }),
            ModuleSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
        }
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(path: PathBuf) -> Self {
        ModuleSource::Path(path)
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleSource::Bytes(bytes.into())
    }
}

impl From<&str> for ModuleSource {
    fn from(text: &str) -> Self {
        ModuleSource::Bytes(text.as_bytes().into())
    }
}

/// Charset pair handed to catdoc through its environment.
///
/// `None` means "whatever the process environment says at call time".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharsetOverrides {
    /// Source charset override.
    pub source: Option<String>,
    /// Destination charset override.
    pub destination: Option<String>,
}

impl CharsetOverrides {
    /// Resolve the environment pairs for one instance.
    ///
    /// Unset values become empty strings so catdoc falls back to its own
    /// default rather than one picked here.
    pub fn resolve(&self) -> [(&'static str, String); 2] {
        let pick = |explicit: &Option<String>, var: &str| {
            explicit
                .clone()
                .or_else(|| std::env::var(var).ok())
                .unwrap_or_default()
        };
        [
            (SRC_CHARSET_VAR, pick(&self.source, SRC_CHARSET_VAR)),
            (DST_CHARSET_VAR, pick(&self.destination, DST_CHARSET_VAR)),
        ]
    }
}

/// Configuration for the catdoc sandbox.
#[derive(Debug, Clone)]
pub struct CatdocConfig {
    /// The catdoc module image.
    pub module: ModuleSource,
    /// Host directory holding the charset tables, mounted at `/charsets`.
    pub charsets_dir: Option<PathBuf>,
    /// Charset overrides passed to the program.
    pub charsets: CharsetOverrides,
    /// Maximum linear memory per instance in bytes.
    pub max_memory: u64,
    /// Deadline for async calls.
    pub timeout: Duration,
    /// Epoch tick interval while an async call is in flight.
    pub epoch_tick_interval: Duration,
}

impl Default for CatdocConfig {
    fn default() -> Self {
        Self {
            module: ModuleSource::Path(PathBuf::from("assets/catdoc.wasm")),
            charsets_dir: Some(PathBuf::from("assets/charsets")),
            charsets: CharsetOverrides::default(),
            max_memory: 64 * 1024 * 1024, // 64MB
            timeout: Duration::from_secs(30),
            epoch_tick_interval: Duration::from_millis(10),
        }
    }
}

impl CatdocConfig {
    /// Create a new builder for CatdocConfig.
    pub fn builder() -> CatdocConfigBuilder {
        CatdocConfigBuilder::default()
    }

    /// Defaults, with the module path and charset directory taken from
    /// `CATDOC_WASM_PATH` / `CATDOC_CHARSETS_DIR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(WASM_PATH_VAR) {
            config.module = ModuleSource::Path(path.into());
        }
        if let Some(dir) = std::env::var_os(CHARSETS_DIR_VAR) {
            config.charsets_dir = Some(dir.into());
        }
        config
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(CatdocError::Config("max_memory must be non-zero".to_string()));
        }
        if self.epoch_tick_interval.is_zero() {
            return Err(CatdocError::Config(
                "epoch_tick_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for creating CatdocConfig instances.
#[derive(Debug, Clone, Default)]
pub struct CatdocConfigBuilder {
    module: Option<ModuleSource>,
    charsets_dir: Option<Option<PathBuf>>,
    charsets: CharsetOverrides,
    max_memory: Option<u64>,
    timeout: Option<Duration>,
    epoch_tick_interval: Option<Duration>,
}

impl CatdocConfigBuilder {
    /// Set the module image source.
    pub fn module(mut self, source: impl Into<ModuleSource>) -> Self {
        self.module = Some(source.into());
        self
    }

    /// Load the module from a file path.
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module = Some(ModuleSource::Path(path.into()));
        self
    }

    /// Set the host directory mounted at `/charsets`.
    pub fn charsets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.charsets_dir = Some(Some(dir.into()));
        self
    }

    /// Mount an empty `/charsets` directory.
    pub fn no_charsets_dir(mut self) -> Self {
        self.charsets_dir = Some(None);
        self
    }

    /// Force the source charset instead of reading `CATDOC_SRC_CHARSET`.
    pub fn source_charset(mut self, charset: impl Into<String>) -> Self {
        self.charsets.source = Some(charset.into());
        self
    }

    /// Force the destination charset instead of reading `CATDOC_DST_CHARSET`.
    pub fn destination_charset(mut self, charset: impl Into<String>) -> Self {
        self.charsets.destination = Some(charset.into());
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the deadline for async calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the epoch tick interval for timeout checking.
    pub fn epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.epoch_tick_interval = Some(interval);
        self
    }

    /// Build the CatdocConfig.
    pub fn build(self) -> CatdocConfig {
        let default = CatdocConfig::default();
        CatdocConfig {
            module: self.module.unwrap_or(default.module),
            charsets_dir: self.charsets_dir.unwrap_or(default.charsets_dir),
            charsets: self.charsets,
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            timeout: self.timeout.unwrap_or(default.timeout),
            epoch_tick_interval: self.epoch_tick_interval.unwrap_or(default.epoch_tick_interval),
        }
    }
}

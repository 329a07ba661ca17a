//! Process-wide engine and compiled-module cache.
//!
//! The engine, the compiled catdoc module and its pre-resolved imports are
//! built at most once per [`Runtime`] and then shared by every call. Each
//! call still gets its own store and instance (see
//! [`instance`](crate::sandbox::instance)).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError};

use anyhow::bail;
use wasmtime::{Engine, ExternType, InstancePre, Linker, Module};

use crate::error::{CatdocError, Result};
use crate::sandbox::config::CatdocConfig;
use crate::sandbox::limits::StoreData;
use crate::sandbox::{emscripten, wasi};

/// Engine, compiled module and linked template, ready to instantiate.
///
/// Immutable once built; every call instantiates from the same template.
#[derive(Clone)]
pub struct Prepared {
    engine: Engine,
    module: Module,
    instance_pre: InstancePre<StoreData>,
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("engine", &"<wasmtime::Engine>")
            .field("module", &self.module.name())
            .finish_non_exhaustive()
    }
}

impl Prepared {
    /// Build the engine, compile the module and resolve its imports.
    pub fn build(config: &CatdocConfig) -> Result<Self> {
        let engine = Engine::new(&engine_config()).map_err(CatdocError::RuntimeInit)?;

        let bytes = config.module.load()?;
        let module = Module::new(&engine, &bytes).map_err(|e| {
            CatdocError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e))
        })?;

        let mut linker = Linker::new(&engine);
        link_imports(&mut linker, &module).map_err(CatdocError::RuntimeInit)?;
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(CatdocError::RuntimeInit)?;

        Ok(Self {
            engine,
            module,
            instance_pre,
        })
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Get the linked template instances are created from.
    pub fn instance_pre(&self) -> &InstancePre<StoreData> {
        &self.instance_pre
    }

    /// Check whether the module exports a function called `name`.
    pub fn exports_function(&self, name: &str) -> bool {
        matches!(
            self.module.get_export(name),
            Some(ExternType::Func(_))
        )
    }
}

/// Create the engine configuration.
///
/// Epoch interruption lets an async caller abandon a hung instance without
/// touching the others.
fn engine_config() -> wasmtime::Config {
    let mut config = wasmtime::Config::new();
    config.epoch_interruption(true);
    config
}

/// Register the WASI surface, then walk the module's imports and define the
/// Emscripten glue each `env` import needs.
///
/// Anything neither provides is an error listing every missing import.
fn link_imports(linker: &mut Linker<StoreData>, module: &Module) -> anyhow::Result<()> {
    linker.allow_shadowing(true);
    wasi::add_to_linker(linker)?;
    let mut scratch = wasi::scratch_store(module.engine());

    let mut unresolved = Vec::new();
    for import in module.imports() {
        let linked = match import.ty() {
            ExternType::Func(ty) => match import.module() {
                wasi::MODULE | wasi::LEGACY_MODULE => linker
                    .get(&mut scratch, import.module(), import.name())
                    .is_some(),
                emscripten::MODULE => emscripten::link(linker, import.name(), &ty)?,
                _ => false,
            },
            _ => false,
        };
        if !linked {
            unresolved.push(format!("{}::{}", import.module(), import.name()));
        }
    }

    if !unresolved.is_empty() {
        bail!("unresolved imports: {}", unresolved.join(", "));
    }
    Ok(())
}

/// Lazily built, shareable sandbox runtime.
///
/// The first caller builds the [`Prepared`] template under a lock; callers
/// arriving meanwhile wait for it, later callers read it without locking.
/// A failed build caches nothing, so the next call tries again.
pub struct Runtime {
    config: CatdocConfig,
    prepared: OnceLock<Arc<Prepared>>,
    init_lock: Mutex<()>,
    initializations: AtomicUsize,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime. Nothing is compiled until first use.
    pub fn new(config: CatdocConfig) -> Self {
        Self {
            config,
            prepared: OnceLock::new(),
            init_lock: Mutex::new(()),
            initializations: AtomicUsize::new(0),
        }
    }

    /// The configuration this runtime was created with.
    pub fn config(&self) -> &CatdocConfig {
        &self.config
    }

    /// Get the prepared template, building it on first use.
    pub fn prepared(&self) -> Result<Arc<Prepared>> {
        if let Some(prepared) = self.prepared.get() {
            return Ok(Arc::clone(prepared));
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Double-check: another thread may have finished while we waited
        if let Some(prepared) = self.prepared.get() {
            return Ok(Arc::clone(prepared));
        }

        crate::debug!("initializing catdoc runtime");
        self.config.validate()?;
        let prepared = Arc::new(Prepared::build(&self.config)?);
        self.initializations.fetch_add(1, Ordering::SeqCst);
        let prepared = Arc::clone(self.prepared.get_or_init(|| prepared));
        crate::debug!(
            imports = prepared.module().imports().len(),
            "catdoc runtime ready"
        );
        Ok(prepared)
    }

    /// Check whether the template has been built.
    pub fn is_initialized(&self) -> bool {
        self.prepared.get().is_some()
    }

    /// Number of successful builds. Stays at one for the runtime's lifetime.
    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

static GLOBAL_RUNTIME: LazyLock<Arc<Runtime>> =
    LazyLock::new(|| Arc::new(Runtime::new(CatdocConfig::from_env())));

/// Get the process-wide runtime.
///
/// Configured from [`CatdocConfig::from_env`] on first access and used by
/// the crate-level operation functions.
pub fn global_runtime() -> Arc<Runtime> {
    Arc::clone(&GLOBAL_RUNTIME)
}

//! Per-call instantiation of the catdoc module.

use wasmtime::{Instance, Store};

use crate::error::{CatdocError, Result};
use crate::sandbox::config::CatdocConfig;
use crate::sandbox::fs::{EmptyFs, HostDirFs, Mount, SingleFileFs};
use crate::sandbox::io::CallIo;
use crate::sandbox::limits::{Deadline, StoreData, StoreLimiterExt};
use crate::sandbox::runtime::Prepared;
use crate::sandbox::wasi;

/// Guest path of the input document.
pub const INPUT_PATH: &str = "/input_file";
/// Guest path of the charset tables.
pub const CHARSETS_PATH: &str = "/charsets";
/// `argv[0]` seen by the program.
pub const PROGRAM_NAME: &str = "catdoc";
/// Export run once before any operation.
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// One live instance with its own mounts, environment and sinks.
///
/// Owned by a single call and dropped when the call returns.
pub struct BoundInstance {
    pub(crate) store: Store<StoreData>,
    pub(crate) instance: Instance,
    pub(crate) io: CallIo,
}

impl BoundInstance {
    /// The sinks the program writes to.
    pub fn io(&self) -> &CallIo {
        &self.io
    }
}

/// Build the mount table for one call: the input (when given) followed by
/// the charset tables, which are always present.
fn mounts(config: &CatdocConfig, input: Option<SingleFileFs>) -> Vec<Mount> {
    let mut mounts = Vec::with_capacity(2);
    if let Some(input) = input {
        mounts.push(Mount::new(INPUT_PATH, input));
    }
    mounts.push(match &config.charsets_dir {
        Some(dir) => Mount::new(CHARSETS_PATH, HostDirFs::new(dir)),
        None => Mount::new(CHARSETS_PATH, EmptyFs),
    });
    mounts
}

/// Create a fresh instance from the cached template and run its
/// initializer.
///
/// Charset variables are resolved now, not when the runtime was built, so
/// changes to the process environment apply to the next call.
pub fn instantiate(
    prepared: &Prepared,
    config: &CatdocConfig,
    input: Option<SingleFileFs>,
    deadline: Option<Deadline>,
) -> Result<BoundInstance> {
    let io = CallIo::new();
    let mounts = mounts(config, input);
    crate::debug!(
        mounts = ?mounts.iter().map(|m| m.guest_path.as_str()).collect::<Vec<_>>(),
        "instantiating catdoc"
    );
    let wasi = wasi::build_ctx(PROGRAM_NAME, config.charsets.resolve(), mounts, &io)
        .map_err(CatdocError::Instantiation)?;

    let mut store = Store::new(
        prepared.engine(),
        StoreData::new(config.max_memory, wasi, deadline),
    );
    store.configure_limiter();
    store.configure_deadline();

    let instance = prepared
        .instance_pre()
        .instantiate(&mut store)
        .map_err(|e| store.data().interruption().unwrap_or(CatdocError::Instantiation(e)))?;

    if let Some(init) = instance.get_func(&mut store, INITIALIZE_EXPORT) {
        init.call(&mut store, &[], &mut []).map_err(|e| {
            store
                .data()
                .interruption()
                .unwrap_or_else(|| CatdocError::Instantiation(e.context("`_initialize` failed")))
        })?;
    }

    Ok(BoundInstance {
        store,
        instance,
        io,
    })
}

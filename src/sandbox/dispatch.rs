//! Invoking catdoc exports and folding their output into results.
//!
//! catdoc reports failure two ways: a non-zero `proc_exit`, or text on
//! stderr with a normal return. Both are checked after every call.

use std::sync::Arc;
use std::time::Duration;

use wasi_common::I32Exit;
use wasmtime::Val;

use crate::error::{CatdocError, Result};
use crate::sandbox::fs::SingleFileFs;
use crate::sandbox::instance::{self, BoundInstance};
use crate::sandbox::io::trim_trailing_newlines;
use crate::sandbox::limits::Deadline;
use crate::sandbox::runtime::Runtime;

/// How a call ended, before stderr is taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The export returned, or the program exited with status 0.
    Completed,
    /// The program exited with a non-zero status.
    Exited(i32),
}

/// Raw output of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput {
    /// Captured stdout, trailing newlines trimmed.
    pub stdout: String,
    /// Captured stderr, trailing newlines trimmed.
    pub stderr: String,
    /// How the call ended.
    pub termination: Termination,
}

impl CallOutput {
    /// Apply the error policy: a non-zero exit first, then any stderr text.
    pub fn into_result(self) -> Result<String> {
        if let Termination::Exited(code) = self.termination {
            return Err(CatdocError::Exit {
                code,
                stderr: self.stderr,
                stdout: self.stdout,
            });
        }
        if !self.stderr.is_empty() {
            return Err(CatdocError::Diagnostic {
                message: self.stderr,
                stdout: self.stdout,
            });
        }
        Ok(self.stdout)
    }
}

/// Call `export` with no arguments on a bound instance and collect its
/// output.
///
/// Traps and missing exports are returned as errors directly; process
/// exits are reported through [`Termination`].
pub fn invoke(bound: &mut BoundInstance, export: &str) -> Result<CallOutput> {
    let func = bound
        .instance
        .get_func(&mut bound.store, export)
        .ok_or_else(|| CatdocError::ExportNotFound(export.to_string()))?;
    let ty = func.ty(&bound.store);
    if ty.params().len() != 0 {
        return Err(CatdocError::ExportNotFound(export.to_string()));
    }
    // Declared results are ignored; catdoc answers on stdout.
    let mut results: Vec<Val> = ty.results().map(|_| Val::I32(0)).collect();

    crate::debug!(export, "calling catdoc export");
    let returned = func.call(&mut bound.store, &[], &mut results);
    crate::debug!(
        export,
        peak_memory = bound.store.data().limiter.peak_memory(),
        "catdoc export returned"
    );
    let termination = match returned {
        Ok(()) => Termination::Completed,
        Err(e) => {
            if let Some(interrupted) = bound.store.data().interruption() {
                return Err(interrupted);
            }
            match e.downcast_ref::<I32Exit>() {
                Some(I32Exit(0)) => Termination::Completed,
                Some(I32Exit(code)) => Termination::Exited(*code),
                None => return Err(CatdocError::Trap(e)),
            }
        }
    };

    Ok(CallOutput {
        stdout: trim_trailing_newlines(&bound.io.stdout_str()).to_string(),
        stderr: trim_trailing_newlines(&bound.io.stderr_str()).to_string(),
        termination,
    })
}

/// Instantiate, call `export` and apply the error policy.
///
/// `input` is mounted at `/input_file` when present. Nothing stops an
/// input-reading export from being called without one; the program then
/// fails to open its file and reports it.
pub fn call(
    runtime: &Runtime,
    export: &str,
    input: Option<SingleFileFs>,
    deadline: Option<Deadline>,
) -> Result<String> {
    let prepared = runtime.prepared()?;
    let mut bound = instance::instantiate(&prepared, runtime.config(), input, deadline)?;
    invoke(&mut bound, export)?.into_result()
}

/// Like [`call`], bounded by `timeout`.
///
/// The call runs on the blocking pool while a ticker advances the engine
/// epoch; the instance traps on the first tick past its deadline. Only that
/// instance is affected.
pub async fn call_with_timeout(
    runtime: Arc<Runtime>,
    export: &'static str,
    input: Option<SingleFileFs>,
    timeout: Duration,
) -> Result<String> {
    let init_runtime = Arc::clone(&runtime);
    let prepared = tokio::task::spawn_blocking(move || init_runtime.prepared())
        .await
        .map_err(|e| CatdocError::Trap(anyhow::anyhow!("initialization task panicked: {}", e)))??;

    let epoch_interval = runtime.config().epoch_tick_interval;
    let ticker_engine = prepared.engine().clone();
    let ticker_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(epoch_interval);
        loop {
            interval.tick().await;
            ticker_engine.increment_epoch();
        }
    });

    // A budget too large to land on a clock instant is no deadline at all.
    let deadline = Deadline::after(timeout);
    let exec_handle = tokio::task::spawn_blocking(move || call(&runtime, export, input, deadline));

    let result = tokio::select! {
        result = exec_handle => {
            match result {
                Ok(inner_result) => inner_result,
                Err(e) => Err(CatdocError::Trap(anyhow::anyhow!("call task panicked: {}", e))),
            }
        }
        _ = tokio::time::sleep(timeout.saturating_add(epoch_interval.saturating_mul(2))) => {
            Err(CatdocError::Timeout(timeout))
        }
    };
    ticker_handle.abort();
    // The deadline has passed by now, so one more tick stops an instance
    // that is still running.
    prepared.engine().increment_epoch();
    result
}

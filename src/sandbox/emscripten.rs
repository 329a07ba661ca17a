//! `env` imports emitted by Emscripten.
//!
//! Every function here is registered against the signature the module
//! declares, so minor differences between Emscripten releases (for example
//! `emscripten_memcpy_big` returning its destination or not) do not turn
//! into link errors.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail};
use wasmtime::{Caller, Extern, Func, FuncType, Linker, Memory, Val, ValType};

use crate::sandbox::limits::StoreData;

/// Import module name for Emscripten glue.
pub const MODULE: &str = "env";

/// Syscalls catdoc issues while inspecting its surroundings. With a single
/// synthetic input there is nothing real behind them, so they report
/// success and an empty directory.
pub const SYSCALL_STUBS: [&str; 3] = [
    "__syscall_faccessat",
    "__syscall_getdents64",
    "__syscall_unlinkat",
];

const WASM_PAGE: u64 = 64 * 1024;

/// Stack pointer accessors, by name in older and newer Emscripten releases.
const STACK_SAVE: [&str; 2] = ["stackSave", "emscripten_stack_get_current"];
const STACK_RESTORE: [&str; 2] = ["stackRestore", "_emscripten_stack_restore"];

/// Raised by `_emscripten_throw_longjmp` and caught by the enclosing
/// `invoke_*` trampoline.
#[derive(Debug)]
pub struct Longjmp;

impl fmt::Display for Longjmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("longjmp outside of an invoke_* frame")
    }
}

impl std::error::Error for Longjmp {}

fn zero(ty: &ValType) -> anyhow::Result<Val> {
    Ok(match ty {
        ValType::I32 => Val::I32(0),
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        other => bail!("cannot synthesize a {other:?} result"),
    })
}

fn fill_zero(ty: &FuncType, results: &mut [Val]) -> anyhow::Result<()> {
    for (slot, ty) in results.iter_mut().zip(ty.results()) {
        *slot = zero(&ty)?;
    }
    Ok(())
}

fn memory(caller: &mut Caller<'_, StoreData>) -> anyhow::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("module does not export `memory`"))
}

fn arg_u32(params: &[Val], index: usize) -> anyhow::Result<u32> {
    params
        .get(index)
        .and_then(Val::i32)
        .map(|v| v as u32)
        .ok_or_else(|| anyhow!("expected an i32 argument at position {index}"))
}

fn millis_since_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

fn export_func(caller: &mut Caller<'_, StoreData>, names: &[&str]) -> Option<Func> {
    names
        .iter()
        .find_map(|name| caller.get_export(name).and_then(Extern::into_func))
}

fn stack_save(caller: &mut Caller<'_, StoreData>) -> anyhow::Result<Option<i32>> {
    match export_func(caller, &STACK_SAVE) {
        Some(save) => Ok(Some(save.typed::<(), i32>(&*caller)?.call(&mut *caller, ())?)),
        None => Ok(None),
    }
}

fn stack_restore(caller: &mut Caller<'_, StoreData>, sp: i32) -> anyhow::Result<()> {
    let restore = export_func(caller, &STACK_RESTORE)
        .ok_or_else(|| anyhow!("longjmp without a stack restore export"))?;
    restore.typed::<i32, ()>(&*caller)?.call(&mut *caller, sp)
}

/// Call `table[params[0]](params[1..])`, turning a longjmp into
/// `setThrew(1, 0)` the way Emscripten's JS glue does.
///
/// The guest stack pointer is saved before the call and put back when the
/// call unwinds, since the frames between `setjmp` and `longjmp` never
/// return to pop themselves.
fn invoke(
    mut caller: Caller<'_, StoreData>,
    ty: &FuncType,
    params: &[Val],
    results: &mut [Val],
) -> anyhow::Result<()> {
    let index = arg_u32(params, 0)?;
    let table = caller
        .get_export("__indirect_function_table")
        .and_then(Extern::into_table)
        .ok_or_else(|| anyhow!("module does not export `__indirect_function_table`"))?;
    let target = table
        .get(&mut caller, index.try_into()?)
        .and_then(|r| r.as_func().flatten().copied())
        .ok_or_else(|| anyhow!("no function at table index {index}"))?;

    let saved_sp = stack_save(&mut caller)?;
    match target.call(&mut caller, &params[1..], results) {
        Ok(()) => Ok(()),
        Err(err) if err.is::<Longjmp>() => {
            if let Some(sp) = saved_sp {
                stack_restore(&mut caller, sp)?;
            }
            let set_threw = caller
                .get_export("setThrew")
                .and_then(Extern::into_func)
                .ok_or_else(|| anyhow!("longjmp without a `setThrew` export"))?;
            set_threw
                .typed::<(i32, i32), ()>(&caller)?
                .call(&mut caller, (1, 0))?;
            fill_zero(ty, results)
        }
        Err(err) => Err(err),
    }
}

/// Define the `env` function `name` with the module's declared type `ty`.
///
/// Returns `false` when `name` is not something this host provides.
pub fn link(linker: &mut Linker<StoreData>, name: &str, ty: &FuncType) -> anyhow::Result<bool> {
    let declared = ty.clone();

    if SYSCALL_STUBS.contains(&name) {
        linker.func_new(MODULE, name, ty.clone(), move |_, _, results| {
            fill_zero(&declared, results)
        })?;
        return Ok(true);
    }

    if name.starts_with("invoke_") {
        linker.func_new(MODULE, name, ty.clone(), move |caller, params, results| {
            invoke(caller, &declared, params, results)
        })?;
        return Ok(true);
    }

    match name {
        "emscripten_notify_memory_growth" => {
            linker.func_new(MODULE, name, ty.clone(), move |_, _, results| {
                fill_zero(&declared, results)
            })?;
        }
        "_emscripten_throw_longjmp" => {
            linker.func_new(MODULE, name, ty.clone(), |_, _, _| Err(Longjmp.into()))?;
        }
        "emscripten_memcpy_big" | "_emscripten_memcpy_js" => {
            linker.func_new(MODULE, name, ty.clone(), move |mut caller, params, results| {
                let (dest, src, len) = (
                    arg_u32(params, 0)? as usize,
                    arg_u32(params, 1)? as usize,
                    arg_u32(params, 2)? as usize,
                );
                let data = memory(&mut caller)?.data_mut(&mut caller);
                let in_bounds = |at: usize| at.checked_add(len).is_some_and(|end| end <= data.len());
                if !in_bounds(dest) || !in_bounds(src) {
                    bail!("memcpy out of bounds");
                }
                data.copy_within(src..src + len, dest);
                fill_zero(&declared, results)?;
                if let Some(slot) = results.first_mut() {
                    *slot = Val::I32(dest as i32);
                }
                Ok(())
            })?;
        }
        "emscripten_resize_heap" => {
            linker.func_new(MODULE, name, ty.clone(), move |mut caller, params, results| {
                let requested = u64::from(arg_u32(params, 0)?);
                let memory = memory(&mut caller)?;
                let current = memory.data_size(&caller) as u64;
                let grown = requested <= current
                    || memory
                        .grow(&mut caller, (requested - current).div_ceil(WASM_PAGE))
                        .is_ok();
                fill_zero(&declared, results)?;
                if let Some(slot) = results.first_mut() {
                    *slot = Val::I32(i32::from(grown));
                }
                Ok(())
            })?;
        }
        "emscripten_date_now" | "emscripten_get_now" | "_emscripten_get_now" => {
            linker.func_new(MODULE, name, ty.clone(), move |_, _, results| {
                fill_zero(&declared, results)?;
                if let Some(slot) = results.first_mut() {
                    *slot = Val::F64(millis_since_epoch().to_bits());
                }
                Ok(())
            })?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

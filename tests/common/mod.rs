//! A stand-in for catdoc.wasm written in WebAssembly text.
//!
//! It speaks the same protocol as the real module: reads `/input_file`
//! through WASI, answers on stdout, complains on stderr and sometimes calls
//! `proc_exit`.

#![allow(dead_code)]

use catdoc_sandbox_rs::prelude::*;

/// Export -> behaviour:
///
/// - `get_version`: banner, or "not initialized" on stderr if `_initialize`
///   never ran
/// - `get_text`: echoes the first 256 bytes of `/input_file`
/// - `get_title`: "partial" on stdout plus a warning on stderr, exit 0
/// - `get_subject`: message on stderr, `proc_exit(2)`
/// - `get_comments`: "ok", then `proc_exit(0)`
/// - `get_keywords`: prints "Keywords" through `invoke_vi`
/// - `get_author`: dumps the environment block
/// - `get_last_author`: calls the three stubbed syscalls, prints "stubbed"
/// - `get_annotation_authors`: three lines, one duplicated
/// - `trap`, `spin`, `takes_args`: failure modes
pub const FAKE_CATDOC: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_sizes_get" (func $environ_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_get" (func $environ_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (import "env" "__syscall_faccessat" (func $faccessat (param i32 i32 i32 i32) (result i32)))
  (import "env" "__syscall_getdents64" (func $getdents64 (param i32 i32 i32) (result i32)))
  (import "env" "__syscall_unlinkat" (func $unlinkat (param i32 i32 i32) (result i32)))
  (import "env" "invoke_vi" (func $invoke_vi (param i32 i32)))

  (memory (export "memory") 1)
  (table (export "__indirect_function_table") 1 funcref)
  (elem (i32.const 0) func $emit_keywords)
  (global $ready (mut i32) (i32.const 0))

  (data (i32.const 16) ".")
  (data (i32.const 128) "Catdoc Version 0.95\n")
  (data (i32.const 160) "warning: unknown charset\n")
  (data (i32.const 192) "partial\n")
  (data (i32.const 208) "fatal: cannot read\n")
  (data (i32.const 240) "H. Potter\nR. Weasley\nH. Potter\n")
  (data (i32.const 288) "not initialized\n")
  (data (i32.const 320) "stubbed\n")
  (data (i32.const 336) "Keywords\n")
  (data (i32.const 352) "ok\n")
  (data (i32.const 400) "cannot read input\n")

  (func $write (param $fd i32) (param $ptr i32) (param $len i32)
    (i32.store (i32.const 56) (local.get $ptr))
    (i32.store (i32.const 60) (local.get $len))
    (drop (call $fd_write (local.get $fd) (i32.const 56) (i32.const 1) (i32.const 64))))

  (func $emit_keywords (param $ptr i32)
    (call $write (i32.const 1) (local.get $ptr) (i32.const 9)))

  (func (export "_initialize")
    (global.set $ready (i32.const 1)))

  (func (export "get_version")
    (if (i32.eqz (global.get $ready))
      (then
        (call $write (i32.const 2) (i32.const 288) (i32.const 16))
        (return)))
    (call $write (i32.const 1) (i32.const 128) (i32.const 20)))

  (func (export "get_text")
    ;; rights_base 2 is fd_read
    (if (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 1)
          (i32.const 0) (i64.const 2) (i64.const 0) (i32.const 0) (i32.const 32))
      (then
        (call $write (i32.const 2) (i32.const 400) (i32.const 18))
        (call $proc_exit (i32.const 1))))
    (i32.store (i32.const 40) (i32.const 1024))
    (i32.store (i32.const 44) (i32.const 256))
    (if (call $fd_read (i32.load (i32.const 32)) (i32.const 40) (i32.const 1) (i32.const 48))
      (then
        (call $write (i32.const 2) (i32.const 400) (i32.const 18))
        (call $proc_exit (i32.const 1))))
    (call $write (i32.const 1) (i32.const 1024) (i32.load (i32.const 48))))

  (func (export "get_title")
    (call $write (i32.const 1) (i32.const 192) (i32.const 8))
    (call $write (i32.const 2) (i32.const 160) (i32.const 25)))

  (func (export "get_subject")
    (call $write (i32.const 2) (i32.const 208) (i32.const 19))
    (call $proc_exit (i32.const 2)))

  (func (export "get_comments")
    (call $write (i32.const 1) (i32.const 352) (i32.const 3))
    (call $proc_exit (i32.const 0)))

  (func (export "get_keywords")
    (call $invoke_vi (i32.const 0) (i32.const 336)))

  (func (export "get_author")
    (drop (call $environ_sizes_get (i32.const 2040) (i32.const 2044)))
    (drop (call $environ_get (i32.const 2048) (i32.const 2304)))
    (call $write (i32.const 1) (i32.const 2304) (i32.load (i32.const 2044))))

  (func (export "get_last_author")
    (if (i32.or
          (i32.or
            (call $faccessat (i32.const -100) (i32.const 16) (i32.const 0) (i32.const 0))
            (call $getdents64 (i32.const 3) (i32.const 1024) (i32.const 256)))
          (call $unlinkat (i32.const -100) (i32.const 16) (i32.const 0)))
      (then
        (call $write (i32.const 2) (i32.const 400) (i32.const 18))
        (return)))
    (call $write (i32.const 1) (i32.const 320) (i32.const 8)))

  (func (export "get_annotation_authors")
    (call $write (i32.const 1) (i32.const 240) (i32.const 31)))

  (func (export "trap")
    unreachable)

  (func (export "spin")
    (loop $forever (br $forever)))

  (func (export "takes_args") (param i32))
)
"#;

/// Emscripten-style setjmp/longjmp over a shadow stack.
///
/// `get_text` calls `$deep` through `invoke_v`; `$deep` moves the stack
/// pointer down 1000 bytes and longjmps without unwinding it. Prints
/// "restored" when the pointer is back at 60000 and `setThrew` ran,
/// "leaked" otherwise.
pub const LONGJMP_MODULE: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "env" "invoke_v" (func $invoke_v (param i32)))
  (import "env" "_emscripten_throw_longjmp" (func $throw_longjmp))

  (memory (export "memory") 1)
  (table (export "__indirect_function_table") 1 funcref)
  (elem (i32.const 0) func $deep)
  (global $sp (mut i32) (i32.const 60000))
  (global $threw (mut i32) (i32.const 0))

  (data (i32.const 128) "restored\n")
  (data (i32.const 144) "leaked\n")

  (func $write (param $ptr i32) (param $len i32)
    (i32.store (i32.const 56) (local.get $ptr))
    (i32.store (i32.const 60) (local.get $len))
    (drop (call $fd_write (i32.const 1) (i32.const 56) (i32.const 1) (i32.const 64))))

  (func (export "stackSave") (result i32)
    (global.get $sp))

  (func (export "stackRestore") (param $sp i32)
    (global.set $sp (local.get $sp)))

  (func (export "setThrew") (param $threw i32) (param $value i32)
    (global.set $threw (local.get $threw)))

  (func $deep
    (global.set $sp (i32.sub (global.get $sp) (i32.const 1000)))
    (call $throw_longjmp))

  (func (export "get_text")
    (call $invoke_v (i32.const 0))
    (if (i32.and
          (i32.eq (global.get $sp) (i32.const 60000))
          (global.get $threw))
      (then
        (call $write (i32.const 128) (i32.const 9))
        (return)))
    (call $write (i32.const 144) (i32.const 7)))
)
"#;

/// Config pointing at the fake module, with an empty `/charsets`.
pub fn fake_config() -> CatdocConfig {
    CatdocConfig::builder()
        .module(FAKE_CATDOC)
        .no_charsets_dir()
        .build()
}

/// A handle with its own runtime over the fake module.
pub fn fake_catdoc() -> Catdoc {
    Catdoc::new(fake_config()).expect("valid config")
}

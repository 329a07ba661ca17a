//! Resource limiting and per-instance store state.

use std::time::{Duration, Instant};

use wasmtime::{ResourceLimiter, Store, UpdateDeadline};

use crate::error::CatdocError;
use wasi_common::WasiCtx;

/// Resource limiter that enforces memory and table size limits.
pub struct SandboxLimiter {
    /// Maximum memory in bytes.
    max_memory: u64,
    /// Peak memory allocation (highest ever seen).
    peak_memory: u64,
    /// Maximum table elements.
    max_table_elements: u64,
    /// Whether the limit has been exceeded.
    limit_exceeded: bool,
}

impl SandboxLimiter {
    /// Create a new resource limiter with the specified memory limit.
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            peak_memory: 0,
            max_table_elements: 10_000,
            limit_exceeded: false,
        }
    }

    /// Check if any limit has been exceeded.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Get the peak memory usage (highest ever observed).
    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }

    /// Get the configured maximum memory.
    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }
}

impl ResourceLimiter for SandboxLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired_bytes = desired as u64;

        if desired_bytes > self.max_memory {
            self.limit_exceeded = true;
            return Ok(false);
        }

        self.peak_memory = self.peak_memory.max(desired_bytes);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_table_elements {
            self.limit_exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Wall-clock deadline for one call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// When the call must be interrupted.
    pub at: Instant,
    /// The budget the deadline was derived from, for error reporting.
    pub budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now, or `None` when that instant is not
    /// representable.
    pub fn after(budget: Duration) -> Option<Self> {
        let at = Instant::now().checked_add(budget)?;
        Some(Self { at, budget })
    }

    /// Check whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Store data for one instance: limiter, WASI state and deadline.
pub struct StoreData {
    /// The resource limiter.
    pub limiter: SandboxLimiter,
    /// Descriptors, mounts, environment and sinks seen by the program.
    pub wasi: WasiCtx,
    /// Optional deadline checked on every epoch tick.
    pub deadline: Option<Deadline>,
    /// Set when the deadline interrupted execution.
    pub deadline_hit: bool,
}

impl StoreData {
    /// Create new store data with the given memory limit and WASI state.
    pub fn new(max_memory: u64, wasi: WasiCtx, deadline: Option<Deadline>) -> Self {
        Self {
            limiter: SandboxLimiter::new(max_memory),
            wasi,
            deadline,
            deadline_hit: false,
        }
    }

    /// The host-side reason execution stopped, if any.
    pub fn interruption(&self) -> Option<CatdocError> {
        if self.deadline_hit {
            let budget = self.deadline.map(|d| d.budget).unwrap_or_default();
            return Some(CatdocError::Timeout(budget));
        }
        if self.limiter.limit_exceeded() {
            return Some(CatdocError::MemoryLimitExceeded(format!(
                "instance asked for more than {} bytes",
                self.limiter.max_memory()
            )));
        }
        None
    }
}

/// Extension trait for Store to configure limits and interruption.
pub trait StoreLimiterExt {
    /// Configure the store with resource limiting enabled.
    fn configure_limiter(&mut self);

    /// Trap the instance on the first epoch tick after its deadline.
    ///
    /// Stores without a deadline keep running however often the engine
    /// epoch advances.
    fn configure_deadline(&mut self);
}

impl StoreLimiterExt for Store<StoreData> {
    fn configure_limiter(&mut self) {
        self.limiter(|data| &mut data.limiter);
    }

    fn configure_deadline(&mut self) {
        self.set_epoch_deadline(1);
        self.epoch_deadline_callback(|mut ctx| {
            let data = ctx.data_mut();
            match data.deadline {
                Some(deadline) if deadline.expired() => {
                    data.deadline_hit = true;
                    Err(wasmtime::Trap::Interrupt.into())
                }
                _ => Ok(UpdateDeadline::Continue(1)),
            }
        });
    }
}

//! Output capture for the sandboxed program's stdout/stderr.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

/// A writer that captures output to a buffer.
///
/// Clones share the buffer, so the host keeps one handle while the instance
/// writes through another.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Create a new captured output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while holding the lock leaves plain bytes behind.
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Append bytes to the buffer.
    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The pair of sinks bound to one instance.
#[derive(Clone, Debug, Default)]
pub struct CallIo {
    /// Captured stdout.
    pub stdout: CapturedOutput,
    /// Captured stderr.
    pub stderr: CapturedOutput,
}

impl CallIo {
    /// Create a fresh pair of empty sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        self.stdout.to_string_lossy()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        self.stderr.to_string_lossy()
    }
}

/// Strip trailing line terminators the way catdoc's output is consumed.
pub fn trim_trailing_newlines(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

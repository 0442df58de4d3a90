//! Coroutine runtime settings read from the environment.
//!
//! ## `BOOT_STACK_SIZE`
//!
//! Stack size for `may` coroutines, decimal (`32768`) or hex (`0x8000`).
//! Default: `0x8000` (32 KB). Each connection runs on its own coroutine, so
//! total virtual memory is roughly stack size × concurrent connections.

use std::env;

use tracing::{debug, warn};

/// Default coroutine stack size (32 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Parse a decimal or `0x`-prefixed hex size.
#[must_use]
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = match env::var("BOOT_STACK_SIZE") {
            Ok(val) => parse_size(&val).filter(|s| *s > 0).unwrap_or_else(|| {
                warn!(value = %val, "Invalid BOOT_STACK_SIZE, using default");
                DEFAULT_STACK_SIZE
            }),
            Err(_) => DEFAULT_STACK_SIZE,
        };
        RuntimeConfig { stack_size }
    }

    /// Apply to the global `may` configuration.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
        debug!(stack_size = self.stack_size, "Coroutine runtime configured");
    }
}

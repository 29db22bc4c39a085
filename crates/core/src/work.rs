// crates/core/src/work.rs
//! The per-item work capability.
//!
//! The manager only needs `item -> outcome`. What an item *means* (a comic
//! file to tag, a path to rename) belongs to the implementor. Calls are
//! blocking and run on the blocking pool, so implementations may do file I/O
//! directly.

use std::path::Path;

use crate::error::WorkError;

/// Result of one work invocation: optional detail text on success.
pub type WorkResult = Result<Option<String>, WorkError>;

/// Single-method capability invoked once per item.
///
/// The manager wraps every call in a catch-all: returned errors *and* panics
/// become error results, so implementations don't need their own.
pub trait ItemWork: Send + Sync + 'static {
    fn invoke(&self, item: &str) -> WorkResult;
}

impl<F> ItemWork for F
where
    F: Fn(&str) -> WorkResult + Send + Sync + 'static,
{
    fn invoke(&self, item: &str) -> WorkResult {
        self(item)
    }
}

/// Treats each item as a filesystem path and reports its size.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatFileWork;

impl ItemWork for StatFileWork {
    fn invoke(&self, item: &str) -> WorkResult {
        let meta = std::fs::metadata(Path::new(item))?;
        if !meta.is_file() {
            return Err(WorkError::new("not a regular file"));
        }
        Ok(Some(format!("{} bytes", meta.len())))
    }
}

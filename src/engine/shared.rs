//! Async handle for concurrent callers
//!
//! All callers go through one `tokio::sync::Mutex`, so operations from
//! different tasks are serialized and each one still commits atomically.

use super::Exchange;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Cloneable single-writer handle to an [`Exchange`]
#[derive(Clone)]
pub struct SharedExchange {
    inner: Arc<Mutex<Exchange>>,
}

impl SharedExchange {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            inner: Arc::new(Mutex::new(exchange)),
        }
    }

    /// Exclusive access for a sequence of calls that must not interleave
    pub async fn lock(&self) -> MutexGuard<'_, Exchange> {
        self.inner.lock().await
    }

    /// Run one closure with exclusive access
    pub async fn execute<T>(&self, f: impl FnOnce(&mut Exchange) -> T) -> T {
        let mut exchange = self.inner.lock().await;
        f(&mut exchange)
    }

    /// Run one closure with shared read access
    pub async fn read<T>(&self, f: impl FnOnce(&Exchange) -> T) -> T {
        let exchange = self.inner.lock().await;
        f(&exchange)
    }
}

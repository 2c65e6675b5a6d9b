//! A value that is produced once and awaited any number of times.

use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

struct Inner<T> {
    value: OnceLock<T>,
    notify: Notify,
}

/// Write-once completion cell.
///
/// Clones share the same cell. The first `resolve` wins; later calls are
/// ignored. Awaiting works both before and after resolution.
pub struct Resolvable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Resolvable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Resolvable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvable")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T> Resolvable<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Complete the cell. Returns `false` if it was already completed.
    pub fn resolve(&self, value: T) -> bool {
        let stored = self.inner.value.set(value).is_ok();
        if stored {
            self.inner.notify.notify_waiters();
        }
        stored
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// The value, if already resolved.
    pub fn get(&self) -> Option<&T> {
        self.inner.value.get()
    }
}

impl<T: Clone> Resolvable<T> {
    /// Wait for the value.
    pub async fn wait(&self) -> T {
        loop {
            // Register before checking so a concurrent resolve cannot be missed.
            let notified = self.inner.notify.notified();
            if let Some(value) = self.inner.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolve_before_wait() {
        let cell = Resolvable::new();
        assert!(cell.resolve(7));
        assert_eq!(cell.wait().await, 7);
        assert_eq!(cell.wait().await, 7);
    }

    #[tokio::test]
    async fn wait_before_resolve_wakes_every_waiter() {
        let cell: Resolvable<String> = Resolvable::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cell = cell.clone();
                tokio::spawn(async move { cell.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        cell.resolve("done".to_string());

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), "done");
        }
    }

    #[tokio::test]
    async fn second_resolve_is_ignored() {
        let cell = Resolvable::new();
        assert!(cell.resolve(1));
        assert!(!cell.resolve(2));
        assert_eq!(cell.get(), Some(&1));
    }
}

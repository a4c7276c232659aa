//! Collapse concurrent computations that share a key.
//!
//! # Design
//! - The first caller for a key installs a shared future; later callers
//!   clone it and await the same terminal result.
//! - The computation runs on its own task, so it completes even when every
//!   waiter stops polling.
//! - The group entry is removed by the computation itself, under the table
//!   lock and only if its id still matches, before the result is published.
//!   A caller arriving after that point starts a fresh computation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use prism_core::{ImageError, ImageResult};

type SharedResult<T> = Shared<BoxFuture<'static, ImageResult<T>>>;
type GroupTable<T> = Arc<Mutex<HashMap<String, Group<T>>>>;

struct Group<T> {
    id: u64,
    result: SharedResult<T>,
}

/// Per-key deduplication of in-flight work.
pub struct SingleFlight<T> {
    groups: GroupTable<T>,
    next_id: AtomicU64,
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SingleFlight")
            .field("in_flight", &lock(&self.groups).len())
            .finish()
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

/// Handle on a joined computation.
#[must_use = "a joined computation does nothing until awaited"]
pub struct Joined<T> {
    shared: bool,
    result: SharedResult<T>,
}

impl<T: Clone + Send + Sync + 'static> Joined<T> {
    /// Whether another caller started the computation.
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// Await the terminal result.
    ///
    /// # Errors
    ///
    /// The computation's error, or `Backend` if its task panicked.
    pub async fn wait(self) -> ImageResult<T> {
        self.result.await
    }
}

fn lock<T>(table: &GroupTable<T>) -> MutexGuard<'_, HashMap<String, Group<T>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Release<T> {
    table: GroupTable<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        let mut groups = lock(&self.table);
        if groups.get(&self.key).is_some_and(|group| group.id == self.id) {
            groups.remove(&self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the computation for `key`, starting `compute` if none is in flight.
    ///
    /// `compute` is dropped unused when the caller joins an existing group.
    /// Must be called from within a Tokio runtime.
    pub fn join<F>(&self, key: &str, compute: F) -> Joined<T>
    where
        F: Future<Output = ImageResult<T>> + Send + 'static,
    {
        let mut groups = lock(&self.groups);
        if let Some(group) = groups.get(key) {
            return Joined {
                shared: true,
                result: group.result.clone(),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let release = Release {
            table: Arc::clone(&self.groups),
            key: key.to_string(),
            id,
        };
        let task = tokio::spawn(async move {
            let _release = release;
            compute.await
        });
        let result = async move {
            task.await
                .unwrap_or_else(|err| Err(ImageError::backend("singleflight.join", err)))
        }
        .boxed()
        .shared();
        groups.insert(
            key.to_string(),
            Group {
                id,
                result: result.clone(),
            },
        );
        Joined {
            shared: false,
            result,
        }
    }

    /// Join and await in one step.
    ///
    /// # Errors
    ///
    /// See [`Joined::wait`].
    pub async fn run<F>(&self, key: &str, compute: F) -> ImageResult<T>
    where
        F: Future<Output = ImageResult<T>> + Send + 'static,
    {
        self.join(key, compute).wait().await
    }

    /// Number of keys with a computation in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.groups).len()
    }
}

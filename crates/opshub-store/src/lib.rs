//! Realtime document store used by the vote aggregator.
//!
//! The hosted platform gives us four capabilities and this crate models
//! exactly those:
//! - point reads of a document or subtree
//! - conditional read-modify-write ("transaction"), re-run on conflict
//! - unconditional writes and deletes
//! - live subscriptions that push a fresh snapshot after every change
//!
//! `MemoryStore` is the in-process backend used by the server and tests.

pub mod error;
pub mod memory;
pub mod subscription;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use subscription::{Snapshot, Subscription};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// What a transaction update function wants done with the value it saw.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    /// Replace the value at the path.
    Set(Value),
    /// Leave the value untouched and end the transaction.
    Abort,
}

/// Result of a finished transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxCommit {
    /// False when the update function aborted.
    pub committed: bool,
    /// Value at the path after the transaction.
    pub snapshot: Option<Value>,
    /// Number of times the update function ran.
    pub attempts: u32,
}

/// Update function for [`DocumentStore::transaction`].
///
/// May be called several times; it must be a pure function of its input.
pub type TxUpdate<'a> = &'a (dyn Fn(Option<&Value>) -> TxDecision + Send + Sync);

/// Capabilities consumed from the realtime document store.
pub trait DocumentStore: Send + Sync {
    /// Current value at `path`, or `None` if nothing is stored there.
    fn read<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Atomic read-modify-write of the value at `path`.
    ///
    /// `update` is re-run against the fresh value whenever another writer
    /// changed `path` between the read and the commit. Conflicts past the
    /// retry ceiling surface as [`StoreError::TooManyRetries`].
    fn transaction<'a>(&'a self, path: &'a str, update: TxUpdate<'a>) -> StoreFuture<'a, TxCommit>;

    /// Unconditional replace.
    fn write<'a>(&'a self, path: &'a str, value: Value) -> StoreFuture<'a, ()>;

    /// Unconditional delete of `path` and everything below it.
    fn remove<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()>;

    /// Live view of `path`. The current snapshot is delivered first.
    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;
}

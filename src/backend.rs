//! Execution strategies for the bit test-and-set.
pub mod atomic;
pub mod pipelined;

use crate::config::{BackendKind, FilterConfig};
use crate::error::Result;
use crate::store::{RemoteStore, supports_scripting};
use std::time::Duration;
use tracing::{info, warn};

pub use atomic::AtomicBackend;
pub use pipelined::PipelinedBackend;

/// How an insertion treats an element that may already be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Probe every generation first and write nothing if the element is
    /// found. Keeps the counter equal to the number of distinct insertions.
    CheckAndSet,
    /// Set the bits in the newest generation unconditionally.
    Add,
}

pub trait FilterBackend {
    /// Inserts `item`, returning whether it was already present.
    fn test_and_set<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
        ttl: Option<Duration>,
        mode: InsertMode,
    ) -> Result<bool>;

    /// Read-only membership test.
    fn test<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
    ) -> Result<bool>;

    /// Removes every key the filter owns.
    fn clear<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum Backend {
    Atomic(AtomicBackend),
    NonAtomic(PipelinedBackend),
}

impl Backend {
    /// Resolves `config.backend()` against the store's capabilities and
    /// prepares the chosen variant.
    pub fn select<S: RemoteStore + ?Sized>(
        store: &S,
        config: &FilterConfig,
    ) -> Result<Self> {
        let kind = match config.backend() {
            BackendKind::Auto => match store.server_version()? {
                Some(version) if supports_scripting(&version) => {
                    BackendKind::Atomic
                }
                Some(version) => {
                    info!(%version, "Store has no scripting, using pipelined backend");
                    BackendKind::NonAtomic
                }
                None => {
                    warn!("Store reports no version, using pipelined backend");
                    BackendKind::NonAtomic
                }
            },
            kind => kind,
        };

        match kind {
            BackendKind::NonAtomic => {
                Ok(Backend::NonAtomic(PipelinedBackend::new(config)?))
            }
            BackendKind::Atomic | BackendKind::Auto => {
                Ok(Backend::Atomic(AtomicBackend::new(store)?))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Atomic(_) => BackendKind::Atomic,
            Backend::NonAtomic(_) => BackendKind::NonAtomic,
        }
    }
}

impl FilterBackend for Backend {
    fn test_and_set<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
        ttl: Option<Duration>,
        mode: InsertMode,
    ) -> Result<bool> {
        match self {
            Backend::Atomic(backend) => {
                backend.test_and_set(store, config, item, ttl, mode)
            }
            Backend::NonAtomic(backend) => {
                backend.test_and_set(store, config, item, ttl, mode)
            }
        }
    }

    fn test<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
    ) -> Result<bool> {
        match self {
            Backend::Atomic(backend) => backend.test(store, config, item),
            Backend::NonAtomic(backend) => backend.test(store, config, item),
        }
    }

    fn clear<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
    ) -> Result<()> {
        match self {
            Backend::Atomic(backend) => backend.clear(store, config),
            Backend::NonAtomic(backend) => backend.clear(store, config),
        }
    }
}

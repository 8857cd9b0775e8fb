use crate::backend::{Backend, FilterBackend, InsertMode};
use crate::config::{BackendKind, FilterConfig};
use crate::error::Result;
use crate::params::FilterParams;
use crate::store::RemoteStore;
use std::time::Duration;
use tracing::info;

/// Bloom filter whose bits live in a shared store.
///
/// Any number of processes may open a filter with the same configuration
/// against the same store and see each other's insertions. The filter itself
/// holds nothing mutable, so it can be shared across threads as is.
pub struct ScalingBloomFilter<S: RemoteStore> {
    store: S,
    config: FilterConfig,
    backend: Backend,
    params: FilterParams,
}

impl<S: RemoteStore> ScalingBloomFilter<S> {
    /// Validates `config`, then picks and prepares the backend. No command
    /// reaches the store before validation passes.
    pub fn new(store: S, config: FilterConfig) -> Result<Self> {
        config.validate()?;
        let params = FilterParams::fixed(config.capacity(), config.error_rate())?;
        let backend = Backend::select(&store, &config)?;

        info!(
            filter = config.name(),
            backend = %backend.kind(),
            capacity = config.capacity(),
            error_rate = config.error_rate(),
            bits = params.bits,
            hashes = params.num_hashes,
            "Opened bloom filter"
        );

        Ok(Self {
            store,
            config,
            backend,
            params,
        })
    }

    /// Inserts `item` unless it is already present.
    ///
    /// Returns `true` when the item was already in the filter, in which case
    /// nothing is written. With `ttl`, the key the item was written to
    /// expires after that long.
    pub fn insert(&self, item: &[u8], ttl: Option<Duration>) -> Result<bool> {
        self.backend.test_and_set(
            &self.store,
            &self.config,
            item,
            ttl,
            InsertMode::CheckAndSet,
        )
    }

    /// Sets `item`'s bits in the newest generation without probing older
    /// ones first. Returns `true` when every bit was already set there.
    ///
    /// Cheaper than [`insert`](Self::insert) but lets an item land in more
    /// than one generation of a scaling filter.
    pub fn add(&self, item: &[u8], ttl: Option<Duration>) -> Result<bool> {
        self.backend.test_and_set(
            &self.store,
            &self.config,
            item,
            ttl,
            InsertMode::Add,
        )
    }

    pub fn contains(&self, item: &[u8]) -> Result<bool> {
        self.backend.test(&self.store, &self.config, item)
    }

    /// Deletes the counter and every bit vector of the filter.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear(&self.store, &self.config)
    }

    /// Insertions that changed at least one bit since the last clear.
    pub fn count(&self) -> Result<u64> {
        Ok(self
            .store
            .get_counter(&self.config.count_key())?
            .unwrap_or(0))
    }

    /// Nominal size of the filter for its configured capacity.
    pub fn params(&self) -> FilterParams {
        self.params
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: RemoteStore> std::fmt::Debug for ScalingBloomFilter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ScalingBloomFilter {{ name: {}, backend: {}, capacity: {}, error_rate: {}, bits: {}, num_hashes: {} }}",
            self.config.name(),
            self.backend.kind(),
            self.config.capacity(),
            self.config.error_rate(),
            self.params.bits,
            self.params.num_hashes
        )
    }
}

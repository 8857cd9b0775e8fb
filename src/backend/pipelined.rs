use crate::backend::{FilterBackend, InsertMode};
use crate::config::FilterConfig;
use crate::error::Result;
use crate::hash::offsets_for;
use crate::params::FilterParams;
use crate::store::RemoteStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-size filter driven from the client with pipelined bit commands.
///
/// For stores without scripting. The filter never scales: every element
/// goes into the single vector stored under the filter name. Reads and
/// writes are separate round trips, so two clients inserting the same new
/// element concurrently may both report it as new and both bump the counter.
///
/// The vector is sized with the undiscounted error rate
/// ([`FilterParams::fixed`], 9585 bits and 6 hashes for 1000 elements at
/// 1%). Older pipelined clients sized it like scaling generation 1
/// (`p * 0.5`, 11027 bits and 7 hashes), so they compute different offsets
/// and cannot share a fixed-size filter with this one.
#[derive(Debug, Clone)]
pub struct PipelinedBackend {
    params: FilterParams,
}

impl PipelinedBackend {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let params = FilterParams::fixed(config.capacity(), config.error_rate())?;
        warn!(
            filter = config.name(),
            "Non-atomic backend: concurrent inserts of one element may both count it as new"
        );
        Ok(Self { params })
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }
}

impl FilterBackend for PipelinedBackend {
    /// Both insert modes behave the same on a single vector: setting bits
    /// that are already set changes nothing.
    fn test_and_set<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
        ttl: Option<Duration>,
        _mode: InsertMode,
    ) -> Result<bool> {
        let key = config.fixed_key();
        let offsets = offsets_for(item, self.params);
        let previous = store.set_bits(key, &offsets)?;
        let found = previous.iter().all(|&bit| bit);

        if !found {
            store.incr(&config.count_key())?;
            if let Some(ttl) = ttl {
                store.expire(key, ttl)?;
            }
        }
        debug!(filter = key, found, "Pipelined insert");
        Ok(found)
    }

    fn test<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
    ) -> Result<bool> {
        let key = config.fixed_key();
        let offsets = offsets_for(item, self.params);
        let Some((&first, rest)) = offsets.split_first() else {
            return Ok(false);
        };

        // An unset first bit settles it without a batch round trip
        if !store.get_bit(key, first)? {
            return Ok(false);
        }
        Ok(store.get_bits(key, rest)?.into_iter().all(|bit| bit))
    }

    fn clear<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
    ) -> Result<()> {
        let removed = store.del(&[config.fixed_key().to_string(), config.count_key()])?;
        debug!(filter = config.name(), removed, "Cleared fixed-size filter");
        Ok(())
    }
}

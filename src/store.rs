//! The slice of a Redis-compatible store the filter needs.
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of invoking a cached script by its SHA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptReply {
    /// The script ran and returned an integer.
    Value(i64),
    /// The store does not know the SHA (`NOSCRIPT`); reload and retry.
    NotCached,
}

// Trait for the remote store
pub trait RemoteStore {
    /// Reads an integer key; `None` when the key does not exist
    fn get_counter(&self, key: &str) -> Result<Option<u64>>;
    /// INCR, returning the new value
    fn incr(&self, key: &str) -> Result<u64>;
    /// Deletes all `keys`, returning how many existed
    fn del(&self, keys: &[String]) -> Result<usize>;
    /// Sets a time to live on `key`, in whole seconds as given by
    /// [`expiry_secs`]; `false` when the key does not exist
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Remaining time to live; `None` for a missing or persistent key
    fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    /// Pipelined SETBIT to 1 of every offset.
    /// Returns the previous value of each bit, in order
    fn set_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>>;
    /// Single GETBIT
    fn get_bit(&self, key: &str, offset: u64) -> Result<bool>;
    /// Pipelined GETBIT of every offset, in order
    fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>>;
    /// Every key matching a glob `pattern`
    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;
    /// Caches a script body, returning its SHA-1 identifier
    fn script_load(&self, body: &str) -> Result<String>;
    /// Runs a cached script atomically
    fn eval_sha(
        &self,
        sha: &str,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<ScriptReply>;
    /// Advertised server version, if the store reports one
    fn server_version(&self) -> Result<Option<String>>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn get_counter(&self, key: &str) -> Result<Option<u64>> {
        (**self).get_counter(key)
    }

    fn incr(&self, key: &str) -> Result<u64> {
        (**self).incr(key)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        (**self).del(keys)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).expire(key, ttl)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        (**self).ttl(key)
    }

    fn set_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        (**self).set_bits(key, offsets)
    }

    fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        (**self).get_bit(key, offset)
    }

    fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        (**self).get_bits(key, offsets)
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).keys_matching(pattern)
    }

    fn script_load(&self, body: &str) -> Result<String> {
        (**self).script_load(body)
    }

    fn eval_sha(
        &self,
        sha: &str,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<ScriptReply> {
        (**self).eval_sha(sha, keys, args)
    }

    fn server_version(&self) -> Result<Option<String>> {
        (**self).server_version()
    }
}

/// Seconds passed to `EXPIRE` for `ttl`: rounded up, never below one.
///
/// `EXPIRE key 0` deletes the key, which would drop the bits that were just
/// written.
pub fn expiry_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Whether a server version string ("major.minor[.patch]") supports Lua
/// scripting, which arrived in 2.6.
pub fn supports_scripting(version: &str) -> bool {
    let mut parts = version
        .trim()
        .split('.')
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= (2, 6)
}

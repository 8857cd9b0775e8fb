use crate::backend::{FilterBackend, InsertMode};
use crate::config::FilterConfig;
use crate::error::{BloomError, Result};
use crate::script::{Script, script_args};
use crate::store::{RemoteStore, ScriptReply};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Reloads attempted per call when the store has evicted a script.
const MAX_RELOADS: usize = 1;

/// Scaling filter executed by store-side scripts.
///
/// Every insert or membership test is a single `EVALSHA`, so the store runs
/// the whole sequence without interleaving other calls on the same filter.
#[derive(Debug, Clone, Default)]
pub struct AtomicBackend;

impl AtomicBackend {
    /// Loads every script into the store up front.
    pub fn new<S: RemoteStore + ?Sized>(store: &S) -> Result<Self> {
        for script in Script::ALL {
            load(store, script)?;
        }
        Ok(Self)
    }

    fn invoke<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        script: Script,
        config: &FilterConfig,
        item: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let args = script_args(config.capacity(), config.error_rate(), item, ttl);
        let args: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
        let keys = [config.name()];

        for attempt in 0..=MAX_RELOADS {
            match store.eval_sha(script.sha(), &keys, &args)? {
                ScriptReply::Value(0) => return Ok(false),
                ScriptReply::Value(1) => return Ok(true),
                ScriptReply::Value(other) => {
                    return Err(BloomError::UnexpectedReply(format!(
                        "{script:?} script returned {other}"
                    )));
                }
                ScriptReply::NotCached if attempt < MAX_RELOADS => {
                    warn!(?script, sha = script.sha(), "Script evicted, reloading");
                    load(store, script)?;
                }
                ScriptReply::NotCached => break,
            }
        }

        Err(BloomError::ScriptNotCached {
            sha: script.sha().to_string(),
        })
    }
}

fn load<S: RemoteStore + ?Sized>(store: &S, script: Script) -> Result<()> {
    let sha = store.script_load(script.body())?;
    if !sha.eq_ignore_ascii_case(script.sha()) {
        return Err(BloomError::UnexpectedReply(format!(
            "store hashed {script:?} to {sha}, expected {}",
            script.sha()
        )));
    }
    debug!(?script, %sha, "Script loaded");
    Ok(())
}

impl FilterBackend for AtomicBackend {
    fn test_and_set<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
        ttl: Option<Duration>,
        mode: InsertMode,
    ) -> Result<bool> {
        let script = match mode {
            InsertMode::CheckAndSet => Script::CheckAndSet,
            InsertMode::Add => Script::Add,
        };
        self.invoke(store, script, config, item, ttl)
    }

    fn test<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
        item: &[u8],
    ) -> Result<bool> {
        self.invoke(store, Script::Check, config, item, None)
    }

    fn clear<S: RemoteStore + ?Sized>(
        &self,
        store: &S,
        config: &FilterConfig,
    ) -> Result<()> {
        let prefix = format!("{}:", config.name());
        // Only `<name>:count` and `<name>:<generation>` belong to this filter;
        // the pattern also matches e.g. a filter called `<name>:other`.
        let mut keys: BTreeSet<String> = store
            .keys_matching(&config.key_pattern())?
            .into_iter()
            .filter(|key| {
                key.strip_prefix(&prefix).is_some_and(|suffix| {
                    suffix == "count" || suffix.parse::<u32>().is_ok()
                })
            })
            .collect();
        keys.insert(config.count_key());

        let keys: Vec<String> = keys.into_iter().collect();
        let removed = store.del(&keys)?;
        debug!(filter = config.name(), removed, "Cleared scaling filter");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfigBuilder;
    use crate::scale::ScaleManager;
    use crate::store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(capacity: u64, error_rate: f64) -> (InMemoryStore, AtomicBackend, FilterConfig) {
        let store = InMemoryStore::new();
        let backend = AtomicBackend::new(&store).unwrap();
        let config = FilterConfigBuilder::default()
            .capacity(capacity)
            .error_rate(error_rate)
            .name("bf")
            .build()
            .unwrap();
        (store, backend, config)
    }

    #[test]
    fn test_add_reports_presence_in_newest_generation() {
        let (store, backend, config) = setup(1000, 0.01);
        assert!(!backend.test_and_set(&store, &config, b"x", None, InsertMode::Add).unwrap());
        assert!(backend.test_and_set(&store, &config, b"x", None, InsertMode::Add).unwrap());
        assert_eq!(store.get_counter("bf:count").unwrap(), Some(1));
        assert!(backend.test(&store, &config, b"x").unwrap());
    }

    #[test]
    fn test_first_generation_key_and_ttl() {
        let (store, backend, config) = setup(100, 0.01);
        backend
            .test_and_set(
                &store,
                &config,
                b"asdlolol",
                Some(Duration::from_secs(120)),
                InsertMode::CheckAndSet,
            )
            .unwrap();
        assert_eq!(store.keys_matching("*").unwrap(), vec!["bf:1", "bf:count"]);
        assert!(store.ttl("bf:1").unwrap().unwrap() > Duration::ZERO);
        assert_eq!(store.ttl("bf:count").unwrap(), None);
    }

    #[test]
    fn test_scaling_adds_generations() {
        let (store, backend, config) = setup(10, 0.05);
        let items: Vec<String> = (0..100).map(|i| format!("item-{i}")).collect();
        for item in &items {
            backend
                .test_and_set(&store, &config, item.as_bytes(), None, InsertMode::CheckAndSet)
                .unwrap();
        }

        let count = store.get_counter("bf:count").unwrap().unwrap();
        let generations = ScaleManager::new(10, 0.05).active_generations(count);
        assert!(generations >= 3, "expected growth, got {generations} generations");
        let keys = store.keys_matching("bf:*").unwrap();
        for generation in 1..=generations {
            assert!(
                keys.contains(&format!("bf:{generation}")),
                "generation {generation} should exist"
            );
        }
        for item in &items {
            assert!(backend.test(&store, &config, item.as_bytes()).unwrap());
        }
    }

    #[test]
    fn test_reload_after_flush_retries_once() {
        let (store, backend, config) = setup(1000, 0.01);
        store.flush_scripts().unwrap();
        assert!(!backend.test(&store, &config, b"blah").unwrap());
        // reloaded by the retry
        let args: [&[u8]; 4] = [b"1000", b"0.01", b"blah", b"0"];
        assert_eq!(
            store.eval_sha(Script::Check.sha(), &["bf"], &args).unwrap(),
            ScriptReply::Value(0)
        );
    }

    /// Store that forgets scripts as soon as they are loaded.
    struct EvictingStore {
        inner: InMemoryStore,
        loads: AtomicUsize,
    }

    impl RemoteStore for EvictingStore {
        fn get_counter(&self, key: &str) -> Result<Option<u64>> {
            self.inner.get_counter(key)
        }
        fn incr(&self, key: &str) -> Result<u64> {
            self.inner.incr(key)
        }
        fn del(&self, keys: &[String]) -> Result<usize> {
            self.inner.del(keys)
        }
        fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.inner.expire(key, ttl)
        }
        fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            self.inner.ttl(key)
        }
        fn set_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
            self.inner.set_bits(key, offsets)
        }
        fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
            self.inner.get_bit(key, offset)
        }
        fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
            self.inner.get_bits(key, offsets)
        }
        fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.keys_matching(pattern)
        }
        fn script_load(&self, body: &str) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.script_load(body)
        }
        fn eval_sha(&self, _sha: &str, _keys: &[&str], _args: &[&[u8]]) -> Result<ScriptReply> {
            Ok(ScriptReply::NotCached)
        }
        fn server_version(&self) -> Result<Option<String>> {
            self.inner.server_version()
        }
    }

    #[test]
    fn test_second_miss_is_fatal() {
        let store = EvictingStore {
            inner: InMemoryStore::new(),
            loads: AtomicUsize::new(0),
        };
        let backend = AtomicBackend::new(&store).unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), Script::ALL.len());
        let config = FilterConfigBuilder::default().name("bf").build().unwrap();

        let err = backend.test(&store, &config, b"blah").unwrap_err();
        match &err {
            BloomError::ScriptNotCached { sha } => assert_eq!(sha, Script::Check.sha()),
            other => panic!("Expected ScriptNotCached, got {other:?}"),
        }
        assert!(err.is_remote());
        // exactly one reload for the failed call
        assert_eq!(store.loads.load(Ordering::SeqCst), Script::ALL.len() + 1);
    }

    #[test]
    fn test_clear_leaves_foreign_keys() {
        let (store, backend, config) = setup(1000, 0.01);
        backend.test_and_set(&store, &config, b"x", None, InsertMode::Add).unwrap();
        store.set_bits("bf:other:1", &[1]).unwrap();
        store.set_bits("bf", &[1]).unwrap();

        backend.clear(&store, &config).unwrap();
        assert_eq!(store.keys_matching("*").unwrap(), vec!["bf", "bf:other:1"]);
        assert!(!backend.test(&store, &config, b"x").unwrap());
    }
}

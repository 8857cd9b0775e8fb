use scaling_bloom_rs::{
    BackendKind, FilterConfigBuilder, InMemoryStore, RemoteStore,
    ScalingBloomFilter,
};
use std::{env, sync::Once};

static TRACING: Once = Once::new();

/// Installs a `RUST_LOG`-driven subscriber once per test binary
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[allow(dead_code)]
pub fn get_redis_url() -> String {
    dotenvy::dotenv().ok();
    env::var("REDIS_URI").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// Filter over `store`, panicking on invalid parameters
#[allow(dead_code)]
pub fn create_filter<S: RemoteStore>(
    store: S,
    name: &str,
    capacity: u64,
    error_rate: f64,
    backend: BackendKind,
) -> ScalingBloomFilter<S> {
    init_tracing();
    let config = FilterConfigBuilder::default()
        .capacity(capacity)
        .error_rate(error_rate)
        .name(name)
        .backend(backend)
        .build()
        .expect("Failed to build test config");
    ScalingBloomFilter::new(store, config).expect("Failed to create test filter")
}

/// Filter over a fresh in-memory store
#[allow(dead_code)]
pub fn create_memory_filter(
    capacity: u64,
    error_rate: f64,
    backend: BackendKind,
) -> ScalingBloomFilter<InMemoryStore> {
    create_filter(InMemoryStore::new(), "__test_bf", capacity, error_rate, backend)
}

/// Consistent, distinct test data; `prefix` keeps sets disjoint
#[allow(dead_code)]
pub fn generate_test_items(prefix: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{prefix}_{i:06}").into_bytes())
        .collect()
}

/// Inserts `inserted` items, then measures the false positive rate over
/// `probes` items that were never inserted
#[allow(dead_code)]
pub fn measure_false_positive_rate<S: RemoteStore>(
    filter: &ScalingBloomFilter<S>,
    inserted: usize,
    probes: usize,
) -> f64 {
    for item in generate_test_items("member", inserted) {
        filter.insert(&item, None).expect("Insert should succeed");
    }
    let false_positives = generate_test_items("stranger", probes)
        .iter()
        .filter(|item| filter.contains(item).expect("Contains should succeed"))
        .count();
    false_positives as f64 / probes as f64
}

//! Scaling Bloom filter stored in a shared Redis-compatible key-value store.
//!
//! Any number of clients can record and test "have I seen X before?" against
//! the same filter name; the store is the only point of coordination.
//!
//! HowTo:
//!    * Sizing: a filter for `n` elements at error rate `p` uses
//!      `floor(-(n * ln p) / ln(2)^2)` bits and `floor(ln 2 * bits / n)` hashes.
//!    * Hashing: offsets come from the SHA-1 of the element split into four
//!      32-bit words and combined by double hashing, so every client (in any
//!      language) agrees on them.
//!    * Scaling: generation `i` is sized for `2^(i-1) * n` elements at error
//!      rate `p * 0.5^i`. A counter in the store decides when the next
//!      generation opens; queries OR all generations, inserts write the newest.
//!
//! Backends:
//!     * Atomic: each operation is one store-side Lua script, so a test-and-set
//!       cannot interleave with another client's operation on the same filter.
//!     * Non-atomic: pipelined SETBIT/GETBIT from the client against a single
//!       fixed-size vector, for stores without scripting.
//!
//! Key layout:
//!     * `<name>:<i>` bit vector of generation `i`, `<name>:count` insertion
//!       counter, `<name>` the fixed-size vector of the non-atomic backend.
//!
//! Obvious problems:
//!     * No deletion of single elements, no enumeration.
//!     * Membership tests cost one probe per generation.
//!     * The counter is approximate under the non-atomic backend and under
//!       plain `add`.
pub mod backend;
mod config;
mod error;
mod filter;
mod hash;
mod params;
mod scale;
pub mod script;
pub mod store;

pub use backend::{Backend, FilterBackend, InsertMode};
pub use config::{BackendKind, FilterConfig, FilterConfigBuilder};
pub use error::{BloomError, Result};
pub use filter::ScalingBloomFilter;
pub use hash::{BaseHashes, offsets_for};
pub use params::{FilterParams, LN2, LN2_SQUARED};
pub use scale::ScaleManager;
pub use store::memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use store::redis_store::RedisStore;
pub use store::{RemoteStore, ScriptReply, supports_scripting};

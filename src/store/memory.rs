use crate::error::{BloomError, Result};
use crate::script::{Script, ScriptHost, sha1_hex};
use crate::store::{RemoteStore, ScriptReply, expiry_secs};
use bitvec::{order::Msb0, vec::BitVec};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Largest bit offset Redis accepts (512 MB strings).
const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

#[derive(Debug)]
enum Value {
    Int(i64),
    // Redis strings address bit 0 as the most significant bit of byte 0
    Bits(BitVec<u8, Msb0>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
}

impl MemoryState {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn bits_mut(&mut self, key: &str) -> Result<&mut BitVec<u8, Msb0>> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Bits(BitVec::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Bits(bits)) => Ok(bits),
            _ => Err(wrong_type(key)),
        }
    }

    fn read_bit(&mut self, key: &str, offset: u64) -> Result<bool> {
        check_offset(offset)?;
        match self.live(key).map(|entry| &entry.value) {
            None => Ok(false),
            Some(Value::Bits(bits)) => {
                Ok(bits.get(offset as usize).is_some_and(|bit| *bit))
            }
            Some(Value::Int(_)) => Err(wrong_type(key)),
        }
    }

    fn write_bit(&mut self, key: &str, offset: u64) -> Result<bool> {
        check_offset(offset)?;
        let bits = self.bits_mut(key)?;
        let index = offset as usize;
        if index >= bits.len() {
            // strings grow a whole byte at a time
            bits.resize((index / 8 + 1) * 8, false);
        }
        let previous = bits[index];
        bits.set(index, true);
        Ok(previous)
    }

    fn read_counter(&mut self, key: &str) -> Result<Option<u64>> {
        match self.live(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Int(value)) => u64::try_from(*value).map(Some).map_err(|_| {
                BloomError::UnexpectedReply(format!("negative counter {value} at {key}"))
            }),
            Some(Value::Bits(_)) => Err(BloomError::UnexpectedReply(format!(
                "value at {key} is not an integer"
            ))),
        }
    }

    fn increment(&mut self, key: &str) -> Result<u64> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Int(0),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Int(value)) => {
                *value = value.checked_add(1).ok_or_else(|| {
                    BloomError::StorageError(format!(
                        "increment of {key} would overflow"
                    ))
                })?;
                u64::try_from(*value).map_err(|_| {
                    BloomError::UnexpectedReply(format!(
                        "negative counter at {key}"
                    ))
                })
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn set_expiry(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live(key) {
            Some(entry) => {
                let ttl = Duration::from_secs(expiry_secs(ttl));
                entry.expires_at = Instant::now().checked_add(ttl);
                true
            }
            None => false,
        }
    }
}

impl ScriptHost for MemoryState {
    fn get_counter(&mut self, key: &str) -> Result<Option<u64>> {
        self.read_counter(key)
    }

    fn incr(&mut self, key: &str) -> Result<u64> {
        self.increment(key)
    }

    fn set_bit(&mut self, key: &str, offset: u64) -> Result<bool> {
        self.write_bit(key, offset)
    }

    fn get_bit(&mut self, key: &str, offset: u64) -> Result<bool> {
        self.read_bit(key, offset)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.set_expiry(key, ttl))
    }
}

/// Process-local stand-in for a Redis server.
///
/// Implements the command subset of [`RemoteStore`] with Redis semantics
/// (bit order, key expiry, glob patterns). Scripts are recognised by their
/// SHA once loaded and run natively while the store lock is held, so script
/// calls are as indivisible as on a real server.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    scripts: RwLock<HashSet<String>>,
    version: Option<String>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_version(Some("7.2.0"))
    }

    /// A store advertising `version`, or none at all.
    pub fn with_version(version: Option<&str>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            scripts: RwLock::new(HashSet::new()),
            version: version.map(str::to_string),
        }
    }

    /// SCRIPT FLUSH
    pub fn flush_scripts(&self) -> Result<()> {
        self.scripts
            .write()
            .map_err(|e| BloomError::StorageError(format!("Script cache lock error: {e}")))?
            .clear();
        Ok(())
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize> {
        Ok(self.keys_matching("*")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| BloomError::StorageError(format!("Store lock error: {e}")))
    }
}

impl RemoteStore for InMemoryStore {
    fn get_counter(&self, key: &str) -> Result<Option<u64>> {
        self.lock()?.read_counter(key)
    }

    fn incr(&self, key: &str) -> Result<u64> {
        self.lock()?.increment(key)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        let mut state = self.lock()?;
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() {
                state.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.lock()?.set_expiry(key, ttl))
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut state = self.lock()?;
        Ok(state
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    fn set_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        // Validate first so a bad offset leaves the vector untouched
        offsets.iter().try_for_each(|&offset| check_offset(offset))?;
        let mut state = self.lock()?;
        offsets
            .iter()
            .map(|&offset| state.write_bit(key, offset))
            .collect()
    }

    fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        self.lock()?.read_bit(key, offset)
    }

    fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        let mut state = self.lock()?;
        offsets
            .iter()
            .map(|&offset| state.read_bit(key, offset))
            .collect()
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state
            .entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        let mut keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn script_load(&self, body: &str) -> Result<String> {
        let script = Script::from_body(body).ok_or_else(|| {
            BloomError::StorageError(
                "In-memory store only runs the filter scripts".into(),
            )
        })?;
        let sha = sha1_hex(body);
        debug!(?script, %sha, "Loaded script");
        self.scripts
            .write()
            .map_err(|e| BloomError::StorageError(format!("Script cache lock error: {e}")))?
            .insert(sha.clone());
        Ok(sha)
    }

    fn eval_sha(
        &self,
        sha: &str,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<ScriptReply> {
        let cached = self
            .scripts
            .read()
            .map_err(|e| BloomError::StorageError(format!("Script cache lock error: {e}")))?
            .contains(&sha.to_ascii_lowercase());
        let script = match Script::from_sha(sha) {
            Some(script) if cached => script,
            _ => return Ok(ScriptReply::NotCached),
        };
        let mut state = self.lock()?;
        script.execute(&mut *state, keys, args).map(ScriptReply::Value)
    }

    fn server_version(&self) -> Result<Option<String>> {
        Ok(self.version.clone())
    }
}

fn check_offset(offset: u64) -> Result<()> {
    if offset > MAX_BIT_OFFSET {
        return Err(BloomError::StorageError(
            "bit offset is not an integer or out of range".into(),
        ));
    }
    Ok(())
}

fn wrong_type(key: &str) -> BloomError {
    BloomError::StorageError(format!(
        "WRONGTYPE Operation against key {key} holding the wrong kind of value"
    ))
}

/// Redis-style glob: `*`, `?`, `[...]` classes with ranges and `^`, and `\`
/// escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            (0..=text.len()).any(|skip| glob_match(rest, &text[skip..]))
        }
        Some((b'?', rest)) => {
            !text.is_empty() && glob_match(rest, &text[1..])
        }
        Some((b'[', rest)) => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            let (negate, mut class) = match rest.split_first() {
                Some((b'^', after)) => (true, after),
                _ => (false, rest),
            };
            let mut matched = false;
            loop {
                match class {
                    [] => return false,
                    [b']', after @ ..] => {
                        class = after;
                        break;
                    }
                    [b'\\', escaped, after @ ..] => {
                        matched |= *escaped == c;
                        class = after;
                    }
                    [lo, b'-', hi, after @ ..] if *hi != b']' => {
                        let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                        matched |= (lo..=hi).contains(&c);
                        class = after;
                    }
                    [single, after @ ..] => {
                        matched |= *single == c;
                        class = after;
                    }
                }
            }
            matched != negate && glob_match(class, text_rest)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == rest.first() && glob_match(&rest[1..], &text[1..])
        }
        Some((&literal, rest)) => {
            text.first() == Some(&literal) && glob_match(rest, &text[1..])
        }
    }
}

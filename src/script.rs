//! Store-side scripts of the atomic backend.
//!
//! Each script receives `KEYS[1] = name` and
//! `ARGV = [capacity, error_rate, element, ttl_secs]` and runs the whole
//! scaling test-and-set inside the store. [`Script::execute`] is the same
//! procedure written against [`ScriptHost`], for stores that cannot run Lua
//! but can hold a lock for the duration of a call.
use crate::error::{BloomError, Result};
use crate::hash::BaseHashes;
use crate::scale::ScaleManager;
use crate::store::expiry_secs;
use sha1::{Digest, Sha1};
use std::sync::OnceLock;
use std::time::Duration;

macro_rules! lua_prelude {
    () => {
        r#"
local entries   = tonumber(ARGV[1])
local precision = tonumber(ARGV[2])
local hash      = redis.sha1hex(ARGV[3])
local ttl       = tonumber(ARGV[4])
local countkey  = KEYS[1] .. ':count'
local count     = tonumber(redis.call('GET', countkey) or 0)

local h = {}
h[0] = tonumber(string.sub(hash, 1, 8), 16)
h[1] = tonumber(string.sub(hash, 9, 16), 16)
h[2] = tonumber(string.sub(hash, 17, 24), 16)
h[3] = tonumber(string.sub(hash, 25, 32), 16)

local function generations(c)
  local factor = math.ceil((entries + c) / entries)
  local index = 0
  while 2 ^ index < factor do
    index = index + 1
  end
  return index
end

-- 0.4804530139182 = ln(2)^2, 0.69314718055995 = ln(2)
local function sizing(n)
  local scale = 2 ^ (n - 1) * entries
  local bits = math.floor(-(scale * math.log(precision * 0.5 ^ n)) / 0.4804530139182)
  local k = math.floor(0.69314718055995 * bits / scale)
  return bits, k
end

local function offset(i, bits)
  return (h[i % 2] + i * h[2 + ((i + (i % 2)) % 4) / 2]) % bits
end

local function contains(n)
  local key = KEYS[1] .. ':' .. n
  local bits, k = sizing(n)
  for i = 1, k do
    if redis.call('GETBIT', key, offset(i, bits)) == 0 then
      return false
    end
  end
  return true
end

local function set(n)
  local key = KEYS[1] .. ':' .. n
  local bits, k = sizing(n)
  local found = true
  for i = 1, k do
    if redis.call('SETBIT', key, offset(i, bits), 1) == 0 then
      found = false
    end
  end
  if not found then
    redis.call('INCR', countkey)
    if ttl > 0 then
      redis.call('EXPIRE', key, ttl)
    end
  end
  return found
end
"#
    };
}

const ADD_BODY: &str = concat!(
    lua_prelude!(),
    r#"
if set(generations(count + 1)) then
  return 1
end
return 0
"#
);

const CHECK_BODY: &str = concat!(
    lua_prelude!(),
    r#"
for n = generations(count), 1, -1 do
  if contains(n) then
    return 1
  end
end
return 0
"#
);

const CHECK_AND_SET_BODY: &str = concat!(
    lua_prelude!(),
    r#"
local index = generations(count + 1)
for n = index, 1, -1 do
  if contains(n) then
    return 1
  end
end
set(index)
return 0
"#
);

static ADD_SHA: OnceLock<String> = OnceLock::new();
static CHECK_SHA: OnceLock<String> = OnceLock::new();
static CHECK_AND_SET_SHA: OnceLock<String> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// Sets the element in the newest generation; returns 1 when every bit
    /// was already set there.
    Add,
    /// Read-only membership over all generations.
    Check,
    /// Membership over all generations, then `Add` only if absent.
    CheckAndSet,
}

impl Script {
    pub const ALL: [Script; 3] = [Script::Add, Script::Check, Script::CheckAndSet];

    pub fn body(self) -> &'static str {
        match self {
            Script::Add => ADD_BODY,
            Script::Check => CHECK_BODY,
            Script::CheckAndSet => CHECK_AND_SET_BODY,
        }
    }

    /// Content hash the store addresses the script by, computed once per
    /// process.
    pub fn sha(self) -> &'static str {
        let cell = match self {
            Script::Add => &ADD_SHA,
            Script::Check => &CHECK_SHA,
            Script::CheckAndSet => &CHECK_AND_SET_SHA,
        };
        cell.get_or_init(|| sha1_hex(self.body()))
    }

    pub fn from_body(body: &str) -> Option<Script> {
        Self::ALL.into_iter().find(|script| script.body() == body)
    }

    pub fn from_sha(sha: &str) -> Option<Script> {
        Self::ALL
            .into_iter()
            .find(|script| script.sha().eq_ignore_ascii_case(sha))
    }

    /// Runs the script natively against `host`, which must stay exclusively
    /// borrowed for the whole call.
    pub fn execute<H: ScriptHost + ?Sized>(
        self,
        host: &mut H,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<i64> {
        let call = ScriptCall::parse(keys, args)?;
        let count = host.get_counter(&call.count_key())?.unwrap_or(0);
        let found = match self {
            Script::Add => call.set(host, call.scale.insert_generation(count))?,
            Script::Check => {
                call.contains_any(host, call.scale.active_generations(count))?
            }
            Script::CheckAndSet => {
                let index = call.scale.insert_generation(count);
                if call.contains_any(host, index)? {
                    true
                } else {
                    call.set(host, index)?;
                    false
                }
            }
        };
        Ok(found as i64)
    }
}

/// Commands a script may issue while it runs.
pub trait ScriptHost {
    fn get_counter(&mut self, key: &str) -> Result<Option<u64>>;
    fn incr(&mut self, key: &str) -> Result<u64>;
    /// Returns the previous value of the bit
    fn set_bit(&mut self, key: &str, offset: u64) -> Result<bool>;
    fn get_bit(&mut self, key: &str, offset: u64) -> Result<bool>;
    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Builds the `ARGV` list shared by all scripts.
pub fn script_args(
    capacity: u64,
    error_rate: f64,
    element: &[u8],
    ttl: Option<Duration>,
) -> [Vec<u8>; 4] {
    let ttl_secs = ttl.map(expiry_secs).unwrap_or(0);
    [
        capacity.to_string().into_bytes(),
        error_rate.to_string().into_bytes(),
        element.to_vec(),
        ttl_secs.to_string().into_bytes(),
    ]
}

pub(crate) fn sha1_hex(body: &str) -> String {
    hex::encode(Sha1::digest(body.as_bytes()))
}

struct ScriptCall<'a> {
    name: &'a str,
    scale: ScaleManager,
    hashes: BaseHashes,
    ttl: Option<Duration>,
}

impl<'a> ScriptCall<'a> {
    fn parse(keys: &[&'a str], args: &[&[u8]]) -> Result<Self> {
        let [name] = keys else {
            return Err(BloomError::UnexpectedReply(format!(
                "script expects 1 key, got {}",
                keys.len()
            )));
        };
        let [capacity, error_rate, element, ttl] = args else {
            return Err(BloomError::UnexpectedReply(format!(
                "script expects 4 arguments, got {}",
                args.len()
            )));
        };
        let capacity: u64 = parse_arg(capacity, "capacity")?;
        let error_rate: f64 = parse_arg(error_rate, "error rate")?;
        let ttl_secs: u64 = parse_arg(ttl, "ttl")?;
        Ok(Self {
            name: *name,
            scale: ScaleManager::new(capacity, error_rate),
            hashes: BaseHashes::new(element),
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        })
    }

    fn count_key(&self) -> String {
        format!("{}:count", self.name)
    }

    fn generation_key(&self, generation: u32) -> String {
        format!("{}:{}", self.name, generation)
    }

    fn contains_any<H: ScriptHost + ?Sized>(
        &self,
        host: &mut H,
        newest: u32,
    ) -> Result<bool> {
        for generation in (1..=newest).rev() {
            let key = self.generation_key(generation);
            let params = self.scale.params(generation)?;
            let mut found = true;
            for offset in self.hashes.offsets(params) {
                if !host.get_bit(&key, offset)? {
                    found = false;
                    break;
                }
            }
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn set<H: ScriptHost + ?Sized>(
        &self,
        host: &mut H,
        generation: u32,
    ) -> Result<bool> {
        let key = self.generation_key(generation);
        let params = self.scale.params(generation)?;
        let mut found = true;
        for offset in self.hashes.offsets(params) {
            if !host.set_bit(&key, offset)? {
                found = false;
            }
        }
        if !found {
            host.incr(&self.count_key())?;
            if let Some(ttl) = self.ttl {
                host.expire(&key, ttl)?;
            }
        }
        Ok(found)
    }
}

fn parse_arg<T: std::str::FromStr>(raw: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            BloomError::UnexpectedReply(format!(
                "invalid {what} argument: {}",
                String::from_utf8_lossy(raw)
            ))
        })
}

use crate::error::{BloomError, Result};
use crate::store::{RemoteStore, ScriptReply, expiry_secs};
use redis::{Client, Commands, Connection, ErrorKind, InfoDict};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// [`RemoteStore`] over a single Redis connection.
///
/// Commands from different threads are serialised on the connection.
pub struct RedisStore {
    conn: Mutex<Connection>,
}

impl RedisStore {
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            BloomError::StorageError(format!("Redis connection error: {}", e))
        })?;

        let conn = client.get_connection().map_err(|e| {
            BloomError::StorageError(format!("Redis connection error: {}", e))
        })?;

        debug!(url = redis_url, "Connected to Redis");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            BloomError::StorageError(format!("Redis lock error: {}", e))
        })
    }
}

impl RemoteStore for RedisStore {
    fn get_counter(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.lock()?;
        let value: Option<u64> = conn.get(key)?;
        Ok(value)
    }

    fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.lock()?;
        let value: u64 = conn.incr(key, 1)?;
        Ok(value)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let removed: usize = conn.del(keys)?;
        Ok(removed)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let secs = i64::try_from(expiry_secs(ttl)).unwrap_or(i64::MAX);
        let mut conn = self.lock()?;
        let applied: bool = conn.expire(key, secs)?;
        Ok(applied)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.lock()?;
        // -2 for a missing key, -1 for a key without expiry
        let secs: i64 = conn.ttl(key)?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    fn set_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("SETBIT").arg(key).arg(offset).arg(1);
        }

        let mut conn = self.lock()?;
        let previous: Vec<i64> = pipe.query(&mut *conn)?;
        Ok(previous.into_iter().map(|bit| bit == 1).collect())
    }

    fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        let mut conn = self.lock()?;
        let value: i64 = redis::cmd("GETBIT")
            .arg(key)
            .arg(offset)
            .query(&mut *conn)?;
        Ok(value == 1)
    }

    fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("GETBIT").arg(key).arg(offset);
        }

        let mut conn = self.lock()?;
        let values: Vec<i64> = pipe.query(&mut *conn)?;
        Ok(values.into_iter().map(|bit| bit == 1).collect())
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.lock()?;
        let keys: Vec<String> = conn.scan_match(pattern)?.collect();
        Ok(keys)
    }

    fn script_load(&self, body: &str) -> Result<String> {
        let mut conn = self.lock()?;
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query(&mut *conn)?;
        Ok(sha)
    }

    fn eval_sha(
        &self,
        sha: &str,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<ScriptReply> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }

        let mut conn = self.lock()?;
        match cmd.query::<i64>(&mut *conn) {
            Ok(value) => Ok(ScriptReply::Value(value)),
            Err(e) if e.kind() == ErrorKind::NoScriptError => {
                Ok(ScriptReply::NotCached)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn server_version(&self) -> Result<Option<String>> {
        let mut conn = self.lock()?;
        let info: InfoDict = redis::cmd("INFO").arg("server").query(&mut *conn)?;
        Ok(info.get("redis_version"))
    }
}

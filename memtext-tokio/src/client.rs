//! The public `Client` façade (§4.5): each operation acquires a connection,
//! makes one protocol call, and checks the connection back in (or destroys
//! it on error).

use std::{collections::HashMap, sync::Arc};

use memtext_core::{
    codec::{self, CodecConfig, Flags},
    error::ProtocolError,
    hash,
    protocol::{self, StoreCommand},
    Error,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{conn::SocketConn, pool::Pool};

fn parse_counter_reply(bytes: Vec<u8>) -> Result<u64, Error> {
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| Error::Protocol(ProtocolError::Malformed(text)))
}

/// Thin operation layer over a [`Pool`]: every method is Acquire →
/// ProtocolEngine call → CheckIn/destroy, per §4.5.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
    codec: CodecConfig,
}

impl Client {
    pub fn new(pool: Arc<Pool>) -> Self {
        let codec = CodecConfig {
            compress_enable: pool.config().compress_enable,
            compress_threshold: pool.config().compress_threshold,
        };
        Self { pool, codec }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    async fn acquire(&self, key: &[u8]) -> Result<(String, SocketConn), Error> {
        let conn = self.pool.acquire(key).await?;
        let addr = conn.addr().to_string();
        Ok((addr, conn))
    }

    async fn finish<T>(&self, addr: &str, conn: SocketConn, result: Result<T, Error>) -> Result<T, Error> {
        self.pool.check_in(addr, conn, result.is_ok()).await;
        result
    }

    /// Retrieve a value stored via [`Client::set`]/[`Client::add`]/
    /// [`Client::replace`] (tagged binary form). `None` on a cache miss.
    /// For values that may have been written by another memcached client,
    /// use [`Client::get_string`].
    pub async fn get<K: AsRef<[u8]>, V: DeserializeOwned>(&self, key: K) -> Result<Option<V>, Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::get_single(&mut conn, key).await;
        let raw = self.finish(&addr, conn, result).await?;
        match raw {
            Some((bytes, flags)) => codec::decode(&bytes, flags).map(Some),
            None => Ok(None),
        }
    }

    /// Retrieve a value as a UTF-8 string — the interoperable path,
    /// readable whether it was written by this client or another one.
    pub async fn get_string<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<String>, Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::get_single(&mut conn, key).await;
        let raw = self.finish(&addr, conn, result).await?;
        match raw {
            Some((bytes, flags)) => codec::decode_string(&bytes, flags).map(Some),
            None => Ok(None),
        }
    }

    /// Batch retrieval (§4.4): keys are partitioned by owning server, one
    /// multi-key `get` per server. A server that can't be reached simply
    /// contributes no entries — this does not fail the whole call.
    pub async fn get_multi<K: AsRef<[u8]>, V: DeserializeOwned>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<Vec<u8>, V>, Error> {
        let mut by_addr: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        let bucket = self.pool.bucket();
        for key in keys {
            let key = key.as_ref();
            let hv = hash(key, self.pool.config().hash_variant);
            let addr = bucket.server_at(bucket.index(hv)).to_string();
            by_addr.entry(addr).or_default().push(key.to_vec());
        }

        let mut values = HashMap::new();
        for (addr, group_keys) in by_addr {
            let mut conn = match self.pool.acquire_addr(&addr).await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let result = protocol::get_multi(&mut conn, &group_keys).await;
            match result {
                Ok(raw) => {
                    self.pool.check_in(&addr, conn, true).await;
                    for (key, (bytes, flags)) in raw {
                        values.insert(key, codec::decode(&bytes, flags)?);
                    }
                }
                Err(err) => {
                    self.pool.check_in(&addr, conn, false).await;
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    async fn store<K: AsRef<[u8]>, V: Serialize + ?Sized>(
        &self,
        command: StoreCommand,
        key: K,
        value: &V,
        exptime: u32,
    ) -> Result<(), Error> {
        let key = key.as_ref();
        let (bytes, flags) = codec::encode_opaque(value, self.codec)?;
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::set_add_replace(&mut conn, command, key, flags, exptime, &bytes).await;
        self.finish(&addr, conn, result).await
    }

    /// Store `value` in its tagged binary form, overwriting any existing
    /// entry.
    pub async fn set<K: AsRef<[u8]>, V: Serialize + ?Sized>(
        &self,
        key: K,
        value: &V,
        exptime: u32,
    ) -> Result<(), Error> {
        self.store(StoreCommand::Set, key, value, exptime).await
    }

    /// Store only if the key does not already exist. `Err(Error::NotStored)`
    /// otherwise.
    pub async fn add<K: AsRef<[u8]>, V: Serialize + ?Sized>(
        &self,
        key: K,
        value: &V,
        exptime: u32,
    ) -> Result<(), Error> {
        self.store(StoreCommand::Add, key, value, exptime).await
    }

    /// Store only if the key already exists. `Err(Error::NotStored)`
    /// otherwise.
    pub async fn replace<K: AsRef<[u8]>, V: Serialize + ?Sized>(
        &self,
        key: K,
        value: &V,
        exptime: u32,
    ) -> Result<(), Error> {
        self.store(StoreCommand::Replace, key, value, exptime).await
    }

    /// Store `value` as plain UTF-8 text with `flags = 0` — readable by
    /// any memcached client.
    pub async fn set_string<K: AsRef<[u8]>>(
        &self,
        key: K,
        value: &str,
        exptime: u32,
    ) -> Result<(), Error> {
        let key = key.as_ref();
        let (bytes, flags) = codec::encode(value, self.codec)?;
        let (addr, mut conn) = self.acquire(key).await?;
        let result =
            protocol::set_add_replace(&mut conn, StoreCommand::Set, key, flags, exptime, &bytes).await;
        self.finish(&addr, conn, result).await
    }

    /// Delete a key. `Err(Error::NotFound)` if it wasn't set.
    pub async fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<(), Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::delete(&mut conn, key, None).await;
        self.finish(&addr, conn, result).await
    }

    /// Increment a counter by `qty`, returning the new value.
    /// `Err(Error::NotFound)` if it wasn't set.
    pub async fn incr<K: AsRef<[u8]>>(&self, key: K, qty: u64) -> Result<u64, Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::incr(&mut conn, key, qty).await;
        self.finish(&addr, conn, result).await
    }

    /// Decrement a counter by `qty`, clamped to zero on underflow by the
    /// server. `Err(Error::NotFound)` if it wasn't set.
    pub async fn decr<K: AsRef<[u8]>>(&self, key: K, qty: u64) -> Result<u64, Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::decr(&mut conn, key, qty).await;
        self.finish(&addr, conn, result).await
    }

    /// Store a counter as its ASCII decimal representation with
    /// `flags = 0`, so the server's own `incr`/`decr` can mutate it.
    pub async fn store_counter<K: AsRef<[u8]>>(
        &self,
        key: K,
        value: u64,
        exptime: u32,
    ) -> Result<(), Error> {
        let key = key.as_ref();
        let bytes = codec::encode_counter(value);
        let (addr, mut conn) = self.acquire(key).await?;
        let result =
            protocol::set_add_replace(&mut conn, StoreCommand::Set, key, Flags(0), exptime, &bytes).await;
        self.finish(&addr, conn, result).await
    }

    /// Read a counter back as `u64`. `None` on a cache miss.
    pub async fn get_counter<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<u64>, Error> {
        let key = key.as_ref();
        let (addr, mut conn) = self.acquire(key).await?;
        let result = protocol::get_single(&mut conn, key).await;
        let raw = self.finish(&addr, conn, result).await?;
        match raw {
            Some((bytes, _flags)) => parse_counter_reply(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// `flush_all` against every server in the cluster.
    pub async fn flush_all(&self) -> Result<(), Error> {
        for addr in self.pool.bucket().servers() {
            let mut conn = self.pool.acquire_addr(&addr).await?;
            let result = protocol::flush_all(&mut conn).await;
            self.pool.check_in(&addr, conn, result.is_ok()).await;
            result?;
        }
        Ok(())
    }

    /// `stats` against every server, keyed by server address.
    pub async fn stats(&self) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        let mut out = HashMap::new();
        for addr in self.pool.bucket().servers() {
            let mut conn = self.pool.acquire_addr(&addr).await?;
            let result = protocol::stats(&mut conn).await;
            match result {
                Ok(server_stats) => {
                    self.pool.check_in(&addr, conn, true).await;
                    out.insert(addr, server_stats);
                }
                Err(err) => {
                    self.pool.check_in(&addr, conn, false).await;
                    return Err(err);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter_reply() {
        assert_eq!(106, parse_counter_reply(b"106".to_vec()).unwrap());
    }

    #[test]
    fn test_parse_counter_reply_rejects_non_numeric() {
        assert!(matches!(
            parse_counter_reply(b"not a number".to_vec()).unwrap_err(),
            Error::Protocol(ProtocolError::Malformed(_))
        ));
    }
}

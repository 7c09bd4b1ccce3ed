//! Command formatting and reply parsing for each text-protocol command
//! family in §4.4, generic over any [`Transport`].

use std::collections::HashMap;

use tracing::trace;

use super::Transport;
use crate::{
    codec::Flags,
    error::{Error, ProtocolError},
};

/// Which storage verb to issue: `set`, `add`, or `replace` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommand {
    Set,
    Add,
    Replace,
}

impl StoreCommand {
    fn verb(self) -> &'static [u8] {
        match self {
            StoreCommand::Set => b"set",
            StoreCommand::Add => b"add",
            StoreCommand::Replace => b"replace",
        }
    }
}

async fn write_line<T: Transport + ?Sized>(
    conn: &mut T,
    segments: &[&[u8]],
) -> std::io::Result<()> {
    let mut line = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            line.push(b' ');
        }
        line.extend_from_slice(seg);
    }
    line.push(b'\n');
    conn.write_all(&line).await?;
    conn.flush().await
}

fn malformed(line: &str) -> Error {
    ProtocolError::Malformed(line.to_string()).into()
}

fn server_error(line: &str) -> Error {
    ProtocolError::ServerError(line.to_string()).into()
}

fn parse_value_line(line: &str) -> Result<(Vec<u8>, u32, usize), Error> {
    let mut parts = line.split(' ');
    match parts.next() {
        Some("VALUE") => {}
        _ => return Err(malformed(line)),
    }
    let key = parts.next().ok_or_else(|| malformed(line))?;
    let flags: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(line))?;
    let len: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(line))?;
    Ok((key.as_bytes().to_vec(), flags, len))
}

/// The reply to `incr`/`decr` must be all decimal digits, optionally with
/// a leading `-` (see SPEC_FULL.md §9, the inverted-regex ambiguity).
fn is_decimal_reply(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `set|add|replace <key> <flags> <exptime> <bytes>\n<payload>\n`. Reply:
/// `STORED`, `NOT_STORED`, or a server error line.
pub async fn set_add_replace<T: Transport + ?Sized>(
    conn: &mut T,
    command: StoreCommand,
    key: &[u8],
    flags: Flags,
    exptime: u32,
    payload: &[u8],
) -> Result<(), Error> {
    trace!(verb = ?command, key = %String::from_utf8_lossy(key), "dispatching store command");
    write_line(
        conn,
        &[
            command.verb(),
            key,
            flags.0.to_string().as_bytes(),
            exptime.to_string().as_bytes(),
            payload.len().to_string().as_bytes(),
        ],
    )
    .await?;
    conn.write_all(payload).await?;
    conn.write_all(b"\n").await?;
    conn.flush().await?;

    match conn.read_line().await?.as_str() {
        "STORED" => Ok(()),
        "NOT_STORED" => Err(Error::NotStored),
        other => Err(server_error(other)),
    }
}

/// `get <key>\n`. Returns `None` on a cache miss.
pub async fn get_single<T: Transport + ?Sized>(
    conn: &mut T,
    key: &[u8],
) -> Result<Option<(Vec<u8>, Flags)>, Error> {
    trace!(key = %String::from_utf8_lossy(key), "dispatching get");
    write_line(conn, &[b"get", key]).await?;
    let mut found = None;
    loop {
        let line = conn.read_line().await?;
        if line == "END" {
            break;
        }
        let (reply_key, flags, len) = parse_value_line(&line)?;
        let payload = conn.read_exact(len).await?;
        conn.consume_eol().await?;
        if reply_key == key {
            found = Some((payload, Flags(flags)));
        }
    }
    Ok(found)
}

/// `get <key1> [<key2>...]\n` against a connection already known to own
/// every key in `keys` (the caller — the pool's bucket dispatch — has
/// partitioned keys by server). Keys absent from the reply are simply
/// absent from the returned map.
pub async fn get_multi<T: Transport + ?Sized>(
    conn: &mut T,
    keys: &[Vec<u8>],
) -> Result<HashMap<Vec<u8>, (Vec<u8>, Flags)>, Error> {
    trace!(count = keys.len(), "dispatching get_multi");
    let mut segments: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
    segments.push(b"get");
    for key in keys {
        segments.push(key.as_slice());
    }
    write_line(conn, &segments).await?;

    let mut values = HashMap::new();
    loop {
        let line = conn.read_line().await?;
        if line == "END" {
            break;
        }
        let (reply_key, flags, len) = parse_value_line(&line)?;
        let payload = conn.read_exact(len).await?;
        conn.consume_eol().await?;
        values.insert(reply_key, (payload, Flags(flags)));
    }
    Ok(values)
}

/// `delete <key>[ <exptime>]\n`. Reply: `DELETED`, `NOT_FOUND`, or error.
pub async fn delete<T: Transport + ?Sized>(
    conn: &mut T,
    key: &[u8],
    exptime: Option<u32>,
) -> Result<(), Error> {
    trace!(key = %String::from_utf8_lossy(key), "dispatching delete");
    match exptime {
        Some(exptime) => write_line(conn, &[b"delete", key, exptime.to_string().as_bytes()]).await?,
        None => write_line(conn, &[b"delete", key]).await?,
    };

    match conn.read_line().await?.as_str() {
        "DELETED" => Ok(()),
        "NOT_FOUND" => Err(Error::NotFound),
        other => Err(server_error(other)),
    }
}

async fn incr_or_decr<T: Transport + ?Sized>(
    conn: &mut T,
    verb: &[u8],
    key: &[u8],
    qty: u64,
) -> Result<u64, Error> {
    trace!(
        verb = %String::from_utf8_lossy(verb),
        key = %String::from_utf8_lossy(key),
        "dispatching counter command"
    );
    write_line(conn, &[verb, key, qty.to_string().as_bytes()]).await?;
    let reply = conn.read_line().await?;
    if reply == "NOT_FOUND" {
        return Err(Error::NotFound);
    }
    if !is_decimal_reply(&reply) {
        return Err(ProtocolError::NonNumericReply(reply).into());
    }
    reply.parse::<u64>().map_err(|_| server_error(&reply))
}

/// `incr <key> <qty>\n`. Reply is the new counter value, or `NOT_FOUND`.
pub async fn incr<T: Transport + ?Sized>(conn: &mut T, key: &[u8], qty: u64) -> Result<u64, Error> {
    incr_or_decr(conn, b"incr", key, qty).await
}

/// `decr <key> <qty>\n`. The server clamps underflow to zero.
pub async fn decr<T: Transport + ?Sized>(conn: &mut T, key: &[u8], qty: u64) -> Result<u64, Error> {
    incr_or_decr(conn, b"decr", key, qty).await
}

/// `stats\n`. Collects every `STAT <name> <value>\n` line up to `END\n`
/// into a single map, inserted by the caller once the whole reply has
/// been read (SPEC_FULL.md §9: never insert per-line).
pub async fn stats<T: Transport + ?Sized>(conn: &mut T) -> Result<HashMap<String, String>, Error> {
    trace!("dispatching stats");
    write_line(conn, &[b"stats"]).await?;
    let mut out = HashMap::new();
    loop {
        let line = conn.read_line().await?;
        if line == "END" {
            break;
        }
        let mut parts = line.splitn(3, ' ');
        if parts.next() != Some("STAT") {
            return Err(malformed(&line));
        }
        let name = parts.next().ok_or_else(|| malformed(&line))?;
        let value = parts.next().unwrap_or("");
        out.insert(name.to_string(), value.to_string());
    }
    Ok(out)
}

/// `flush_all\n`. Reply is `OK`.
pub async fn flush_all<T: Transport + ?Sized>(conn: &mut T) -> Result<(), Error> {
    trace!("dispatching flush_all");
    write_line(conn, &[b"flush_all"]).await?;
    let reply = conn.read_line().await?;
    if reply == "OK" {
        Ok(())
    } else {
        Err(server_error(&reply))
    }
}

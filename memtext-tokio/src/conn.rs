//! `SocketConn` (§4.1): one framed TCP connection to one memcached server.

use std::time::Duration;

use async_trait::async_trait;
use memtext_core::{protocol::Transport, Error};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::timeout,
};
use tracing::debug;

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "socket read timed out")
}

/// One TCP connection to one `host:port`: a buffered reader for
/// line/fixed-length reads and a buffered writer that coalesces small
/// protocol writes. Implements [`Transport`] so the protocol engine can
/// drive it directly.
#[derive(Debug)]
pub struct SocketConn {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_timeout: Duration,
}

impl SocketConn {
    /// Resolve `addr`, open a TCP connection, and set `TCP_NODELAY`
    /// according to `nagle` (`false` means NODELAY is enabled). Fails with
    /// [`Error::Unreachable`] on a connect error.
    pub async fn open(addr: &str, timeout_ms: u64, nagle: bool) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|_| Error::Unreachable)?;
        stream.set_nodelay(!nagle)?;
        let (read_half, write_half) = stream.into_split();
        debug!(addr, "opened connection");
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// OS-level liveness check (§4.1): a non-destructive peek at the socket.
    /// A closed peer reads `Ok(0)`; an idle-but-live peer reads
    /// `WouldBlock`. Uses `peek`, not a consuming read, so a byte that
    /// happens to be pending (e.g. a slow or duplicated server reply)
    /// isn't stolen out of the stream before the connection's next real
    /// use. Racy by design — I/O failure on the next real command is not a
    /// spec violation (§9).
    pub async fn probe(&self) -> bool {
        let mut probe_buf = [0u8; 1];
        match self.reader.get_ref().peek(&mut probe_buf).await {
            Ok(0) => false,
            Ok(_) => true,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    /// Shut down the socket. Idempotent; always leaves the connection
    /// unusable afterward.
    pub async fn hard_close(mut self) {
        if let Err(err) = self.writer.shutdown().await {
            debug!(addr = %self.addr, %err, "error shutting down connection");
        } else {
            debug!(addr = %self.addr, "closed connection");
        }
    }
}

#[async_trait]
impl Transport for SocketConn {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(buf).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    async fn read_line(&mut self) -> std::io::Result<String> {
        timeout(self.read_timeout, async {
            let mut line = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                let n = self.reader.read(&mut byte).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed before \\r\\n",
                    ));
                }
                if byte[0] == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    break;
                }
                line.push(byte[0]);
            }
            String::from_utf8(line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
        .await
        .unwrap_or_else(|_| Err(timed_out()))
    }

    async fn read_exact(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        timeout(self.read_timeout, async {
            let mut buf = vec![0u8; n];
            self.reader.read_exact(&mut buf).await?;
            Ok(buf)
        })
        .await
        .unwrap_or_else(|_| Err(timed_out()))
    }
}

//! The line-oriented read/write primitives a [`SocketConn`]-like type must
//! provide so the protocol engine in [`super::engine`] can be tested
//! without a real socket (§4.1).
//!
//! [`SocketConn`]: https://docs.rs/memtext-tokio

use async_trait::async_trait;

/// Framed I/O primitives for one memcached connection. A concrete socket
/// type (e.g. `memtext-tokio`'s `SocketConn`) implements this directly;
/// tests implement it over an in-memory buffer.
#[async_trait]
pub trait Transport: Send {
    /// Write every byte of `buf`, looping on partial writes.
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Flush any buffered writes.
    async fn flush(&mut self) -> std::io::Result<()>;

    /// Read until `\r\n`; returns the preceding bytes as a string with both
    /// delimiter bytes consumed.
    async fn read_line(&mut self) -> std::io::Result<String>;

    /// Read exactly `n` bytes.
    async fn read_exact(&mut self, n: usize) -> std::io::Result<Vec<u8>>;

    /// Read and discard through the next `\r\n`. Used after a fixed-length
    /// value payload to swallow the trailing separator.
    async fn consume_eol(&mut self) -> std::io::Result<()> {
        self.read_line().await.map(|_| ())
    }
}

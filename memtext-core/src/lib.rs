//! Runtime-agnostic pieces of a memcached text-protocol client: the line
//! framing and reply grammar, the value codec, and the key-to-bucket hash
//! variants. A concrete async runtime binding (e.g. `memtext-tokio`) supplies
//! the socket and the connection pool and drives this crate's
//! [`protocol::Transport`] trait.

pub mod codec;
pub mod error;
pub mod hash;
pub mod protocol;

pub use codec::{CodecConfig, Flags};
pub use error::Error;
pub use hash::{hash, rehash, BucketError, BucketVector, HashVariant};

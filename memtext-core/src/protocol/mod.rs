//! The memcached text-protocol engine (§4.4): a [`Transport`] abstraction
//! over line/fixed-length reads and writes, plus the command formatting and
//! reply parsing built on top of it.

mod engine;
mod transport;

pub use engine::{
    decr, delete, flush_all, get_multi, get_single, incr, set_add_replace, stats, StoreCommand,
};
pub use transport::Transport;

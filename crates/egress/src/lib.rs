//! Egress enforcement: a compact binary IP blocklist (sorted ranges or a
//! compressed prefix trie), a memory-mapped fail-closed filter with atomic
//! hot-reload, and URL enforcement with DNS resolution.

pub mod builder;
pub mod filter;
pub mod ip;

pub use builder::BlocklistBuilder;
pub use filter::{
    spawn_reloader,
    BlocklistFormat,
    EgressFilter,
};
pub use ip::{
    cidr_range,
    format_ipv4,
    parse_ipv4,
    IpRange,
};

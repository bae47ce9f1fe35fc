use std::{
    net::Ipv4Addr,
    path::PathBuf,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use anyhow::Context;
use errors::ErrorMetadata;
use memmap2::Mmap;
use parking_lot::{
    Mutex,
    RwLock,
};
use url::Url;

use crate::builder::{
    NODE_BRANCH,
    NODE_LEAF,
    NODE_SIZE,
    RANGES_MAGIC,
    TRIE_MAGIC,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlocklistFormat {
    Ranges,
    Trie,
}

struct Loaded {
    map: Mmap,
    format: BlocklistFormat,
    mtime: SystemTime,
    len: u64,
}

enum LoadState {
    Missing,
    Loaded(Loaded),
}

/// Memory-mapped view of the on-disk blocklist with fail-closed semantics:
/// when the file is missing, unreadable, or malformed, every non-loopback
/// address counts as blocked. Lookups read an atomic snapshot; reloads swap
/// the snapshot wholesale so in-flight lookups stay consistent.
pub struct EgressFilter {
    path: PathBuf,
    state: RwLock<Arc<LoadState>>,
    // Serializes ensure_loaded so concurrent pollers don't mmap twice.
    load_lock: Mutex<()>,
}

impl EgressFilter {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: RwLock::new(Arc::new(LoadState::Missing)),
            load_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load or reload the blocklist file. Skips work when the file's
    /// modification time and size are unchanged. Any failure collapses the
    /// state to `Missing`.
    pub fn ensure_loaded(&self) {
        let _guard = self.load_lock.lock();
        match self.load_if_changed() {
            Ok(Some(loaded)) => {
                tracing::info!(
                    "loaded egress blocklist {} ({:?}, {} bytes)",
                    self.path.display(),
                    loaded.format,
                    loaded.len,
                );
                *self.state.write() = Arc::new(LoadState::Loaded(loaded));
            },
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(
                    "failed to load egress blocklist {}, failing closed: {e:#}",
                    self.path.display(),
                );
                *self.state.write() = Arc::new(LoadState::Missing);
            },
        }
    }

    fn load_if_changed(&self) -> anyhow::Result<Option<Loaded>> {
        let metadata = std::fs::metadata(&self.path).context("stat failed")?;
        let mtime = metadata.modified().context("mtime unavailable")?;
        let len = metadata.len();
        if let LoadState::Loaded(current) = &**self.state.read() {
            if current.mtime == mtime && current.len == len {
                return Ok(None);
            }
        }
        let file = std::fs::File::open(&self.path).context("open failed")?;
        // SAFETY: the mapping is read-only; writers replace the file by
        // rename rather than truncating in place.
        let map = unsafe { Mmap::map(&file) }.context("mmap failed")?;
        let format = Self::validate(&map)?;
        Ok(Some(Loaded {
            map,
            format,
            mtime,
            len,
        }))
    }

    fn validate(data: &[u8]) -> anyhow::Result<BlocklistFormat> {
        anyhow::ensure!(data.len() >= 8, "file too short for header");
        match &data[0..4] {
            m if m == RANGES_MAGIC => {
                let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
                anyhow::ensure!(
                    data.len() == 8 + count * 8,
                    "range count {count} does not match file length {}",
                    data.len(),
                );
                Ok(BlocklistFormat::Ranges)
            },
            m if m == TRIE_MAGIC => {
                anyhow::ensure!(data.len() >= 8 + NODE_SIZE, "trie has no root node");
                Ok(BlocklistFormat::Trie)
            },
            other => anyhow::bail!("unknown magic {other:?}"),
        }
    }

    /// Whether egress to `ip` is blocked. Loopback is never egress and is
    /// always allowed; with no loaded blocklist everything else is blocked.
    pub fn is_blocked(&self, ip: Ipv4Addr) -> bool {
        if ip.octets()[0] == 127 {
            return false;
        }
        let snapshot = self.state.read().clone();
        let loaded = match &*snapshot {
            LoadState::Missing => return true,
            LoadState::Loaded(loaded) => loaded,
        };
        let ip = u32::from(ip);
        match loaded.format {
            BlocklistFormat::Ranges => ranges_blocked(&loaded.map, ip),
            BlocklistFormat::Trie => trie_blocked(&loaded.map, ip),
        }
    }

    /// Enforce the blocklist against a URL before any connection is made.
    /// URLs without a host are allowed (non-network schemes). Literal IPv4
    /// hosts are checked directly; names are resolved and every IPv4 answer
    /// must be clean. DNS failures and IPv4-less answers fail closed.
    pub async fn enforce_url(&self, url: &Url) -> anyhow::Result<()> {
        match url.host() {
            None => Ok(()),
            Some(url::Host::Ipv4(addr)) => {
                if self.is_blocked(addr) {
                    return Err(ErrorMetadata::egress_denied(format!(
                        "egress to {addr} is blocked"
                    ))
                    .into());
                }
                Ok(())
            },
            Some(url::Host::Ipv6(_)) => Err(ErrorMetadata::egress_denied(format!(
                "no resolvable IPv4 address for {url}"
            ))
            .into()),
            Some(url::Host::Domain(host)) => {
                let port = url.port_or_known_default().unwrap_or(80);
                let addrs = tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|e| {
                        ErrorMetadata::egress_denied(format!("DNS failure for {host}: {e}"))
                    })?;
                let v4: Vec<Ipv4Addr> = addrs
                    .filter_map(|a| match a.ip() {
                        std::net::IpAddr::V4(v4) => Some(v4),
                        std::net::IpAddr::V6(_) => None,
                    })
                    .collect();
                if v4.is_empty() {
                    return Err(ErrorMetadata::egress_denied(format!(
                        "no resolvable IPv4 address for {host}"
                    ))
                    .into());
                }
                for addr in v4 {
                    if self.is_blocked(addr) {
                        return Err(ErrorMetadata::egress_denied(format!(
                            "egress to {host} ({addr}) is blocked"
                        ))
                        .into());
                    }
                }
                Ok(())
            },
        }
    }

    /// Synchronous check for literal hosts only; used on redirect hops where
    /// blocking DNS is unavailable. Name resolution for redirects still goes
    /// through the filtered DNS resolver on the client.
    pub fn enforce_literal(&self, url: &Url) -> anyhow::Result<()> {
        if let Some(url::Host::Ipv4(addr)) = url.host() {
            if self.is_blocked(addr) {
                return Err(
                    ErrorMetadata::egress_denied(format!("egress to {addr} is blocked")).into(),
                );
            }
        }
        Ok(())
    }
}

fn ranges_blocked(data: &[u8], ip: u32) -> bool {
    let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    let pair = |i: usize| -> (u32, u32) {
        let off = 8 + i * 8;
        (
            u32::from_be_bytes(data[off..off + 4].try_into().unwrap()),
            u32::from_be_bytes(data[off + 4..off + 8].try_into().unwrap()),
        )
    };
    let (mut lo, mut hi) = (0usize, count);
    // Find the last range starting at or below ip.
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pair(mid).0 <= ip {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        return false;
    }
    let (start, end) = pair(lo - 1);
    start <= ip && ip <= end
}

fn trie_blocked(data: &[u8], ip: u32) -> bool {
    let mut offset = 8usize;
    // Bit indices strictly increase in well-formed files; 33 hops bounds any
    // root-to-leaf walk, so a longer one is a malformed (cyclic) file.
    for _ in 0..=33 {
        if offset + NODE_SIZE > data.len() {
            return true;
        }
        let node_type = data[offset];
        let bit_index = data[offset + 1] as u32;
        match node_type {
            NODE_LEAF => return true,
            NODE_BRANCH => {
                // The stored index is authoritative: compressed chains jump
                // several bits and the cursor must reset to it.
                if bit_index >= 32 {
                    return true;
                }
                let bit = (ip >> (31 - bit_index)) & 1;
                let child_off = offset + 2 + if bit == 1 { 4 } else { 0 };
                let next =
                    u32::from_be_bytes(data[child_off..child_off + 4].try_into().unwrap());
                if next == 0 {
                    return false;
                }
                offset = next as usize;
            },
            _ => return true,
        }
    }
    true
}

/// Poll `ensure_loaded` on an interval so blocklist updates land without a
/// restart. Load work happens off the async runtime.
pub fn spawn_reloader(
    filter: Arc<EgressFilter>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let filter = filter.clone();
            let _ = tokio::task::spawn_blocking(move || filter.ensure_loaded()).await;
        }
    })
}

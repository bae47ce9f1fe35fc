use std::{
    io::BufRead,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::ip::{
    cidr_range,
    parse_ipv4,
    IpRange,
};

pub const RANGES_MAGIC: &[u8; 4] = b"RNG1";
pub const TRIE_MAGIC: &[u8; 4] = b"TRI1";

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());
static CIDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2}$").unwrap());

/// Accumulates IP and CIDR entries from blocklist source streams and emits
/// the two on-disk encodings: a sorted coalesced range list (`RNG1`) and a
/// compressed binary prefix trie (`TRI1`).
///
/// Input lines are free-form: `#` starts a comment, the first
/// whitespace/comma/semicolon-separated token is examined, and tokens that
/// are neither an IPv4 address nor a CIDR block are ignored. Feeds from
/// different sources can be mixed freely.
pub struct BlocklistBuilder {
    ranges: Vec<IpRange>,
    trie: TrieNode,
    entries: usize,
}

impl BlocklistBuilder {
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            trie: TrieNode::default(),
            entries: 0,
        }
    }

    /// Number of accepted IP/CIDR tokens so far.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn read_from(&mut self, reader: impl BufRead) -> anyhow::Result<()> {
        for line in reader.lines() {
            self.add_line(&line?);
        }
        Ok(())
    }

    pub fn add_line(&mut self, line: &str) {
        let uncommented = line.split('#').next().unwrap_or("");
        let Some(token) = uncommented
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .find(|t| !t.is_empty())
        else {
            return;
        };
        if CIDR_RE.is_match(token) {
            if let Ok(range) = cidr_range(token) {
                let prefix_len = token
                    .rsplit_once('/')
                    .and_then(|(_, n)| n.parse::<u8>().ok())
                    .unwrap_or(32);
                self.ranges.push(range);
                self.trie.add_prefix(range.first, prefix_len);
                self.entries += 1;
                return;
            }
        }
        if IPV4_RE.is_match(token) {
            if let Ok(ip) = parse_ipv4(token) {
                self.ranges.push(IpRange::single(ip));
                self.trie.add_prefix(ip, 32);
                self.entries += 1;
                return;
            }
        }
        tracing::debug!("ignoring blocklist token: {token}");
    }

    /// The accumulated ranges, sorted and merged: a range is folded into the
    /// running one when `r.first <= cur.last + 1`.
    pub fn coalesced_ranges(&self) -> Vec<IpRange> {
        let mut sorted = self.ranges.clone();
        sorted.sort();
        let mut merged: Vec<IpRange> = Vec::with_capacity(sorted.len());
        for r in sorted {
            match merged.last_mut() {
                Some(cur) if r.first <= cur.last.saturating_add(1) => {
                    cur.last = cur.last.max(r.last);
                },
                _ => merged.push(r),
            }
        }
        merged
    }

    /// Serialize the coalesced range list as an `RNG1` file, staged to a
    /// sibling temp file and atomically renamed onto `path`.
    pub fn write_ranges(&self, path: &Path) -> anyhow::Result<()> {
        let ranges = self.coalesced_ranges();
        let mut buf = Vec::with_capacity(8 + ranges.len() * 8);
        buf.extend_from_slice(RANGES_MAGIC);
        buf.extend_from_slice(&(ranges.len() as u32).to_be_bytes());
        for r in &ranges {
            buf.extend_from_slice(&r.first.to_be_bytes());
            buf.extend_from_slice(&r.last.to_be_bytes());
        }
        common::fs::write_atomically(path, &buf)
    }

    /// Serialize the compressed prefix trie as a `TRI1` file, staged to a
    /// sibling temp file and atomically renamed onto `path`.
    pub fn write_trie(&self, path: &Path) -> anyhow::Result<()> {
        let mut flat = Vec::new();
        match compress(Some(&self.trie), 0) {
            Some(root) => {
                flatten(&root, &mut flat);
            },
            // Empty trie: a branch with two null children matches nothing.
            None => flat.push(FlatNode {
                node_type: NODE_BRANCH,
                bit_index: 0,
                left: None,
                right: None,
            }),
        }
        let mut buf = Vec::with_capacity(8 + flat.len() * NODE_SIZE);
        buf.extend_from_slice(TRIE_MAGIC);
        buf.extend_from_slice(&0u32.to_be_bytes());
        for node in &flat {
            buf.push(node.node_type);
            buf.push(node.bit_index);
            buf.extend_from_slice(&offset_of(node.left).to_be_bytes());
            buf.extend_from_slice(&offset_of(node.right).to_be_bytes());
        }
        common::fs::write_atomically(path, &buf)
    }
}

pub const NODE_BRANCH: u8 = 1;
pub const NODE_LEAF: u8 = 2;
pub const NODE_SIZE: usize = 10;

/// Uncompressed build-time trie. Adding a prefix terminates its path and
/// prunes the subtree below it; shorter prefixes dominate longer ones.
#[derive(Default)]
struct TrieNode {
    terminal: bool,
    children: [Option<Box<TrieNode>>; 2],
}

impl TrieNode {
    fn add_prefix(&mut self, value: u32, prefix_len: u8) {
        let mut node = self;
        for depth in 0..prefix_len {
            if node.terminal {
                // A shorter prefix already covers this one.
                return;
            }
            let bit = ((value >> (31 - depth)) & 1) as usize;
            node = node.children[bit].get_or_insert_with(Box::default);
        }
        node.terminal = true;
        node.children = [None, None];
    }
}

enum CompressedNode {
    Leaf {
        bit_index: u8,
    },
    Branch {
        bit_index: u8,
        left: Box<CompressedNode>,
        right: Box<CompressedNode>,
    },
}

/// Compress by eliding single-child chains with no terminal: a null subtree
/// collapses to null, a terminal becomes a leaf carrying its bit depth, a
/// node with one child is replaced by that child, and a node with both
/// children becomes a branch carrying its bit depth.
fn compress(node: Option<&TrieNode>, depth: u8) -> Option<CompressedNode> {
    let node = node?;
    if node.terminal {
        return Some(CompressedNode::Leaf { bit_index: depth });
    }
    let left = compress(node.children[0].as_deref(), depth + 1);
    let right = compress(node.children[1].as_deref(), depth + 1);
    match (left, right) {
        (Some(l), Some(r)) => Some(CompressedNode::Branch {
            bit_index: depth,
            left: Box::new(l),
            right: Box::new(r),
        }),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

struct FlatNode {
    node_type: u8,
    bit_index: u8,
    left: Option<usize>,
    right: Option<usize>,
}

fn offset_of(index: Option<usize>) -> u32 {
    match index {
        Some(i) => (8 + i * NODE_SIZE) as u32,
        None => 0,
    }
}

/// Lay nodes out pre-order so the root lands at file offset 8.
fn flatten(node: &CompressedNode, out: &mut Vec<FlatNode>) -> usize {
    let index = out.len();
    out.push(FlatNode {
        node_type: NODE_LEAF,
        bit_index: 0,
        left: None,
        right: None,
    });
    match node {
        CompressedNode::Leaf { bit_index } => {
            out[index].bit_index = *bit_index;
        },
        CompressedNode::Branch {
            bit_index,
            left,
            right,
        } => {
            let bit_index = *bit_index;
            let left = flatten(left, out);
            let right = flatten(right, out);
            out[index] = FlatNode {
                node_type: NODE_BRANCH,
                bit_index,
                left: Some(left),
                right: Some(right),
            };
        },
    }
    index
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ip::parse_ipv4;

    #[test]
    fn parses_tokens_and_ignores_noise() {
        let mut b = BlocklistBuilder::new();
        b.add_line("# a full-line comment");
        b.add_line("");
        b.add_line("203.0.113.7  # trailing comment");
        b.add_line("198.51.100.0/24,some-label");
        b.add_line("not-an-ip");
        b.add_line("  10.0.0.1;provider=x");
        assert_eq!(b.entry_count(), 3);
    }

    #[test]
    fn coalesces_adjacent_and_overlapping_ranges() {
        let mut b = BlocklistBuilder::new();
        b.add_line("10.0.0.0/25"); // .0 - .127
        b.add_line("10.0.0.128/25"); // .128 - .255, adjacent
        b.add_line("10.0.0.200"); // contained
        b.add_line("10.0.2.1");
        let merged = b.coalesced_ranges();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].first, parse_ipv4("10.0.0.0").unwrap());
        assert_eq!(merged[0].last, parse_ipv4("10.0.0.255").unwrap());
        assert_eq!(merged[1], IpRange::single(parse_ipv4("10.0.2.1").unwrap()));
    }

    #[test]
    fn range_artifact_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blocklist.bin");
        let mut b = BlocklistBuilder::new();
        b.add_line("203.0.113.7");
        b.write_ranges(&path)?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[0..4], RANGES_MAGIC);
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into()?), 1);
        let ip = parse_ipv4("203.0.113.7")?;
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into()?), ip);
        assert_eq!(u32::from_be_bytes(bytes[12..16].try_into()?), ip);
        Ok(())
    }

    #[test]
    fn trie_artifact_has_root_at_offset_8() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blocklist.bin");
        let mut b = BlocklistBuilder::new();
        // Two /32s diverging at bit 31 under a shared /24: the root must be
        // a branch whose stored bit index jumps straight to the divergence.
        b.add_line("203.0.113.6");
        b.add_line("203.0.113.7");
        b.write_trie(&path)?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[0..4], TRIE_MAGIC);
        assert_eq!(bytes[8], NODE_BRANCH);
        assert_eq!(bytes[9], 31);
        let left = u32::from_be_bytes(bytes[10..14].try_into()?) as usize;
        let right = u32::from_be_bytes(bytes[14..18].try_into()?) as usize;
        assert_eq!(bytes[left], NODE_LEAF);
        assert_eq!(bytes[left + 1], 32);
        assert_eq!(bytes[right], NODE_LEAF);
        assert_eq!(bytes[right + 1], 32);
        Ok(())
    }

    #[test]
    fn shorter_prefix_dominates() {
        let mut b = BlocklistBuilder::new();
        b.add_line("10.0.0.0/8");
        b.add_line("10.1.2.3"); // swallowed by the /8
        assert_eq!(b.coalesced_ranges().len(), 1);
    }

    #[test]
    fn empty_trie_serializes_to_a_matchless_branch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blocklist.bin");
        BlocklistBuilder::new().write_trie(&path)?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), 8 + NODE_SIZE);
        assert_eq!(bytes[8], NODE_BRANCH);
        assert_eq!(u32::from_be_bytes(bytes[10..14].try_into()?), 0);
        assert_eq!(u32::from_be_bytes(bytes[14..18].try_into()?), 0);
        Ok(())
    }

    proptest! {
        // Building from ranges and from coalesce(ranges) yields the same
        // binary artifact: coalescing is idempotent.
        #[test]
        fn coalescing_is_idempotent(
            entries in proptest::collection::vec((any::<u32>(), 0u32..1024), 0..64),
        ) {
            let mut b = BlocklistBuilder::new();
            for (first, span) in entries {
                let last = first.saturating_add(span);
                b.ranges.push(IpRange { first, last });
            }
            let once = b.coalesced_ranges();
            let mut again = BlocklistBuilder::new();
            again.ranges.extend(once.iter().copied());
            prop_assert_eq!(once, again.coalesced_ranges());
        }
    }
}

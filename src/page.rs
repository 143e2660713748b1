//! On-page layout.
//!
//! Every page starts with a 16 byte header: page number (u64), flags (u16),
//! `lower` (u16) and `upper` (u16). Branch and leaf pages keep an array of
//! u16 node offsets right after the header, growing up to `lower`, while the
//! nodes themselves are packed from the end of the page down to `upper`.
//! Overflow pages reuse the `lower` slot as a u32 page count and carry raw
//! value bytes after the header.
//!
//! Nodes start with an 8 byte header: flags (u16), key size (u16) and data
//! size (u32). Leaf nodes follow it with the key and then either the value
//! or, with `BIGDATA`, the u64 number of the first overflow page. Branch
//! nodes follow it with the u64 child page number and then the key. The key
//! of the first branch node is never compared.
//!
//! All integers are little endian.

use std::cmp::Ordering;

use crate::constants::{NodeFlags, PageFlags, NODE_HDR, PAGE_HDR, PAGE_SIZE};

pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

pub(crate) fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

pub(crate) fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

const OFF_PGNO: usize = 0;
const OFF_FLAGS: usize = 8;
const OFF_LOWER: usize = 10;
const OFF_UPPER: usize = 12;
const OFF_OVERFLOW_COUNT: usize = 10;

/// Room for nodes and their offsets on an empty page
pub(crate) const PAGE_ROOM: usize = PAGE_SIZE - PAGE_HDR;

pub(crate) fn pgno(page: &[u8]) -> u64 {
    read_u64(page, OFF_PGNO)
}

pub(crate) fn set_pgno(page: &mut [u8], pgno: u64) {
    write_u64(page, OFF_PGNO, pgno);
}

pub(crate) fn flags(page: &[u8]) -> PageFlags {
    PageFlags::from_bits_truncate(read_u16(page, OFF_FLAGS))
}

pub(crate) fn is_branch(page: &[u8]) -> bool {
    flags(page).contains(PageFlags::BRANCH)
}

fn lower(page: &[u8]) -> usize {
    read_u16(page, OFF_LOWER) as usize
}

fn upper(page: &[u8]) -> usize {
    read_u16(page, OFF_UPPER) as usize
}

/// Reset `page` to an empty branch or leaf page
pub(crate) fn init(page: &mut [u8], pgno: u64, flags: PageFlags) {
    page[..PAGE_HDR].fill(0);
    set_pgno(page, pgno);
    write_u16(page, OFF_FLAGS, flags.bits());
    write_u16(page, OFF_LOWER, PAGE_HDR as u16);
    write_u16(page, OFF_UPPER, PAGE_SIZE as u16);
}

pub(crate) fn num_keys(page: &[u8]) -> usize {
    (lower(page) - PAGE_HDR) / 2
}

/// Bytes left between the offset array and the node area
pub(crate) fn free_space(page: &[u8]) -> usize {
    upper(page) - lower(page)
}

fn node_offset(page: &[u8], idx: usize) -> usize {
    read_u16(page, PAGE_HDR + 2 * idx) as usize
}

fn set_node_offset(page: &mut [u8], idx: usize, off: usize) {
    write_u16(page, PAGE_HDR + 2 * idx, off as u16);
}

fn node_size_at(page: &[u8], off: usize) -> usize {
    let ksize = read_u16(page, off + 2) as usize;
    if is_branch(page) {
        return NODE_HDR + 8 + ksize;
    }
    let nflags = NodeFlags::from_bits_truncate(read_u16(page, off));
    if nflags.contains(NodeFlags::BIGDATA) {
        NODE_HDR + ksize + 8
    } else {
        NODE_HDR + ksize + read_u32(page, off + 4) as usize
    }
}

/// Encoded bytes of node `idx`
pub(crate) fn node_bytes(page: &[u8], idx: usize) -> &[u8] {
    let off = node_offset(page, idx);
    &page[off..off + node_size_at(page, off)]
}

pub(crate) fn node_flags(page: &[u8], idx: usize) -> NodeFlags {
    NodeFlags::from_bits_truncate(read_u16(page, node_offset(page, idx)))
}

pub(crate) fn node_key(page: &[u8], idx: usize) -> &[u8] {
    let off = node_offset(page, idx);
    let ksize = read_u16(page, off + 2) as usize;
    let start = if is_branch(page) {
        off + NODE_HDR + 8
    } else {
        off + NODE_HDR
    };
    &page[start..start + ksize]
}

/// Value stored in a leaf node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafValue<'a> {
    Inline(&'a [u8]),
    Overflow { pgno: u64, len: usize },
}

pub(crate) fn leaf_value(page: &[u8], idx: usize) -> LeafValue<'_> {
    let off = node_offset(page, idx);
    let nflags = NodeFlags::from_bits_truncate(read_u16(page, off));
    let ksize = read_u16(page, off + 2) as usize;
    let dsize = read_u32(page, off + 4) as usize;
    let start = off + NODE_HDR + ksize;
    if nflags.contains(NodeFlags::BIGDATA) {
        LeafValue::Overflow {
            pgno: read_u64(page, start),
            len: dsize,
        }
    } else {
        LeafValue::Inline(&page[start..start + dsize])
    }
}

pub(crate) fn branch_child(page: &[u8], idx: usize) -> u64 {
    read_u64(page, node_offset(page, idx) + NODE_HDR)
}

pub(crate) fn set_branch_child(page: &mut [u8], idx: usize, child: u64) {
    let off = node_offset(page, idx) + NODE_HDR;
    write_u64(page, off, child);
}

/// Encode a leaf node
pub(crate) fn leaf_node(key: &[u8], value: LeafValue<'_>, extra: NodeFlags) -> Vec<u8> {
    let (nflags, dsize, body) = match value {
        LeafValue::Inline(data) => (extra, data.len(), NODE_HDR + key.len() + data.len()),
        LeafValue::Overflow { len, .. } => {
            (extra | NodeFlags::BIGDATA, len, NODE_HDR + key.len() + 8)
        }
    };
    let mut node = vec![0u8; body];
    write_u16(&mut node, 0, nflags.bits());
    write_u16(&mut node, 2, key.len() as u16);
    write_u32(&mut node, 4, dsize as u32);
    node[NODE_HDR..NODE_HDR + key.len()].copy_from_slice(key);
    let start = NODE_HDR + key.len();
    match value {
        LeafValue::Inline(data) => node[start..].copy_from_slice(data),
        LeafValue::Overflow { pgno, .. } => write_u64(&mut node, start, pgno),
    }
    node
}

/// Encode a branch node
pub(crate) fn branch_node(key: &[u8], child: u64) -> Vec<u8> {
    let mut node = vec![0u8; NODE_HDR + 8 + key.len()];
    write_u16(&mut node, 2, key.len() as u16);
    write_u64(&mut node, NODE_HDR, child);
    node[NODE_HDR + 8..].copy_from_slice(key);
    node
}

/// Key carried by an encoded node taken from a page of the given kind
pub(crate) fn encoded_key(node: &[u8], branch: bool) -> &[u8] {
    let ksize = read_u16(node, 2) as usize;
    let start = if branch { NODE_HDR + 8 } else { NODE_HDR };
    &node[start..start + ksize]
}

/// Lower bound of `key` among the leaf keys, and whether it is an exact hit
pub(crate) fn leaf_search(page: &[u8], key: &[u8]) -> (usize, bool) {
    let (mut lo, mut hi) = (0, num_keys(page));
    while lo < hi {
        let mid = (lo + hi) / 2;
        match node_key(page, mid).cmp(key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Equal => return (mid, true),
            Ordering::Greater => hi = mid,
        }
    }
    (lo, false)
}

/// Index of the child covering `key`
pub(crate) fn branch_search(page: &[u8], key: &[u8]) -> usize {
    let (mut lo, mut hi) = (1, num_keys(page));
    while lo < hi {
        let mid = (lo + hi) / 2;
        if node_key(page, mid) <= key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo - 1
}

/// Insert an encoded node at `idx`. Returns false if the page lacks room.
pub(crate) fn insert_node(page: &mut [u8], idx: usize, node: &[u8]) -> bool {
    if free_space(page) < node.len() + 2 {
        return false;
    }
    let n = num_keys(page);
    let new_upper = upper(page) - node.len();
    page[new_upper..new_upper + node.len()].copy_from_slice(node);
    let ptrs = PAGE_HDR + 2 * idx;
    page.copy_within(ptrs..PAGE_HDR + 2 * n, ptrs + 2);
    set_node_offset(page, idx, new_upper);
    write_u16(page, OFF_UPPER, new_upper as u16);
    write_u16(page, OFF_LOWER, (PAGE_HDR + 2 * (n + 1)) as u16);
    true
}

/// Remove node `idx` and compact the node area
pub(crate) fn remove_node(page: &mut [u8], idx: usize) {
    let n = num_keys(page);
    let off = node_offset(page, idx);
    let size = node_size_at(page, off);
    let up = upper(page);
    page.copy_within(up..off, up + size);
    for i in 0..n {
        let p = node_offset(page, i);
        if p < off {
            set_node_offset(page, i, p + size);
        }
    }
    let ptrs = PAGE_HDR + 2 * idx;
    page.copy_within(ptrs + 2..PAGE_HDR + 2 * n, ptrs);
    write_u16(page, OFF_UPPER, (up + size) as u16);
    write_u16(page, OFF_LOWER, (PAGE_HDR + 2 * (n - 1)) as u16);
}

/// Replace node `idx`. Returns false, leaving the page untouched, if the
/// new node does not fit.
pub(crate) fn replace_node(page: &mut [u8], idx: usize, node: &[u8]) -> bool {
    let old = node_size_at(page, node_offset(page, idx));
    if free_space(page) + old < node.len() {
        return false;
    }
    remove_node(page, idx);
    insert_node(page, idx, node)
}

/// Rebuild `page` from encoded nodes. The nodes must fit.
pub(crate) fn build<N: AsRef<[u8]>>(page: &mut [u8], pgno: u64, flags: PageFlags, nodes: &[N]) {
    init(page, pgno, flags);
    for (i, node) in nodes.iter().enumerate() {
        let fits = insert_node(page, i, node.as_ref());
        debug_assert!(fits, "node does not fit while rebuilding page");
    }
}

/// Space a set of encoded nodes takes on a page
pub(crate) fn nodes_room<N: AsRef<[u8]>>(nodes: &[N]) -> usize {
    nodes.iter().map(|n| n.as_ref().len() + 2).sum()
}

/// Choose where to split an overfull run of nodes.
///
/// Returns `k` such that `nodes[..k]` and `nodes[k..]` each fit a page, as
/// close to an even split as possible. With `append` the split keeps the
/// left page full and moves only the last node when that fits.
pub(crate) fn split_point<N: AsRef<[u8]>>(nodes: &[N], append: bool) -> Option<usize> {
    let sizes: Vec<usize> = nodes.iter().map(|n| n.as_ref().len() + 2).collect();
    let total = nodes_room(nodes);
    let n = sizes.len();
    if n < 2 {
        return None;
    }
    let mut best: Option<(usize, usize)> = None;
    let mut left = 0;
    for k in 1..n {
        left += sizes[k - 1];
        let right = total - left;
        if left > PAGE_ROOM {
            break;
        }
        if right > PAGE_ROOM {
            continue;
        }
        if append && k == n - 1 {
            return Some(k);
        }
        let skew = left.abs_diff(right);
        if best.map_or(true, |(_, s)| skew < s) {
            best = Some((k, skew));
        }
    }
    best.map(|(k, _)| k)
}

/// Pages needed to hold a value of `len` bytes on overflow pages
pub(crate) fn overflow_pages(len: usize) -> usize {
    (PAGE_HDR + len + PAGE_SIZE - 1) / PAGE_SIZE
}

pub(crate) fn overflow_count(page: &[u8]) -> usize {
    read_u32(page, OFF_OVERFLOW_COUNT) as usize
}

/// Fill an overflow run holding `data`
pub(crate) fn init_overflow(buf: &mut [u8], pgno: u64, data: &[u8]) {
    buf[..PAGE_HDR].fill(0);
    set_pgno(buf, pgno);
    write_u16(buf, OFF_FLAGS, PageFlags::OVERFLOW.bits());
    write_u32(buf, OFF_OVERFLOW_COUNT, (buf.len() / PAGE_SIZE) as u32);
    buf[PAGE_HDR..PAGE_HDR + data.len()].copy_from_slice(data);
    buf[PAGE_HDR + data.len()..].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_page(keys: &[&[u8]]) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        init(&mut page, 7, PageFlags::LEAF);
        for (i, k) in keys.iter().enumerate() {
            let node = leaf_node(k, LeafValue::Inline(b"v"), NodeFlags::empty());
            assert!(insert_node(&mut page, i, &node));
        }
        page
    }

    #[test]
    fn test_leaf_insert_and_search() {
        let mut page = leaf_page(&[b"b", b"d"]);
        let node = leaf_node(b"c", LeafValue::Inline(b"cc"), NodeFlags::empty());
        let (idx, exact) = leaf_search(&page, b"c");
        assert_eq!((idx, exact), (1, false));
        assert!(insert_node(&mut page, idx, &node));

        assert_eq!(num_keys(&page), 3);
        assert_eq!(node_key(&page, 1), b"c");
        assert_eq!(leaf_value(&page, 1), LeafValue::Inline(b"cc"));
        assert_eq!(leaf_search(&page, b"d"), (2, true));
        assert_eq!(leaf_search(&page, b"a"), (0, false));
        assert_eq!(leaf_search(&page, b"z"), (3, false));
        assert_eq!(pgno(&page), 7);
    }

    #[test]
    fn test_remove_compacts_node_area() {
        let mut page = leaf_page(&[b"a", b"b", b"c"]);
        let before = free_space(&page);
        remove_node(&mut page, 1);
        assert_eq!(num_keys(&page), 2);
        assert_eq!(node_key(&page, 0), b"a");
        assert_eq!(node_key(&page, 1), b"c");
        assert_eq!(free_space(&page), before + NODE_HDR + 2 + 2);
    }

    #[test]
    fn test_replace_node_grows_value() {
        let mut page = leaf_page(&[b"a", b"b"]);
        let node = leaf_node(b"a", LeafValue::Inline(&[9u8; 100]), NodeFlags::empty());
        assert!(replace_node(&mut page, 0, &node));
        assert_eq!(leaf_value(&page, 0), LeafValue::Inline(&[9u8; 100]));
        assert_eq!(node_key(&page, 1), b"b");
    }

    #[test]
    fn test_branch_search_ignores_first_key() {
        let mut page = vec![0u8; PAGE_SIZE];
        init(&mut page, 3, PageFlags::BRANCH);
        assert!(insert_node(&mut page, 0, &branch_node(b"zzz", 10)));
        assert!(insert_node(&mut page, 1, &branch_node(b"m", 11)));
        assert_eq!(branch_search(&page, b"a"), 0);
        assert_eq!(branch_search(&page, b"m"), 1);
        assert_eq!(branch_search(&page, b"q"), 1);
        assert_eq!(branch_child(&page, 1), 11);
        set_branch_child(&mut page, 0, 20);
        assert_eq!(branch_child(&page, 0), 20);
    }

    #[test]
    fn test_overflow_value_node() {
        let mut page = vec![0u8; PAGE_SIZE];
        init(&mut page, 2, PageFlags::LEAF);
        let node = leaf_node(b"big", LeafValue::Overflow { pgno: 40, len: 9000 }, NodeFlags::empty());
        assert!(insert_node(&mut page, 0, &node));
        assert!(node_flags(&page, 0).contains(NodeFlags::BIGDATA));
        assert_eq!(leaf_value(&page, 0), LeafValue::Overflow { pgno: 40, len: 9000 });
        assert_eq!(overflow_pages(9000), 3);
        assert_eq!(overflow_pages(PAGE_SIZE - PAGE_HDR), 1);
    }

    #[test]
    fn test_split_point_balances() {
        let nodes: Vec<Vec<u8>> = (0..10).map(|_| vec![0u8; 600]).collect();
        let k = split_point(&nodes, false).expect("split");
        assert_eq!(k, 5);
        assert!(nodes_room(&nodes[..k]) <= PAGE_ROOM);
        assert_eq!(split_point(&nodes, true), Some(5));
    }

    #[test]
    fn test_split_point_append_moves_last_node() {
        let mut nodes: Vec<Vec<u8>> = (0..6).map(|_| vec![0u8; 600]).collect();
        nodes.push(vec![0u8; 500]);
        assert!(nodes_room(&nodes) > PAGE_ROOM);
        assert_eq!(split_point(&nodes, true), Some(6));
    }
}

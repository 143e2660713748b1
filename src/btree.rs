//! B+tree search and modification.
//!
//! Reads go through [`Pages`], so the same traversal serves committed
//! snapshots and a write transaction's dirty pages. Writes copy every page on
//! the path from the root before changing it, split full pages upwards and
//! drop pages that become empty; underfull pages are never merged.

use crate::constants::{NodeFlags, PageFlags, NODE_HDR, NODE_MAX, PAGE_HDR, P_INVALID};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::meta::DbInfo;
use crate::page::{self, LeafValue};
use crate::transaction::WriteState;

/// Source of pages for traversal
pub(crate) trait Pages {
    /// A single branch or leaf page
    fn page(&self, pgno: u64) -> Result<&[u8]>;
    /// `count` contiguous pages starting at `pgno`
    fn run(&self, pgno: u64, count: usize) -> Result<&[u8]>;
}

/// Path from the root to a leaf position: (page, node index) per level
pub(crate) type Stack = Vec<(u64, usize)>;

/// Leaf item
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry<'a> {
    pub(crate) key: &'a [u8],
    pub(crate) flags: NodeFlags,
    pub(crate) data: &'a [u8],
}

fn leaf_entry<'a, P: Pages + ?Sized>(pages: &'a P, leaf: &'a [u8], idx: usize) -> Result<Entry<'a>> {
    let data = match page::leaf_value(leaf, idx) {
        LeafValue::Inline(data) => data,
        LeafValue::Overflow { pgno, len } => {
            let count = page::overflow_pages(len);
            let run = pages.run(pgno, count)?;
            if page::pgno(run) != pgno || page::overflow_count(run) != count {
                return Err(Error::Corrupted);
            }
            &run[PAGE_HDR..PAGE_HDR + len]
        }
    };
    Ok(Entry {
        key: page::node_key(leaf, idx),
        flags: page::node_flags(leaf, idx),
        data,
    })
}

/// Item at the leaf position on top of `stack`
pub(crate) fn entry<'a, P: Pages + ?Sized>(pages: &'a P, stack: &Stack) -> Result<Entry<'a>> {
    let &(pgno, idx) = stack.last().ok_or(Error::Corrupted)?;
    let leaf = pages.page(pgno)?;
    if idx >= page::num_keys(leaf) {
        return Err(Error::NotFound);
    }
    leaf_entry(pages, leaf, idx)
}

/// Descend towards `key`, returning the path with the leaf's lower bound
fn descend<P: Pages + ?Sized>(pages: &P, info: &DbInfo, key: &[u8]) -> Result<(Stack, bool)> {
    let mut stack = Stack::with_capacity(info.depth as usize);
    let mut pgno = info.root;
    loop {
        let p = pages.page(pgno)?;
        if page::is_branch(p) {
            let idx = page::branch_search(p, key);
            stack.push((pgno, idx));
            pgno = page::branch_child(p, idx);
        } else {
            let (idx, exact) = page::leaf_search(p, key);
            stack.push((pgno, idx));
            return Ok((stack, exact));
        }
    }
}

/// Exact match for `key`
pub(crate) fn lookup<'a, P: Pages + ?Sized>(
    pages: &'a P,
    info: &DbInfo,
    key: &[u8],
) -> Result<Option<Entry<'a>>> {
    if info.is_empty() {
        return Ok(None);
    }
    let (stack, exact) = descend(pages, info, key)?;
    if !exact {
        return Ok(None);
    }
    entry(pages, &stack).map(Some)
}

/// Position at the first key at or after `key`. The flag tells whether the
/// key itself was found.
pub(crate) fn seek<P: Pages + ?Sized>(pages: &P, info: &DbInfo, key: &[u8]) -> Result<Option<(Stack, bool)>> {
    if info.is_empty() {
        return Ok(None);
    }
    let (mut stack, exact) = descend(pages, info, key)?;
    let &(leaf, idx) = stack.last().ok_or(Error::Corrupted)?;
    let n = page::num_keys(pages.page(leaf)?);
    if idx < n {
        return Ok(Some((stack, exact)));
    }
    // Past the end of this leaf: the answer is the first key of the next one
    if let Some(top) = stack.last_mut() {
        top.1 = n - 1;
    }
    if next(pages, &mut stack)? {
        Ok(Some((stack, false)))
    } else {
        Ok(None)
    }
}

fn edge<P: Pages + ?Sized>(pages: &P, info: &DbInfo, rightmost: bool) -> Result<Option<Stack>> {
    if info.is_empty() {
        return Ok(None);
    }
    let mut stack = Stack::with_capacity(info.depth as usize);
    descend_edge(pages, &mut stack, info.root, rightmost)?;
    Ok(Some(stack))
}

/// Push the leftmost or rightmost path below `pgno`
fn descend_edge<P: Pages + ?Sized>(pages: &P, stack: &mut Stack, mut pgno: u64, rightmost: bool) -> Result<()> {
    loop {
        let p = pages.page(pgno)?;
        let n = page::num_keys(p);
        if n == 0 {
            return Err(Error::Corrupted);
        }
        let idx = if rightmost { n - 1 } else { 0 };
        stack.push((pgno, idx));
        if !page::is_branch(p) {
            return Ok(());
        }
        pgno = page::branch_child(p, idx);
    }
}

pub(crate) fn first<P: Pages + ?Sized>(pages: &P, info: &DbInfo) -> Result<Option<Stack>> {
    edge(pages, info, false)
}

pub(crate) fn last<P: Pages + ?Sized>(pages: &P, info: &DbInfo) -> Result<Option<Stack>> {
    edge(pages, info, true)
}

/// Move to the next leaf item. Leaves `stack` untouched at the end.
pub(crate) fn next<P: Pages + ?Sized>(pages: &P, stack: &mut Stack) -> Result<bool> {
    let mut level = stack.len();
    while level > 0 {
        let (pgno, idx) = stack[level - 1];
        if idx + 1 < page::num_keys(pages.page(pgno)?) {
            break;
        }
        level -= 1;
    }
    if level == 0 {
        return Ok(false);
    }
    stack.truncate(level);
    stack[level - 1].1 += 1;
    let (pgno, idx) = stack[level - 1];
    let p = pages.page(pgno)?;
    if page::is_branch(p) {
        descend_edge(pages, stack, page::branch_child(p, idx), false)?;
    }
    Ok(true)
}

/// Move to the previous leaf item. Leaves `stack` untouched at the start.
pub(crate) fn prev<P: Pages + ?Sized>(pages: &P, stack: &mut Stack) -> Result<bool> {
    let mut level = stack.len();
    while level > 0 && stack[level - 1].1 == 0 {
        level -= 1;
    }
    if level == 0 {
        return Ok(false);
    }
    stack.truncate(level);
    stack[level - 1].1 -= 1;
    let (pgno, idx) = stack[level - 1];
    let p = pages.page(pgno)?;
    if page::is_branch(p) {
        descend_edge(pages, stack, page::branch_child(p, idx), true)?;
    }
    Ok(true)
}

/// Copy the root-to-leaf path for `key` into the transaction
fn touch_path(env: &Environment, w: &mut WriteState, info: &mut DbInfo, key: &[u8]) -> Result<(Stack, u64)> {
    let mut pgno = w.touch(env, info.root)?;
    info.root = pgno;
    let mut path = Stack::with_capacity(info.depth as usize);
    loop {
        let (idx, child) = {
            let p = w.page(env, pgno)?;
            if !page::is_branch(p) {
                return Ok((path, pgno));
            }
            let idx = page::branch_search(p, key);
            (idx, page::branch_child(p, idx))
        };
        let copy = w.touch(env, child)?;
        if copy != child {
            page::set_branch_child(w.dirty_mut(pgno)?, idx, copy);
        }
        path.push((pgno, idx));
        pgno = copy;
    }
}

fn collect_nodes(p: &[u8]) -> Vec<Vec<u8>> {
    (0..page::num_keys(p))
        .map(|i| page::node_bytes(p, i).to_vec())
        .collect()
}

/// Encode a leaf node, moving large values to overflow pages
fn value_node(
    env: &Environment,
    w: &mut WriteState,
    info: &mut DbInfo,
    key: &[u8],
    data: &[u8],
    flags: NodeFlags,
) -> Result<Vec<u8>> {
    if NODE_HDR + key.len() + data.len() <= NODE_MAX {
        return Ok(page::leaf_node(key, LeafValue::Inline(data), flags));
    }
    let count = page::overflow_pages(data.len());
    let pgno = w.alloc(env, count)?;
    page::init_overflow(w.dirty_mut(pgno)?, pgno, data);
    info.overflow_pages += count as u64;
    Ok(page::leaf_node(
        key,
        LeafValue::Overflow {
            pgno,
            len: data.len(),
        },
        flags,
    ))
}

/// Insert or replace `key`. Callers check flags and key validity first.
pub(crate) fn put(
    env: &Environment,
    w: &mut WriteState,
    info: &mut DbInfo,
    key: &[u8],
    data: &[u8],
    flags: NodeFlags,
) -> Result<()> {
    if info.is_empty() {
        let node = value_node(env, w, info, key, data, flags)?;
        let pgno = w.alloc(env, 1)?;
        let p = w.dirty_mut(pgno)?;
        page::init(p, pgno, PageFlags::LEAF);
        page::insert_node(p, 0, &node);
        info.root = pgno;
        info.depth = 1;
        info.leaf_pages += 1;
        info.entries += 1;
        return Ok(());
    }

    let (path, leaf) = touch_path(env, w, info, key)?;
    let (idx, exact, old_run) = {
        let p = w.page(env, leaf)?;
        let (idx, exact) = page::leaf_search(p, key);
        let old_run = match exact.then(|| page::leaf_value(p, idx)) {
            Some(LeafValue::Overflow { pgno, len }) => Some((pgno, page::overflow_pages(len))),
            _ => None,
        };
        (idx, exact, old_run)
    };
    if let Some((pgno, count)) = old_run {
        w.free(pgno, count);
        info.overflow_pages -= count as u64;
    }
    let node = value_node(env, w, info, key, data, flags)?;
    if !exact {
        info.entries += 1;
    }

    let p = w.dirty_mut(leaf)?;
    let fits = if exact {
        page::replace_node(p, idx, &node)
    } else {
        page::insert_node(p, idx, &node)
    };
    if fits {
        return Ok(());
    }
    let mut nodes = collect_nodes(p);
    if exact {
        nodes[idx] = node;
    } else {
        nodes.insert(idx, node);
    }
    let at_end = !exact && idx == nodes.len() - 1;
    split(env, w, info, path, leaf, nodes, at_end)
}

/// Spread `nodes` over page `pgno` and a new right sibling, pushing the
/// separator into the parent and splitting upwards as needed.
fn split(
    env: &Environment,
    w: &mut WriteState,
    info: &mut DbInfo,
    mut path: Stack,
    mut pgno: u64,
    mut nodes: Vec<Vec<u8>>,
    mut at_end: bool,
) -> Result<()> {
    loop {
        let kind = page::flags(w.page(env, pgno)?) & (PageFlags::BRANCH | PageFlags::LEAF);
        let branch = kind.contains(PageFlags::BRANCH);
        let k = page::split_point(&nodes, at_end).ok_or(Error::PageFull)?;
        let right = w.alloc(env, 1)?;
        let sep = page::encoded_key(&nodes[k], branch).to_vec();
        page::build(w.dirty_mut(pgno)?, pgno, kind, &nodes[..k]);
        page::build(w.dirty_mut(right)?, right, kind, &nodes[k..]);
        if branch {
            info.branch_pages += 1;
        } else {
            info.leaf_pages += 1;
        }

        let link = page::branch_node(&sep, right);
        match path.pop() {
            None => {
                let root = w.alloc(env, 1)?;
                let children = [page::branch_node(&[], pgno), link];
                page::build(w.dirty_mut(root)?, root, PageFlags::BRANCH, &children);
                info.root = root;
                info.depth += 1;
                info.branch_pages += 1;
                return Ok(());
            }
            Some((parent, pidx)) => {
                let p = w.dirty_mut(parent)?;
                if page::insert_node(p, pidx + 1, &link) {
                    return Ok(());
                }
                let mut parent_nodes = collect_nodes(p);
                at_end = pidx + 1 == parent_nodes.len();
                parent_nodes.insert(pidx + 1, link);
                nodes = parent_nodes;
                pgno = parent;
            }
        }
    }
}

/// Remove `key`. Callers check that it exists.
pub(crate) fn del(env: &Environment, w: &mut WriteState, info: &mut DbInfo, key: &[u8]) -> Result<()> {
    if info.is_empty() {
        return Err(Error::NotFound);
    }
    let (mut path, leaf) = touch_path(env, w, info, key)?;
    let (idx, old_run) = {
        let p = w.page(env, leaf)?;
        let (idx, exact) = page::leaf_search(p, key);
        if !exact {
            return Err(Error::NotFound);
        }
        let old_run = match page::leaf_value(p, idx) {
            LeafValue::Overflow { pgno, len } => Some((pgno, page::overflow_pages(len))),
            LeafValue::Inline(_) => None,
        };
        (idx, old_run)
    };
    if let Some((pgno, count)) = old_run {
        w.free(pgno, count);
        info.overflow_pages -= count as u64;
    }

    let p = w.dirty_mut(leaf)?;
    page::remove_node(p, idx);
    info.entries -= 1;
    if page::num_keys(p) > 0 {
        return Ok(());
    }

    w.free(leaf, 1);
    info.leaf_pages -= 1;
    loop {
        match path.pop() {
            None => {
                info.root = P_INVALID;
                info.depth = 0;
                return Ok(());
            }
            Some((parent, pidx)) => {
                let p = w.dirty_mut(parent)?;
                page::remove_node(p, pidx);
                if page::num_keys(p) > 0 {
                    break;
                }
                w.free(parent, 1);
                info.branch_pages -= 1;
            }
        }
    }
    collapse_root(env, w, info)
}

/// Replace a branch root holding a single child by that child
fn collapse_root(env: &Environment, w: &mut WriteState, info: &mut DbInfo) -> Result<()> {
    loop {
        let child = {
            let p = w.page(env, info.root)?;
            if !page::is_branch(p) || page::num_keys(p) != 1 {
                return Ok(());
            }
            page::branch_child(p, 0)
        };
        w.free(info.root, 1);
        info.root = child;
        info.depth -= 1;
        info.branch_pages -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EnvFlags, PAGE_SIZE};
    use crate::error::Error;
    use tempfile::TempDir;

    fn open_env(dir: &TempDir) -> Environment {
        Environment::builder()
            .set_map_size(64 << 20)
            .unwrap()
            .open(dir.path(), EnvFlags::empty(), 0o644)
            .unwrap()
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key{:08}", i).into_bytes()
    }

    #[test]
    fn test_split_and_traverse() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);
        let mut w = WriteState::new(&env.snapshot());
        let mut info = DbInfo::empty();
        // Insert in a scrambled order to exercise splits in the middle
        for i in 0..2000u32 {
            let k = (i * 7919) % 2000;
            put(&env, &mut w, &mut info, &key(k), &[b'x'; 40], NodeFlags::empty()).unwrap();
        }
        assert_eq!(info.entries, 2000);
        assert!(info.depth >= 2);
        assert!(info.branch_pages >= 1);

        let view = w.view(&env);
        let mut stack = first(&view, &info).unwrap().unwrap();
        let mut count = 1;
        let mut prev_key = entry(&view, &stack).unwrap().key.to_vec();
        while next(&view, &mut stack).unwrap() {
            let k = entry(&view, &stack).unwrap().key.to_vec();
            assert!(k > prev_key);
            prev_key = k;
            count += 1;
        }
        assert_eq!(count, 2000);
        assert_eq!(prev_key, key(1999));

        let (stack, exact) = seek(&view, &info, b"key00000500x").unwrap().unwrap();
        assert!(!exact);
        assert_eq!(entry(&view, &stack).unwrap().key, &key(501)[..]);
        assert!(seek(&view, &info, b"zzz").unwrap().is_none());
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);
        let mut w = WriteState::new(&env.snapshot());
        let mut info = DbInfo::empty();
        for i in 0..600u32 {
            put(&env, &mut w, &mut info, &key(i), &[7u8; 100], NodeFlags::empty()).unwrap();
        }
        for i in (0..600u32).rev() {
            del(&env, &mut w, &mut info, &key(i)).unwrap();
            if i % 97 == 0 {
                let view = w.view(&env);
                assert!(lookup(&view, &info, &key(i)).unwrap().is_none());
                if i > 0 {
                    assert!(lookup(&view, &info, &key(i - 1)).unwrap().is_some());
                }
            }
        }
        assert!(info.is_empty());
        assert_eq!(info.depth, 0);
        assert_eq!(info.entries, 0);
        assert_eq!(info.leaf_pages + info.branch_pages, 0);
        assert_eq!(del(&env, &mut w, &mut info, &key(1)), Err(Error::NotFound));
    }

    #[test]
    fn test_overflow_values_are_replaced_and_freed() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);
        let mut w = WriteState::new(&env.snapshot());
        let mut info = DbInfo::empty();
        let big = vec![3u8; 3 * PAGE_SIZE];
        put(&env, &mut w, &mut info, b"big", &big, NodeFlags::empty()).unwrap();
        assert_eq!(info.overflow_pages, 4);
        {
            let view = w.view(&env);
            let e = lookup(&view, &info, b"big").unwrap().unwrap();
            assert_eq!(e.data, &big[..]);
        }
        put(&env, &mut w, &mut info, b"big", b"small", NodeFlags::empty()).unwrap();
        assert_eq!(info.overflow_pages, 0);
        assert_eq!(info.entries, 1);
    }
}

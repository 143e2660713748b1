use std::collections::HashMap;
use std::mem;
use std::ptr;
use std::thread::{self, ThreadId};

use crate::btree::{self, Pages};
use crate::constants::{
    NodeFlags, WriteFlags, CORE_DBS, FREE_DBI, MAIN_DBI, MAX_DATA_SIZE, MAX_DIRTY_PAGES, MAX_KEY_SIZE,
    NODE_HDR, NODE_MAX, PAGE_SIZE,
};
use crate::diag::diag_debug;
use crate::env::{Environment, WriterGuard};
use crate::error::{Error, Result};
use crate::meta::{DbInfo, Meta};
use crate::midl::Idl;
use crate::page;
use crate::types::Stat;

/// Free database key: txnid (u64) followed by a chunk number (u32), big endian
const FREE_KEY_SIZE: usize = 12;
/// Page numbers per free database record, sized to stay on the leaf page
const FREE_CHUNK_IDS: usize = (NODE_MAX - NODE_HDR - FREE_KEY_SIZE) / 8;

fn free_key(txnid: u64, chunk: u32) -> [u8; FREE_KEY_SIZE] {
    let mut key = [0u8; FREE_KEY_SIZE];
    key[..8].copy_from_slice(&txnid.to_be_bytes());
    key[8..].copy_from_slice(&chunk.to_be_bytes());
    key
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return Err(Error::BadValSize);
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct ReadState {
    /// Snapshot being read
    meta: Meta,
    /// Reader slot, `None` for nested read transactions
    slot: Option<usize>,
    /// False between reset and renew
    active: bool,
}

/// Named database state within a write transaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct NamedDb {
    info: DbInfo,
    /// Record in the main database is out of date
    dirty: bool,
}

/// Everything a write transaction changes. Nested write transactions work
/// on a clone and hand it back to the parent on commit.
#[derive(Debug, Clone)]
pub(crate) struct WriteState {
    txnid: u64,
    free_db: DbInfo,
    main_db: DbInfo,
    named: HashMap<u32, NamedDb>,
    /// Pages written by this transaction, keyed by first page number
    dirty: HashMap<u64, Box<[u8]>>,
    dirty_count: usize,
    /// Committed pages no longer referenced
    freed: Idl,
    /// Pages this transaction may hand out again
    reclaimable: Idl,
    next_pgno: u64,
    /// Allocate only from the end of the file
    saving: bool,
    /// Only hand out pages already reclaimed
    reclaiming: bool,
    /// A write failed half way; only abort is allowed
    failed: bool,
    /// Handles registered by this transaction or its committed children
    created: Vec<u32>,
}

/// Read access to the pages a write transaction sees
pub(crate) struct WriteView<'a> {
    env: &'a Environment,
    w: &'a WriteState,
}

impl Pages for WriteView<'_> {
    fn page(&self, pgno: u64) -> Result<&[u8]> {
        self.w.page(self.env, pgno)
    }

    fn run(&self, pgno: u64, count: usize) -> Result<&[u8]> {
        self.w.run(self.env, pgno, count)
    }
}

impl WriteState {
    pub(crate) fn new(meta: &Meta) -> Self {
        WriteState {
            txnid: meta.txnid + 1,
            free_db: meta.free_db,
            main_db: meta.main_db,
            named: HashMap::new(),
            dirty: HashMap::new(),
            dirty_count: 0,
            freed: Idl::new(),
            reclaimable: Idl::new(),
            next_pgno: meta.last_pgno + 1,
            saving: false,
            reclaiming: false,
            failed: false,
            created: Vec::new(),
        }
    }

    pub(crate) fn view<'a>(&'a self, env: &'a Environment) -> WriteView<'a> {
        WriteView { env, w: self }
    }

    pub(crate) fn page<'a>(&'a self, env: &'a Environment, pgno: u64) -> Result<&'a [u8]> {
        match self.dirty.get(&pgno) {
            Some(buf) => Ok(&buf[..PAGE_SIZE]),
            None => env.map_pages(pgno, 1),
        }
    }

    fn run<'a>(&'a self, env: &'a Environment, pgno: u64, count: usize) -> Result<&'a [u8]> {
        match self.dirty.get(&pgno) {
            Some(buf) => Ok(&buf[..]),
            None => env.map_pages(pgno, count),
        }
    }

    pub(crate) fn dirty_mut(&mut self, pgno: u64) -> Result<&mut [u8]> {
        self.dirty
            .get_mut(&pgno)
            .map(|buf| &mut buf[..])
            .ok_or(Error::Corrupted)
    }

    /// Allocate `count` contiguous zeroed pages
    pub(crate) fn alloc(&mut self, env: &Environment, count: usize) -> Result<u64> {
        if self.dirty_count + count > MAX_DIRTY_PAGES {
            return Err(Error::TxnFull);
        }
        let pgno = match self.reuse(env, count)? {
            Some(pgno) => pgno,
            None => {
                if self.next_pgno + count as u64 > env.map_page_limit() {
                    return Err(Error::MapFull);
                }
                let pgno = self.next_pgno;
                self.next_pgno += count as u64;
                pgno
            }
        };
        let mut buf = vec![0u8; count * PAGE_SIZE].into_boxed_slice();
        page::set_pgno(&mut buf, pgno);
        self.dirty.insert(pgno, buf);
        self.dirty_count += count;
        Ok(pgno)
    }

    fn reuse(&mut self, env: &Environment, count: usize) -> Result<Option<u64>> {
        if self.saving {
            return Ok(None);
        }
        loop {
            if let Some(pgno) = self.reclaimable.take_run(count) {
                return Ok(Some(pgno));
            }
            if self.reclaiming || !self.reclaim(env)? {
                return Ok(None);
            }
        }
    }

    /// Move the oldest free database record into `reclaimable` if no reader
    /// can still see the pages it lists.
    fn reclaim(&mut self, env: &Environment) -> Result<bool> {
        let (key, ids) = {
            let view = self.view(env);
            let stack = match btree::first(&view, &self.free_db)? {
                Some(stack) => stack,
                None => return Ok(false),
            };
            let item = btree::entry(&view, &stack)?;
            (item.key.to_vec(), Idl::decode(item.data))
        };
        if key.len() != FREE_KEY_SIZE {
            return Err(Error::Corrupted);
        }
        let mut txnid = [0u8; 8];
        txnid.copy_from_slice(&key[..8]);
        let txnid = u64::from_be_bytes(txnid);
        let mut oldest = self.txnid - 1;
        if let Some(reader) = env.oldest_reader() {
            oldest = oldest.min(reader);
        }
        if txnid > oldest {
            return Ok(false);
        }

        self.reclaimable.merge(ids.as_slice().iter().copied());
        self.reclaiming = true;
        let mut info = self.free_db;
        let result = btree::del(env, self, &mut info, &key);
        self.reclaiming = false;
        result?;
        self.free_db = info;
        diag_debug!(
            env.sink(),
            "freelist",
            "txn {} reclaimed {} pages freed by txn {}",
            self.txnid,
            ids.len(),
            txnid
        );
        Ok(true)
    }

    /// Copy a committed page into the transaction, returning the copy's number
    pub(crate) fn touch(&mut self, env: &Environment, pgno: u64) -> Result<u64> {
        if self.dirty.contains_key(&pgno) {
            return Ok(pgno);
        }
        let copy = self.alloc(env, 1)?;
        let src = env.map_pages(pgno, 1)?;
        let buf = self.dirty_mut(copy)?;
        buf.copy_from_slice(src);
        page::set_pgno(buf, copy);
        self.freed.insert(pgno);
        Ok(copy)
    }

    /// Release `count` pages starting at `pgno`
    pub(crate) fn free(&mut self, pgno: u64, count: usize) {
        if self.dirty.remove(&pgno).is_some() {
            self.dirty_count -= count;
            self.reclaimable.insert_run(pgno, count);
        } else {
            self.freed.insert_run(pgno, count);
        }
    }

    fn store_info(&mut self, dbi: u32, info: DbInfo) {
        match dbi {
            FREE_DBI => self.free_db = info,
            MAIN_DBI => self.main_db = info,
            _ => {
                self.named.insert(dbi, NamedDb { info, dirty: true });
            }
        }
    }

    /// Write changed named database records into the main database
    fn flush_named(&mut self, env: &Environment) -> Result<()> {
        let mut pending: Vec<(u32, DbInfo)> = self
            .named
            .iter()
            .filter(|(_, db)| db.dirty)
            .map(|(dbi, db)| (*dbi, db.info))
            .collect();
        pending.sort_unstable_by_key(|(dbi, _)| *dbi);
        for (dbi, info) in pending {
            let name = env.dbi_name(dbi)?;
            let mut main = self.main_db;
            btree::put(env, self, &mut main, name.as_bytes(), &info.encode(), NodeFlags::SUBDATA)?;
            self.main_db = main;
            if let Some(db) = self.named.get_mut(&dbi) {
                db.dirty = false;
            }
        }
        Ok(())
    }

    /// Record the pages this transaction freed under its own txnid.
    ///
    /// Writing the records can itself free or consume pages, so the list is
    /// rewritten until it stops changing. Only the first pass may hand out
    /// pages already reclaimed; later passes allocate at the end of the file,
    /// so from then on the list only grows and the loop ends.
    fn save_freelist(&mut self, env: &Environment) -> Result<()> {
        self.reclaiming = true;
        let first = self.write_freelist(env, &Idl::new(), 0);
        self.reclaiming = false;
        let (mut saved, mut chunks) = match first? {
            Some(written) => written,
            None => return Ok(()),
        };

        self.saving = true;
        let result = loop {
            match self.write_freelist(env, &saved, chunks) {
                Ok(Some((ids, count))) => {
                    saved = ids;
                    chunks = count;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.saving = false;
        result
    }

    /// Write the current free list unless it equals `saved`, dropping
    /// records past its new end. Returns what was written.
    fn write_freelist(&mut self, env: &Environment, saved: &Idl, chunks: usize) -> Result<Option<(Idl, usize)>> {
        let mut ids = self.freed.clone();
        ids.merge(self.reclaimable.as_slice().iter().copied());
        if ids == *saved {
            return Ok(None);
        }
        let records: Vec<Vec<u8>> = ids.encode_chunks(FREE_CHUNK_IDS).collect();
        let mut info = self.free_db;
        for (chunk, data) in records.iter().enumerate() {
            let key = free_key(self.txnid, chunk as u32);
            btree::put(env, self, &mut info, &key, data, NodeFlags::empty())?;
        }
        for chunk in records.len()..chunks {
            btree::del(env, self, &mut info, &free_key(self.txnid, chunk as u32))?;
        }
        self.free_db = info;
        Ok(Some((ids, records.len())))
    }
}

#[derive(Debug)]
pub(crate) enum Mode {
    ReadOnly(ReadState),
    ReadWrite(Box<WriteState>),
    Done,
}

/// A read-only or read-write transaction.
///
/// Committing or aborting consumes the transaction; dropping it aborts.
/// A nested transaction mutably borrows its parent, so the parent cannot be
/// used until the child ends.
#[derive(Debug)]
pub struct Transaction<'env> {
    env: &'env Environment,
    mode: Mode,
    /// Parent's state, replaced by ours when a nested write commits
    parent: Option<&'env mut Mode>,
    /// Held by top-level write transactions
    writer: Option<WriterGuard<'env>>,
    /// Thread that began the transaction
    owner: ThreadId,
}

impl<'env> Transaction<'env> {
    pub(crate) fn begin(
        env: &'env Environment,
        parent: Option<&'env mut Transaction<'_>>,
        read_only: bool,
    ) -> Result<Self> {
        let owner = thread::current().id();
        if let Some(parent) = parent {
            if !ptr::eq(parent.env, env) {
                return Err(Error::BadTxn);
            }
            parent.check_thread()?;
            let mode = match (&parent.mode, read_only) {
                (Mode::Done, _) => return Err(Error::BadTxn),
                (Mode::ReadWrite(w), false) => {
                    if w.failed {
                        return Err(Error::BadTxn);
                    }
                    Mode::ReadWrite(w.clone())
                }
                (Mode::ReadOnly(r), true) => {
                    if !r.active {
                        return Err(Error::BadTxn);
                    }
                    Mode::ReadOnly(ReadState {
                        meta: r.meta,
                        slot: None,
                        active: true,
                    })
                }
                _ => return Err(Error::InvalidParentTxn),
            };
            return Ok(Transaction {
                env,
                mode,
                parent: Some(&mut parent.mode),
                writer: None,
                owner,
            });
        }

        if read_only {
            env.bind_thread(owner)?;
            let (slot, meta) = env.acquire_reader().map_err(|e| {
                env.unbind_thread(owner);
                e
            })?;
            return Ok(Transaction {
                env,
                mode: Mode::ReadOnly(ReadState {
                    meta,
                    slot: Some(slot),
                    active: true,
                }),
                parent: None,
                writer: None,
                owner,
            });
        }

        if env.is_read_only() {
            return Err(Error::EnvReadOnly);
        }
        let writer = env.lock_writer()?;
        let state = WriteState::new(&env.snapshot());
        Ok(Transaction {
            env,
            mode: Mode::ReadWrite(Box::new(state)),
            parent: None,
            writer: Some(writer),
            owner,
        })
    }

    /// Transaction ID: the snapshot read, or the one a write will commit as
    pub fn id(&self) -> u64 {
        match &self.mode {
            Mode::ReadOnly(r) => r.meta.txnid,
            Mode::ReadWrite(w) => w.txnid,
            Mode::Done => 0,
        }
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self.mode, Mode::ReadOnly(_))
    }

    pub fn env(&self) -> &'env Environment {
        self.env
    }

    /// Snapshot a read transaction is bound to
    pub(crate) fn snapshot(&self) -> Meta {
        match &self.mode {
            Mode::ReadOnly(r) => r.meta,
            _ => self.env.snapshot(),
        }
    }

    fn check_thread(&self) -> Result<()> {
        if self.env.use_tls() && thread::current().id() != self.owner {
            return Err(Error::BadTxn);
        }
        Ok(())
    }

    /// Commit the transaction. A nested write hands its changes to the
    /// parent; a top-level write makes them durable.
    pub fn commit(mut self) -> Result<()> {
        let result = self.commit_inner();
        self.finish();
        result
    }

    fn commit_inner(&mut self) -> Result<()> {
        self.check_thread()?;
        let w = match &mut self.mode {
            Mode::Done => return Err(Error::BadTxn),
            Mode::ReadOnly(_) => return Ok(()),
            Mode::ReadWrite(w) => w,
        };
        if w.failed {
            return Err(Error::BadTxn);
        }
        if let Some(parent) = self.parent.as_mut() {
            **parent = mem::replace(&mut self.mode, Mode::Done);
            return Ok(());
        }

        let env = self.env;
        w.flush_named(env)?;
        if w.dirty.is_empty() && w.freed.is_empty() {
            self.mode = Mode::Done;
            return Ok(());
        }
        w.save_freelist(env)?;

        let meta = Meta {
            map_size: env.map_page_limit() * PAGE_SIZE as u64,
            free_db: w.free_db,
            main_db: w.main_db,
            last_pgno: w.next_pgno - 1,
            txnid: w.txnid,
        };
        let mut pages: Vec<(u64, &[u8])> = w.dirty.iter().map(|(pgno, buf)| (*pgno, &buf[..])).collect();
        pages.sort_unstable_by_key(|(pgno, _)| *pgno);
        let written = pages.len();
        env.write_commit(pages, &meta)?;
        diag_debug!(
            env.sink(),
            "txn",
            "committed txn {}: {} pages written, {} freed, last page {}",
            meta.txnid,
            written,
            w.freed.len(),
            meta.last_pgno
        );
        self.mode = Mode::Done;
        Ok(())
    }

    /// Abandon the transaction and everything it wrote
    pub fn abort(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        match mem::replace(&mut self.mode, Mode::Done) {
            Mode::ReadOnly(r) => {
                if let Some(slot) = r.slot {
                    self.env.release_reader(slot);
                    self.env.unbind_thread(self.owner);
                }
            }
            Mode::ReadWrite(w) => {
                let kept: &[u32] = match self.parent.as_deref() {
                    Some(Mode::ReadWrite(p)) => &p.created,
                    _ => &[],
                };
                for &dbi in w.created.iter().filter(|dbi| !kept.contains(*dbi)) {
                    self.env.release_dbi(dbi);
                }
                if self.parent.is_none() {
                    diag_debug!(self.env.sink(), "txn", "aborted txn {}", w.txnid);
                }
            }
            Mode::Done => {}
        }
        self.parent = None;
        self.writer = None;
    }

    /// Release the snapshot of a read transaction while keeping its reader
    /// slot, so it can be renewed later.
    pub fn reset(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::ReadOnly(r) => {
                if self.parent.is_some() {
                    return Err(Error::BadTxn);
                }
                if r.active {
                    if let Some(slot) = r.slot {
                        self.env.park_reader(slot);
                    }
                    r.active = false;
                }
                Ok(())
            }
            Mode::ReadWrite(_) => Err(Error::invalid_argument()),
            Mode::Done => Err(Error::BadTxn),
        }
    }

    /// Bind a reset read transaction to the latest committed snapshot
    pub fn renew(&mut self) -> Result<()> {
        self.check_thread()?;
        match &mut self.mode {
            Mode::ReadOnly(r) => {
                if self.parent.is_some() {
                    return Err(Error::BadTxn);
                }
                if r.active {
                    return Err(Error::invalid_argument());
                }
                let slot = r.slot.ok_or(Error::BadTxn)?;
                r.meta = self.env.rebind_reader(slot);
                r.active = true;
                Ok(())
            }
            Mode::ReadWrite(_) => Err(Error::invalid_argument()),
            Mode::Done => Err(Error::BadTxn),
        }
    }

    fn write_state(&mut self) -> Result<&mut WriteState> {
        match &mut self.mode {
            Mode::ReadWrite(w) if w.failed => Err(Error::BadTxn),
            Mode::ReadWrite(w) => Ok(w),
            Mode::ReadOnly(_) => Err(Error::TxnReadOnly),
            Mode::Done => Err(Error::BadTxn),
        }
    }

    /// Current record of database `dbi` as seen by this transaction
    pub(crate) fn db_info(&self, dbi: u32) -> Result<DbInfo> {
        let (free, main, named) = match &self.mode {
            Mode::ReadOnly(r) if r.active => (r.meta.free_db, r.meta.main_db, None),
            Mode::ReadWrite(w) => (w.free_db, w.main_db, w.named.get(&dbi).copied()),
            _ => return Err(Error::BadTxn),
        };
        match dbi {
            FREE_DBI => Ok(free),
            MAIN_DBI => Ok(main),
            _ => {
                if let Some(db) = named {
                    return Ok(db.info);
                }
                let name = self.env.dbi_name(dbi)?;
                match btree::lookup(self, &main, name.as_bytes())? {
                    Some(item) if item.flags.contains(NodeFlags::SUBDATA) => DbInfo::decode(item.data),
                    Some(_) => Err(Error::Incompatible),
                    // Created by a transaction this snapshot predates
                    None => Ok(DbInfo::empty()),
                }
            }
        }
    }

    fn db_info_for_write(&mut self, dbi: u32) -> Result<DbInfo> {
        let w = self.write_state()?;
        if dbi >= CORE_DBS && !w.named.contains_key(&dbi) {
            let main = w.main_db;
            let name = self.env.dbi_name(dbi)?;
            return match btree::lookup(&*self, &main, name.as_bytes())? {
                Some(item) if item.flags.contains(NodeFlags::SUBDATA) => DbInfo::decode(item.data),
                Some(_) => Err(Error::Incompatible),
                None => Err(Error::BadDbi),
            };
        }
        self.db_info(dbi)
    }

    /// Store the outcome of a tree update, poisoning the transaction on error
    fn finish_write(&mut self, dbi: u32, info: DbInfo, result: Result<()>) -> Result<()> {
        let w = self.write_state()?;
        match result {
            Ok(()) => {
                w.store_info(dbi, info);
                Ok(())
            }
            Err(e) => {
                w.failed = true;
                Err(e)
            }
        }
    }

    /// Handle of a named database, creating it if absent
    pub(crate) fn open_db(&mut self, name: Option<&str>) -> Result<u32> {
        self.write_state()?;
        let name = match name {
            None => return Ok(MAIN_DBI),
            Some(name) => name,
        };
        if let Some(dbi) = self.env.lookup_dbi(name) {
            if let Mode::ReadWrite(w) = &self.mode {
                if w.named.contains_key(&dbi) {
                    return Ok(dbi);
                }
            }
        }
        if self.find_record(name)?.is_some() {
            return self.env.register_dbi(name);
        }

        let env = self.env;
        let dbi = env.register_dbi(name)?;
        let w = self.write_state()?;
        if !w.created.contains(&dbi) {
            w.created.push(dbi);
        }
        // The record goes in now so plain writes to the name are refused
        let mut main = w.main_db;
        let record = DbInfo::empty().encode();
        let result = btree::put(env, w, &mut main, name.as_bytes(), &record, NodeFlags::SUBDATA);
        self.finish_write(MAIN_DBI, main, result)?;
        let w = self.write_state()?;
        w.named.insert(
            dbi,
            NamedDb {
                info: DbInfo::empty(),
                dirty: true,
            },
        );
        diag_debug!(self.env.sink(), "dbi", "created database {:?} as dbi {}", name, dbi);
        Ok(dbi)
    }

    /// Handle of an existing named database
    pub(crate) fn find_db(&self, name: Option<&str>) -> Result<u32> {
        let name = match name {
            None => {
                self.db_info(MAIN_DBI)?;
                return Ok(MAIN_DBI);
            }
            Some(name) => name,
        };
        if let Some(dbi) = self.env.lookup_dbi(name) {
            if let Mode::ReadWrite(w) = &self.mode {
                if w.named.contains_key(&dbi) {
                    return Ok(dbi);
                }
            }
        }
        match self.find_record(name)? {
            Some(_) => self.env.register_dbi(name),
            None => Err(Error::NotFound),
        }
    }

    /// Committed record for a named database in the main database
    fn find_record(&self, name: &str) -> Result<Option<DbInfo>> {
        if name.is_empty() || name.len() > MAX_KEY_SIZE {
            return Err(Error::BadValSize);
        }
        let main = self.db_info(MAIN_DBI)?;
        match btree::lookup(self, &main, name.as_bytes())? {
            Some(item) if item.flags.contains(NodeFlags::SUBDATA) => DbInfo::decode(item.data).map(Some),
            Some(_) => Err(Error::Incompatible),
            None => Ok(None),
        }
    }

    pub(crate) fn stat(&self, dbi: u32) -> Result<Stat> {
        Ok(self.db_info(dbi)?.stat())
    }

    pub(crate) fn get(&self, dbi: u32, key: &[u8]) -> Result<&[u8]> {
        check_key(key)?;
        let info = self.db_info(dbi)?;
        match btree::lookup(self, &info, key)? {
            Some(item) => Ok(item.data),
            None => Err(Error::NotFound),
        }
    }

    pub(crate) fn put(&mut self, dbi: u32, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        check_key(key)?;
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::BadValSize);
        }
        let mut info = self.db_info_for_write(dbi)?;
        if let Some(item) = btree::lookup(&*self, &info, key)? {
            if item.flags.contains(NodeFlags::SUBDATA) {
                return Err(Error::Incompatible);
            }
            if flags.contains(WriteFlags::NOOVERWRITE) {
                return Err(Error::KeyExist);
            }
        }
        if flags.contains(WriteFlags::APPEND) {
            if let Some(stack) = btree::last(&*self, &info)? {
                if key <= btree::entry(&*self, &stack)?.key {
                    return Err(Error::KeyExist);
                }
            }
        }

        let env = self.env;
        let w = self.write_state()?;
        let result = btree::put(env, w, &mut info, key, data, NodeFlags::empty());
        self.finish_write(dbi, info, result)
    }

    pub(crate) fn del(&mut self, dbi: u32, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut info = self.db_info_for_write(dbi)?;
        match btree::lookup(&*self, &info, key)? {
            None => return Err(Error::NotFound),
            Some(item) if item.flags.contains(NodeFlags::SUBDATA) => return Err(Error::Incompatible),
            Some(_) => {}
        }

        let env = self.env;
        let w = self.write_state()?;
        let result = btree::del(env, w, &mut info, key);
        self.finish_write(dbi, info, result)
    }
}

impl Pages for Transaction<'_> {
    fn page(&self, pgno: u64) -> Result<&[u8]> {
        match &self.mode {
            Mode::ReadOnly(r) if r.active => self.env.map_pages(pgno, 1),
            Mode::ReadWrite(w) => w.page(self.env, pgno),
            _ => Err(Error::BadTxn),
        }
    }

    fn run(&self, pgno: u64, count: usize) -> Result<&[u8]> {
        match &self.mode {
            Mode::ReadOnly(r) if r.active => self.env.map_pages(pgno, count),
            Mode::ReadWrite(w) => w.run(self.env, pgno, count),
            _ => Err(Error::BadTxn),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

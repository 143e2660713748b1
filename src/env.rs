use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use memmap2::{Mmap, MmapOptions};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::EnvConfig;
use crate::constants::{
    EnvFlags, CORE_DBS, DATA_FILE_NAME, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS,
    LOCK_FILE_NAME, LOCK_SUFFIX, MAX_DBS_LIMIT, META_PAGES, MIN_MAP_SIZE, PAGE_SIZE, P_INVALID,
    READER_IDLE, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH,
};
use crate::diag::{diag_debug, DiagnosticSink, LogSink};
use crate::error::{result_code, Error, Result};
use crate::meta::Meta;
use crate::readers::{pid_alive, ReaderTable};
use crate::transaction::Transaction;
use crate::types::{EnvInfo, ReaderInfo, Stat};

/// Library version as (major, minor, patch)
pub fn version() -> (u32, u32, u32) {
    (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Builder applying the environment setup steps in order.
///
/// Each setter validates its value; `open` creates or opens the files and
/// sweeps stale reader slots.
#[derive(Debug, Clone)]
pub struct EnvBuilder {
    max_dbs: u32,
    max_readers: u32,
    map_size: usize,
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for EnvBuilder {
    fn default() -> Self {
        EnvBuilder {
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            map_size: DEFAULT_MAP_SIZE,
            sink: Arc::new(LogSink),
        }
    }
}

impl EnvBuilder {
    /// Route the environment's diagnostics to `sink`
    pub fn set_sink(&mut self, sink: Arc<dyn DiagnosticSink>) -> &mut Self {
        self.sink = sink;
        self
    }

    /// Set the maximum number of named databases
    pub fn set_max_dbs(&mut self, max_dbs: u32) -> Result<&mut Self> {
        if max_dbs > MAX_DBS_LIMIT {
            return Err(Error::EnvInvalidConfig);
        }
        self.max_dbs = max_dbs;
        Ok(self)
    }

    /// Set the number of reader slots
    pub fn set_max_readers(&mut self, max_readers: u32) -> Result<&mut Self> {
        if max_readers == 0 {
            return Err(Error::EnvInvalidMaxReaders);
        }
        self.max_readers = max_readers;
        Ok(self)
    }

    /// Set the maximum size of the data file
    pub fn set_map_size(&mut self, map_size: usize) -> Result<&mut Self> {
        if map_size < MIN_MAP_SIZE {
            return Err(Error::EnvInvalidMapSize);
        }
        self.map_size = map_size;
        Ok(self)
    }

    /// Open the environment at `path`
    pub fn open<P: AsRef<Path>>(&self, path: P, flags: EnvFlags, mode: u32) -> Result<Environment> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::EnvInvalidPath);
        }
        let read_only = flags.contains(EnvFlags::RDONLY);

        let (data_path, lock_path) = if flags.contains(EnvFlags::NOSUBDIR) {
            let mut lock = path.as_os_str().to_owned();
            lock.push(LOCK_SUFFIX);
            (path.to_path_buf(), PathBuf::from(lock))
        } else {
            if !path.metadata()?.is_dir() {
                return Err(Error::EnvInvalidPath);
            }
            (path.join(DATA_FILE_NAME), path.join(LOCK_FILE_NAME))
        };

        let readers = ReaderTable::open(&lock_path, self.max_readers, mode, read_only)?;

        let file = if read_only {
            OpenOptions::new().read(true).open(&data_path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(mode)
                .open(&data_path)?
        };

        let mut file_len = file.metadata()?.len() as usize;
        if file_len == 0 {
            if read_only {
                return Err(Error::Invalid);
            }
            let meta = Meta::initial(self.map_size as u64);
            for pgno in 0..META_PAGES {
                file.write_all_at(&meta.encode_at(pgno), pgno * PAGE_SIZE as u64)?;
            }
            file.sync_all()?;
            file_len = META_PAGES as usize * PAGE_SIZE;
        }
        if file_len < META_PAGES as usize * PAGE_SIZE {
            return Err(Error::Invalid);
        }

        let map_len = self.map_size.max(file_len).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let map = unsafe { MmapOptions::new().len(map_len).map(&file)? };
        let meta = Meta::newest(&map[..PAGE_SIZE], &map[PAGE_SIZE..2 * PAGE_SIZE])?;
        if (meta.last_pgno as usize + 1) * PAGE_SIZE > file_len {
            return Err(Error::Corrupted);
        }

        let env = Environment {
            config: EnvConfig {
                path: path.to_path_buf(),
                max_dbs: self.max_dbs,
                max_readers: self.max_readers,
                map_size: self.map_size,
                file_mode: mode,
                use_tls: !flags.contains(EnvFlags::NOTLS),
                read_only,
            },
            flags,
            data_path,
            file,
            map,
            meta: RwLock::new(meta),
            readers: Mutex::new(readers),
            writer: Mutex::new(None),
            writer_cv: Condvar::new(),
            tls_readers: Mutex::new(HashSet::new()),
            dbs: RwLock::new(Vec::new()),
            sink: self.sink.clone(),
        };
        diag_debug!(
            env.sink(),
            "env",
            "opened {} at txnid {}, last page {}",
            env.data_path.display(),
            meta.txnid,
            meta.last_pgno
        );

        match env.reader_check() {
            Ok(0) => {}
            Ok(cleared) => env
                .sink()
                .warning(format_args!("reader_check: cleared {} stale reader slots", cleared)),
            Err(e) => env.sink().error(format_args!(
                "reader_check failed: {} ({})",
                e,
                e.code()
            )),
        }
        Ok(env)
    }
}

/// Clears the writer slot when the write transaction ends
#[derive(Debug)]
pub(crate) struct WriterGuard<'env> {
    env: &'env Environment,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.env.writer.lock() = None;
        self.env.writer_cv.notify_one();
    }
}

/// An open store: the data file, its map and the reader table
#[derive(Debug)]
pub struct Environment {
    /// Configuration captured at open
    config: EnvConfig,
    /// Open flags
    flags: EnvFlags,
    /// Data file location
    data_path: PathBuf,
    /// Data file
    file: File,
    /// Read-only map of the data file
    map: Mmap,
    /// Last committed meta
    meta: RwLock<Meta>,
    /// Reader slots in the lock file
    readers: Mutex<ReaderTable>,
    /// Thread running the write transaction, if any
    writer: Mutex<Option<ThreadId>>,
    writer_cv: Condvar,
    /// Threads holding a read transaction, when bound to threads
    tls_readers: Mutex<HashSet<ThreadId>>,
    /// Named databases by handle, starting at `CORE_DBS`
    dbs: RwLock<Vec<Option<Arc<str>>>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl Environment {
    /// Start configuring a new environment
    pub fn builder() -> EnvBuilder {
        EnvBuilder::default()
    }

    /// Run the setup steps for `config`, reporting the step that fails
    pub fn open_with_config(config: &EnvConfig, sink: Arc<dyn DiagnosticSink>) -> Result<Self> {
        let step_failed = |step: &str, e: Error| {
            sink.error(format_args!("environment {} failed: {} ({})", step, e, e.code()));
            e
        };
        let mut builder = Environment::builder();
        builder.set_sink(sink.clone());
        builder
            .set_max_dbs(config.max_dbs)
            .map_err(|e| step_failed("set_max_dbs", e))?;
        builder
            .set_max_readers(config.max_readers)
            .map_err(|e| step_failed("set_max_readers", e))?;
        builder
            .set_map_size(config.map_size)
            .map_err(|e| step_failed("set_map_size", e))?;
        builder
            .open(&config.path, config.env_flags(), config.file_mode)
            .map_err(|e| step_failed("open", e))
    }

    /// Begin a read-write transaction, nested under `parent` if given.
    ///
    /// Only one top-level write transaction runs at a time; other threads
    /// wait for it to finish. With thread binding the thread already holding
    /// it gets `BadTxn`. With `NOTLS` the caller must not begin a second one
    /// while it holds the first, since it would wait on itself forever.
    pub fn begin_txn<'p>(&'p self, parent: Option<&'p mut Transaction<'_>>) -> Result<Transaction<'p>> {
        Transaction::begin(self, parent, false)
    }

    /// Begin a read-only transaction, nested under `parent` if given
    pub fn begin_ro_txn<'p>(
        &'p self,
        parent: Option<&'p mut Transaction<'_>>,
    ) -> Result<Transaction<'p>> {
        Transaction::begin(self, parent, true)
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn flags(&self) -> EnvFlags {
        self.flags
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        &*self.sink
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub(crate) fn use_tls(&self) -> bool {
        self.config.use_tls
    }

    /// Environment information
    pub fn info(&self) -> EnvInfo {
        let meta = self.snapshot();
        let readers = self.readers.lock();
        EnvInfo {
            mapsize: self.map.len(),
            last_pgno: meta.last_pgno as usize,
            last_txnid: meta.txnid as usize,
            max_readers: readers.capacity() as u32,
            num_readers: readers.active() as u32,
        }
    }

    /// Statistics for the main database as of the last commit
    pub fn stat(&self) -> Stat {
        self.snapshot().main_db.stat()
    }

    /// Occupied reader slots
    pub fn reader_list(&self) -> Vec<ReaderInfo> {
        self.readers.lock().entries()
    }

    /// Clear reader slots left behind by dead processes
    pub fn reader_check(&self) -> Result<usize> {
        self.readers.lock().sweep(pid_alive)
    }

    /// Write a consistent copy of the last committed state into `path`
    pub fn copy<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dest = if self.flags.contains(EnvFlags::NOSUBDIR) {
            path.to_path_buf()
        } else {
            path.join(DATA_FILE_NAME)
        };

        let txn = self.begin_ro_txn(None)?;
        let meta = txn.snapshot();
        let out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(self.config.file_mode)
            .open(&dest)?;
        for pgno in 0..META_PAGES {
            out.write_all_at(&meta.encode_at(pgno), pgno * PAGE_SIZE as u64)?;
        }
        if meta.last_pgno >= META_PAGES {
            let data = self.map_pages(META_PAGES, (meta.last_pgno + 1 - META_PAGES) as usize)?;
            out.write_all_at(data, META_PAGES * PAGE_SIZE as u64)?;
        }
        out.sync_all()?;
        txn.abort();

        diag_debug!(self.sink(), "env", "copied txnid {} to {}", meta.txnid, dest.display());
        Ok(())
    }

    /// Last committed meta
    pub(crate) fn snapshot(&self) -> Meta {
        *self.meta.read()
    }

    /// Number of pages the map can hold
    pub(crate) fn map_page_limit(&self) -> u64 {
        (self.map.len() / PAGE_SIZE) as u64
    }

    /// `count` committed pages starting at `pgno`
    pub(crate) fn map_pages(&self, pgno: u64, count: usize) -> Result<&[u8]> {
        if pgno == P_INVALID {
            return Err(Error::PageNotFound);
        }
        let start = (pgno as usize)
            .checked_mul(PAGE_SIZE)
            .ok_or(Error::PageNotFound)?;
        let end = start + count * PAGE_SIZE;
        if end > self.map.len() {
            return Err(Error::PageNotFound);
        }
        Ok(&self.map[start..end])
    }

    /// Take the writer lock. Under `NOTLS` the owning thread is not
    /// recognized and a second call from it blocks.
    pub(crate) fn lock_writer(&self) -> Result<WriterGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.writer.lock();
        if self.use_tls() && *owner == Some(me) {
            return Err(Error::BadTxn);
        }
        while owner.is_some() {
            self.writer_cv.wait(&mut owner);
        }
        *owner = Some(me);
        Ok(WriterGuard { env: self })
    }

    /// Register the calling thread as a reader when transactions are thread bound
    pub(crate) fn bind_thread(&self, thread: ThreadId) -> Result<()> {
        if self.use_tls() && !self.tls_readers.lock().insert(thread) {
            return Err(Error::BadRslot);
        }
        Ok(())
    }

    pub(crate) fn unbind_thread(&self, thread: ThreadId) {
        if self.use_tls() {
            self.tls_readers.lock().remove(&thread);
        }
    }

    /// Claim a reader slot bound to the last committed snapshot
    pub(crate) fn acquire_reader(&self) -> Result<(usize, Meta)> {
        let mut readers = self.readers.lock();
        let slot = readers.acquire()?;
        let meta = self.snapshot();
        readers.set_txnid(slot, meta.txnid);
        Ok((slot, meta))
    }

    /// Rebind a parked reader slot to the last committed snapshot
    pub(crate) fn rebind_reader(&self, slot: usize) -> Meta {
        let mut readers = self.readers.lock();
        let meta = self.snapshot();
        readers.set_txnid(slot, meta.txnid);
        meta
    }

    pub(crate) fn park_reader(&self, slot: usize) {
        self.readers.lock().set_txnid(slot, READER_IDLE);
    }

    pub(crate) fn release_reader(&self, slot: usize) {
        self.readers.lock().release(slot);
    }

    /// Oldest snapshot held by any reader
    pub(crate) fn oldest_reader(&self) -> Option<u64> {
        self.readers.lock().oldest()
    }

    /// Write dirty pages and then the meta page, syncing after each step,
    /// and publish the meta as the new snapshot.
    pub(crate) fn write_commit<'a, I>(&self, pages: I, meta: &Meta) -> Result<()>
    where
        I: IntoIterator<Item = (u64, &'a [u8])>,
    {
        let needed = (meta.last_pgno + 1) * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < needed {
            self.file.set_len(needed)?;
        }
        for (pgno, buf) in pages {
            self.file.write_all_at(buf, pgno * PAGE_SIZE as u64)?;
        }
        self.file.sync_data()?;

        let slot = Meta::slot(meta.txnid);
        self.file
            .write_all_at(&meta.encode(), slot * PAGE_SIZE as u64)
            .map_err(|_| Error::Panic)?;
        self.file.sync_data().map_err(|_| Error::Panic)?;

        *self.meta.write() = *meta;
        Ok(())
    }

    /// Handle for a named database, registering the name if needed.
    ///
    /// Slots freed by `release_dbi` are handed out again.
    pub(crate) fn register_dbi(&self, name: &str) -> Result<u32> {
        if let Some(dbi) = self.lookup_dbi(name) {
            return Ok(dbi);
        }
        let mut dbs = self.dbs.write();
        if let Some(i) = dbs.iter().position(|n| n.as_deref() == Some(name)) {
            return Ok(CORE_DBS + i as u32);
        }
        if dbs.iter().flatten().count() >= self.config.max_dbs as usize {
            return Err(Error::DbsFull);
        }
        let idx = match dbs.iter().position(Option::is_none) {
            Some(idx) => {
                dbs[idx] = Some(Arc::from(name));
                idx
            }
            None => {
                dbs.push(Some(Arc::from(name)));
                dbs.len() - 1
            }
        };
        Ok(CORE_DBS + idx as u32)
    }

    /// Forget a handle whose database was never committed
    pub(crate) fn release_dbi(&self, dbi: u32) {
        let Some(idx) = dbi.checked_sub(CORE_DBS) else {
            return;
        };
        if let Some(slot) = self.dbs.write().get_mut(idx as usize) {
            *slot = None;
        }
        diag_debug!(self.sink(), "dbi", "released dbi {}", dbi);
    }

    pub(crate) fn lookup_dbi(&self, name: &str) -> Option<u32> {
        self.dbs
            .read()
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|i| CORE_DBS + i as u32)
    }

    pub(crate) fn dbi_name(&self, dbi: u32) -> Result<Arc<str>> {
        let idx = dbi.checked_sub(CORE_DBS).ok_or(Error::BadDbi)? as usize;
        self.dbs.read().get(idx).cloned().flatten().ok_or(Error::BadDbi)
    }
}

static GLOBAL: OnceCell<(EnvConfig, Result<Environment>)> = OnceCell::new();

/// Initialize the process-wide environment, logging through the `log` crate.
///
/// Only the first call does any work. Every later call, whatever its
/// configuration, returns the outcome of the first one; a differing
/// configuration is reported as a warning.
pub fn initialize(config: EnvConfig) -> Result<&'static Environment> {
    initialize_with_sink(config, Arc::new(LogSink))
}

/// Initialize the process-wide environment with a chosen diagnostic sink
pub fn initialize_with_sink(
    config: EnvConfig,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<&'static Environment> {
    let mut ran = false;
    let (first, result) = GLOBAL.get_or_init(|| {
        ran = true;
        let result = Environment::open_with_config(&config, sink.clone());
        sink.note(format_args!(
            "environment init exit: use_tls={}, rc={}",
            config.use_tls,
            result_code(&result)
        ));
        (config.clone(), result)
    });
    if !ran && *first != config {
        sink.warning(format_args!(
            "environment already initialized from {}; ignoring new configuration for {}",
            first.path.display(),
            config.path.display()
        ));
    }
    result.as_ref().map_err(|e| *e)
}

/// The process-wide environment
pub fn global() -> Result<&'static Environment> {
    match GLOBAL.get() {
        Some((_, result)) => result.as_ref().map_err(|e| *e),
        None => Err(Error::EnvNotInitialized),
    }
}

/// Configuration the process-wide environment was initialized with
pub fn global_config() -> Option<&'static EnvConfig> {
    GLOBAL.get().map(|(config, _)| config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::tests::RecordingSink;
    use tempfile::TempDir;

    #[test]
    fn test_builder_validates_each_step() {
        let mut builder = Environment::builder();
        assert_eq!(builder.set_max_dbs(MAX_DBS_LIMIT + 1).err(), Some(Error::EnvInvalidConfig));
        assert_eq!(builder.set_max_readers(0).err(), Some(Error::EnvInvalidMaxReaders));
        assert_eq!(builder.set_map_size(PAGE_SIZE).err(), Some(Error::EnvInvalidMapSize));
        assert!(builder.set_map_size(MIN_MAP_SIZE).is_ok());
    }

    #[test]
    fn test_failed_step_is_reported() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let config = EnvConfig::new(dir.path()).max_readers(0);
        let result = Environment::open_with_config(&config, sink.clone());
        assert_eq!(result.err(), Some(Error::EnvInvalidMaxReaders));
        assert_eq!(sink.count("ERROR"), 1);
        assert!(sink.lines.lock()[0].contains("set_max_readers"));
    }

    #[test]
    fn test_open_creates_files_and_meta() {
        let dir = TempDir::new().unwrap();
        let env = Environment::builder()
            .open(dir.path(), EnvFlags::empty(), 0o600)
            .unwrap();
        assert!(dir.path().join(DATA_FILE_NAME).exists());
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
        let info = env.info();
        assert_eq!(info.last_txnid, 0);
        assert_eq!(info.last_pgno, 1);
        assert_eq!(info.mapsize, DEFAULT_MAP_SIZE);
        assert_eq!(env.map_pages(P_INVALID, 1).err(), Some(Error::PageNotFound));
        assert_eq!(env.stat().entries, 0);
    }

    #[test]
    fn test_nosubdir_uses_suffixed_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let env = Environment::builder()
            .open(&path, EnvFlags::NOSUBDIR, 0o644)
            .unwrap();
        assert!(path.exists());
        assert!(dir.path().join("store-lock").exists());
        assert_eq!(env.path(), path.as_path());
    }

    #[test]
    fn test_read_only_open_of_missing_store_fails() {
        let dir = TempDir::new().unwrap();
        let result = Environment::builder().open(dir.path(), EnvFlags::RDONLY, 0o644);
        assert!(matches!(result, Err(Error::Io(_)) | Err(Error::Invalid)));
    }

    #[test]
    fn test_garbage_data_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DATA_FILE_NAME), vec![7u8; 3 * PAGE_SIZE]).unwrap();
        let result = Environment::builder().open(dir.path(), EnvFlags::empty(), 0o644);
        assert_eq!(result.err(), Some(Error::Invalid));
    }

    #[test]
    fn test_dbi_registry_limits() {
        let dir = TempDir::new().unwrap();
        let env = Environment::builder()
            .set_max_dbs(1)
            .unwrap()
            .open(dir.path(), EnvFlags::empty(), 0o644)
            .unwrap();
        let a = env.register_dbi("a").unwrap();
        assert_eq!(a, CORE_DBS);
        assert_eq!(env.register_dbi("a").unwrap(), a);
        assert_eq!(env.register_dbi("b"), Err(Error::DbsFull));
        assert_eq!(&*env.dbi_name(a).unwrap(), "a");
        assert_eq!(env.dbi_name(CORE_DBS + 5), Err(Error::BadDbi));

        env.release_dbi(a);
        assert_eq!(env.lookup_dbi("a"), None);
        assert_eq!(env.dbi_name(a), Err(Error::BadDbi));
        assert_eq!(env.register_dbi("b").unwrap(), a);
    }

    #[test]
    fn test_open_clears_stale_reader_slots() {
        let dir = TempDir::new().unwrap();
        {
            let lock_path = dir.path().join(LOCK_FILE_NAME);
            let mut table = ReaderTable::open(&lock_path, DEFAULT_MAX_READERS, 0o644, false).unwrap();
            // Left behind as if its owner had crashed
            table.occupy(4_000_004, 3);
        }

        let sink = Arc::new(RecordingSink::default());
        let env = Environment::builder()
            .set_sink(sink.clone())
            .open(dir.path(), EnvFlags::empty(), 0o644)
            .unwrap();
        assert_eq!(sink.count("WARNING"), 1);
        assert_eq!(sink.count("ERROR"), 0);
        assert!(sink
            .lines
            .lock()
            .iter()
            .any(|line| line.contains("cleared 1 stale reader slots")));
        assert!(env.reader_list().is_empty());
    }
}

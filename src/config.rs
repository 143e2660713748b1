use std::path::{Path, PathBuf};

use crate::constants::{
    EnvFlags, DEFAULT_FILE_MODE, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS,
};

/// Environment configuration.
///
/// Captured once when the environment is opened and never changed afterwards.
/// The process-wide environment compares later `initialize` calls against the
/// value it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// Environment directory (or data file with `NOSUBDIR`)
    pub path: PathBuf,
    /// Maximum number of named databases
    pub max_dbs: u32,
    /// Maximum number of concurrent read transactions
    pub max_readers: u32,
    /// Maximum size of the data file in bytes
    pub map_size: usize,
    /// Permission bits for newly created files
    pub file_mode: u32,
    /// Bind read transactions to the creating thread
    pub use_tls: bool,
    /// Open without write access
    pub read_only: bool,
}

impl EnvConfig {
    /// Configuration with default limits for `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        EnvConfig {
            path: path.as_ref().to_path_buf(),
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            map_size: DEFAULT_MAP_SIZE,
            file_mode: DEFAULT_FILE_MODE,
            use_tls: true,
            read_only: false,
        }
    }

    pub fn max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    pub fn max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Open flags derived from the thread binding and access mode
    pub fn env_flags(&self) -> EnvFlags {
        let mut flags = EnvFlags::empty();
        if !self.use_tls {
            flags |= EnvFlags::NOTLS;
        }
        if self.read_only {
            flags |= EnvFlags::RDONLY;
        }
        flags
    }
}

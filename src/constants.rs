use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvFlags: u32 {
        /// The environment path is the data file itself, not a directory
        const NOSUBDIR = 0x4000;
        /// Open the environment read-only
        const RDONLY = 0x20000;
        /// Do not bind read transactions to threads
        const NOTLS = 0x200000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        /// Fail with `KeyExist` if the key is already present
        const NOOVERWRITE = 0x10;
        /// Accepted for LMDB compatibility; no-op without duplicate support
        const NODUPDATA = 0x20;
        /// Replace the item at the cursor position
        const CURRENT = 0x40;
        /// Key sorts after every existing key
        const APPEND = 0x20000;
    }
}

// Page flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u16 {
        const BRANCH = 0x01;
        const LEAF = 0x02;
        const OVERFLOW = 0x04;
        const META = 0x08;
    }
}

// Internal node flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u16 {
        /// Data lives on overflow pages
        const BIGDATA = 0x01;
        /// Data is a named database record
        const SUBDATA = 0x02;
    }
}

// Page and version constants
pub const PAGE_SIZE: usize = 4096;
/// Magic number for data files
pub const MDB_MAGIC: u32 = 0xBEEF_C0DE;
/// Magic number for lock files
pub const LOCK_MAGIC: u32 = 0xBEEF_10CC;
/// Version numbers major
pub const VERSION_MAJOR: u32 = 0;
/// Version numbers minor
pub const VERSION_MINOR: u32 = 9;
/// Version numbers patch
pub const VERSION_PATCH: u32 = 70;
/// On-disk format version stored in meta pages
pub const DATA_VERSION: u32 = 1;
/// Lock file format version
pub const LOCK_VERSION: u32 = 1;

/// Internal constants
pub const META_PAGES: u64 = 2;
/// Page number marking an empty tree
pub const P_INVALID: u64 = u64::MAX;
/// Free page database
pub const FREE_DBI: u32 = 0;
/// Unnamed main database
pub const MAIN_DBI: u32 = 1;
/// Core database identifiers reserved by the store
pub const CORE_DBS: u32 = 2;

/// Size of the page header
pub const PAGE_HDR: usize = 16;
/// Size of a node header
pub const NODE_HDR: usize = 8;
/// Largest key accepted
pub const MAX_KEY_SIZE: usize = 511;
/// Largest node stored inline on a leaf page
pub const NODE_MAX: usize = (PAGE_SIZE - PAGE_HDR) / 2 - 2;
/// Largest value accepted
pub const MAX_DATA_SIZE: usize = u32::MAX as usize;
/// Dirty pages a single transaction may hold
pub const MAX_DIRTY_PAGES: usize = (1 << 17) - 1;

/// Default limits
pub const DEFAULT_MAX_DBS: u32 = 0;
pub const DEFAULT_MAX_READERS: u32 = 126;
pub const DEFAULT_MAP_SIZE: usize = 1 << 20;
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Smallest map the environment accepts
pub const MIN_MAP_SIZE: usize = 16 * PAGE_SIZE;
/// Upper bound on named databases
pub const MAX_DBS_LIMIT: u32 = 32767;

/// Reader slot txnid marking a slot with no snapshot bound
pub const READER_IDLE: u64 = u64::MAX;

/// File names inside the environment directory
pub const DATA_FILE_NAME: &str = "data.mdb";
pub const LOCK_FILE_NAME: &str = "lock.mdb";
pub const LOCK_SUFFIX: &str = "-lock";

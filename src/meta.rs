use crate::constants::{
    PageFlags, DATA_VERSION, MDB_MAGIC, META_PAGES, PAGE_HDR, PAGE_SIZE, P_INVALID,
};
use crate::error::{Error, Result};
use crate::page::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::types::Stat;

/// Encoded size of a [`DbInfo`]
pub(crate) const DB_INFO_SIZE: usize = 48;

/// Per-database record, stored in the meta page for the free and main
/// databases and as the value of a named database's record in main.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DbInfo {
    /// Database flags (reserved)
    pub(crate) flags: u16,
    /// Depth of the B-tree
    pub(crate) depth: u16,
    /// Number of branch pages
    pub(crate) branch_pages: u64,
    /// Number of leaf pages
    pub(crate) leaf_pages: u64,
    /// Number of overflow pages
    pub(crate) overflow_pages: u64,
    /// Number of data entries
    pub(crate) entries: u64,
    /// Root page number
    pub(crate) root: u64,
}

impl DbInfo {
    pub(crate) fn empty() -> Self {
        DbInfo {
            flags: 0,
            depth: 0,
            branch_pages: 0,
            leaf_pages: 0,
            overflow_pages: 0,
            entries: 0,
            root: P_INVALID,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root == P_INVALID
    }

    pub(crate) fn encode(&self) -> [u8; DB_INFO_SIZE] {
        let mut buf = [0u8; DB_INFO_SIZE];
        write_u16(&mut buf, 0, self.flags);
        write_u16(&mut buf, 2, self.depth);
        write_u64(&mut buf, 8, self.branch_pages);
        write_u64(&mut buf, 16, self.leaf_pages);
        write_u64(&mut buf, 24, self.overflow_pages);
        write_u64(&mut buf, 32, self.entries);
        write_u64(&mut buf, 40, self.root);
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != DB_INFO_SIZE {
            return Err(Error::Incompatible);
        }
        Ok(DbInfo {
            flags: read_u16(buf, 0),
            depth: read_u16(buf, 2),
            branch_pages: read_u64(buf, 8),
            leaf_pages: read_u64(buf, 16),
            overflow_pages: read_u64(buf, 24),
            entries: read_u64(buf, 32),
            root: read_u64(buf, 40),
        })
    }

    pub(crate) fn stat(&self) -> Stat {
        Stat {
            psize: PAGE_SIZE as u32,
            depth: self.depth as u32,
            branch_pages: self.branch_pages as usize,
            leaf_pages: self.leaf_pages as usize,
            overflow_pages: self.overflow_pages as usize,
            entries: self.entries as usize,
        }
    }
}

const OFF_MAGIC: usize = PAGE_HDR;
const OFF_VERSION: usize = PAGE_HDR + 4;
const OFF_PSIZE: usize = PAGE_HDR + 8;
const OFF_MAP_SIZE: usize = PAGE_HDR + 16;
const OFF_FREE_DB: usize = PAGE_HDR + 24;
const OFF_MAIN_DB: usize = OFF_FREE_DB + DB_INFO_SIZE;
const OFF_LAST_PGNO: usize = OFF_MAIN_DB + DB_INFO_SIZE;
const OFF_TXNID: usize = OFF_LAST_PGNO + 8;
const OFF_CHECKSUM: usize = OFF_TXNID + 8;

/// Committed state of the environment, as recorded in a meta page.
///
/// Read transactions hold a copy of the meta that was current when they
/// began; it is their snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Meta {
    /// Size of the memory map when committed
    pub(crate) map_size: u64,
    /// Free page database
    pub(crate) free_db: DbInfo,
    /// Main database
    pub(crate) main_db: DbInfo,
    /// Last used page in the data file
    pub(crate) last_pgno: u64,
    /// Transaction that committed this meta
    pub(crate) txnid: u64,
}

impl Meta {
    /// State of a freshly created data file
    pub(crate) fn initial(map_size: u64) -> Self {
        Meta {
            map_size,
            free_db: DbInfo::empty(),
            main_db: DbInfo::empty(),
            last_pgno: META_PAGES - 1,
            txnid: 0,
        }
    }

    /// Meta page slot this txnid is written to
    pub(crate) fn slot(txnid: u64) -> u64 {
        txnid % META_PAGES
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        self.encode_at(Self::slot(self.txnid))
    }

    /// Encode as meta page `pgno` regardless of the txnid's slot
    pub(crate) fn encode_at(&self, pgno: u64) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        write_u64(&mut page, 0, pgno);
        write_u16(&mut page, 8, PageFlags::META.bits());
        write_u32(&mut page, OFF_MAGIC, MDB_MAGIC);
        write_u32(&mut page, OFF_VERSION, DATA_VERSION);
        write_u32(&mut page, OFF_PSIZE, PAGE_SIZE as u32);
        write_u64(&mut page, OFF_MAP_SIZE, self.map_size);
        page[OFF_FREE_DB..OFF_MAIN_DB].copy_from_slice(&self.free_db.encode());
        page[OFF_MAIN_DB..OFF_LAST_PGNO].copy_from_slice(&self.main_db.encode());
        write_u64(&mut page, OFF_LAST_PGNO, self.last_pgno);
        write_u64(&mut page, OFF_TXNID, self.txnid);
        let crc = crc32fast::hash(&page[OFF_MAGIC..OFF_CHECKSUM]);
        write_u32(&mut page, OFF_CHECKSUM, crc);
        page
    }

    pub(crate) fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < OFF_CHECKSUM + 4 || read_u32(page, OFF_MAGIC) != MDB_MAGIC {
            return Err(Error::Invalid);
        }
        if read_u32(page, OFF_VERSION) != DATA_VERSION {
            return Err(Error::VersionMismatch);
        }
        if read_u32(page, OFF_CHECKSUM) != crc32fast::hash(&page[OFF_MAGIC..OFF_CHECKSUM]) {
            return Err(Error::Invalid);
        }
        if read_u32(page, OFF_PSIZE) as usize != PAGE_SIZE {
            return Err(Error::Incompatible);
        }
        Ok(Meta {
            map_size: read_u64(page, OFF_MAP_SIZE),
            free_db: DbInfo::decode(&page[OFF_FREE_DB..OFF_MAIN_DB])?,
            main_db: DbInfo::decode(&page[OFF_MAIN_DB..OFF_LAST_PGNO])?,
            last_pgno: read_u64(page, OFF_LAST_PGNO),
            txnid: read_u64(page, OFF_TXNID),
        })
    }

    /// Pick the newest valid meta out of the two meta pages
    pub(crate) fn newest(first: &[u8], second: &[u8]) -> Result<Self> {
        match (Meta::decode(first), Meta::decode(second)) {
            (Ok(a), Ok(b)) => Ok(if b.txnid > a.txnid { b } else { a }),
            (Ok(a), Err(_)) => Ok(a),
            (Err(_), Ok(b)) => Ok(b),
            // Report the more specific failure
            (Err(Error::Invalid), Err(e)) | (Err(e), Err(_)) => Err(e),
        }
    }
}

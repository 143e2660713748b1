use crate::constants::WriteFlags;
use crate::cursor::{Cursor, RwCursor};
use crate::error::Result;
use crate::transaction::Transaction;
use crate::types::Stat;

/// Database handle.
///
/// Handles are plain identifiers registered with the environment; once
/// obtained they stay valid in every later transaction of that environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Database {
    dbi: u32,
}

impl Database {
    /// Open a database, creating it if absent. `None` names the main
    /// database. Requires a write transaction.
    pub fn open(txn: &mut Transaction<'_>, name: Option<&str>) -> Result<Self> {
        Ok(Database {
            dbi: txn.open_db(name)?,
        })
    }

    /// Open an existing database. Fails with `NotFound` if it does not exist.
    pub fn open_readonly(txn: &Transaction<'_>, name: Option<&str>) -> Result<Self> {
        Ok(Database {
            dbi: txn.find_db(name)?,
        })
    }

    /// Database identifier
    pub fn dbi(&self) -> u32 {
        self.dbi
    }

    /// Get statistics
    pub fn stat(&self, txn: &Transaction<'_>) -> Result<Stat> {
        txn.stat(self.dbi)
    }

    /// Get the value stored under `key`. The value borrows from the
    /// transaction.
    pub fn get<'t>(&self, txn: &'t Transaction<'_>, key: &[u8]) -> Result<&'t [u8]> {
        txn.get(self.dbi, key)
    }

    /// Store a key/value pair
    pub fn put(&self, txn: &mut Transaction<'_>, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        txn.put(self.dbi, key, data, flags)
    }

    /// Delete `key`. Fails with `NotFound` if it is absent.
    pub fn del(&self, txn: &mut Transaction<'_>, key: &[u8]) -> Result<()> {
        txn.del(self.dbi, key)
    }

    /// Open a read cursor
    pub fn cursor<'t>(&self, txn: &'t Transaction<'_>) -> Result<Cursor<'t>> {
        Cursor::new(txn, self.dbi)
    }

    /// Open a cursor that can write through its position
    pub fn rw_cursor<'t, 'env>(&self, txn: &'t mut Transaction<'env>) -> Result<RwCursor<'t, 'env>> {
        RwCursor::new(txn, self.dbi)
    }
}

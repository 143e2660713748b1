use crate::btree::{self, Entry, Pages, Stack};
use crate::constants::WriteFlags;
use crate::error::{Error, Result};
use crate::meta::DbInfo;
use crate::transaction::Transaction;
use crate::types::CursorOp;

/// Where a cursor points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Freshly opened, never positioned
    Unset,
    /// At the item on top of the stack
    At,
    /// Moved past the last item
    AfterLast,
    /// Moved before the first item
    BeforeFirst,
}

/// Position tracking shared by read and write cursors
#[derive(Debug)]
struct CursorState {
    dbi: u32,
    stack: Stack,
    pos: Position,
    /// The item under the cursor was deleted; the stack already points at
    /// its successor, which `Next` must not skip.
    after_delete: bool,
}

impl CursorState {
    fn new(dbi: u32) -> Self {
        CursorState {
            dbi,
            stack: Stack::new(),
            pos: Position::Unset,
            after_delete: false,
        }
    }

    fn place(&mut self, stack: Option<Stack>, miss: Position) -> bool {
        match stack {
            Some(stack) => {
                self.stack = stack;
                self.pos = Position::At;
                true
            }
            None => {
                self.pos = miss;
                false
            }
        }
    }

    fn current<'a, P: Pages + ?Sized>(&self, pages: &'a P) -> Result<Entry<'a>> {
        match self.pos {
            Position::At => btree::entry(pages, &self.stack),
            Position::Unset => Err(Error::invalid_argument()),
            Position::AfterLast | Position::BeforeFirst => Err(Error::NotFound),
        }
    }

    fn get<'a, P: Pages + ?Sized>(
        &mut self,
        pages: &'a P,
        info: &DbInfo,
        key: Option<&[u8]>,
        op: CursorOp,
    ) -> Result<Entry<'a>> {
        if op.needs_key() && key.is_none() {
            return Err(Error::invalid_argument());
        }
        let after_delete = std::mem::take(&mut self.after_delete);
        let found = match op {
            CursorOp::First => {
                let stack = btree::first(pages, info)?;
                self.place(stack, Position::AfterLast)
            }
            CursorOp::Last => {
                let stack = btree::last(pages, info)?;
                self.place(stack, Position::BeforeFirst)
            }
            CursorOp::Next => match self.pos {
                Position::Unset | Position::BeforeFirst => {
                    let stack = btree::first(pages, info)?;
                    self.place(stack, Position::AfterLast)
                }
                Position::At if after_delete => true,
                Position::At => {
                    if !btree::next(pages, &mut self.stack)? {
                        self.pos = Position::AfterLast;
                    }
                    self.pos == Position::At
                }
                Position::AfterLast => false,
            },
            CursorOp::Prev => match self.pos {
                Position::Unset | Position::AfterLast => {
                    let stack = btree::last(pages, info)?;
                    self.place(stack, Position::BeforeFirst)
                }
                Position::At => {
                    if !btree::prev(pages, &mut self.stack)? {
                        self.pos = Position::BeforeFirst;
                    }
                    self.pos == Position::At
                }
                Position::BeforeFirst => false,
            },
            CursorOp::GetCurrent => {
                self.after_delete = after_delete;
                true
            }
            CursorOp::Set | CursorOp::SetKey | CursorOp::SetRange => {
                let key = key.unwrap_or_default();
                if key.is_empty() {
                    return Err(Error::BadValSize);
                }
                match btree::seek(pages, info, key)? {
                    Some((stack, exact)) if exact || op == CursorOp::SetRange => {
                        self.place(Some(stack), Position::AfterLast)
                    }
                    None if op == CursorOp::SetRange => self.place(None, Position::AfterLast),
                    // A failed exact search keeps the old position
                    _ => {
                        self.after_delete = after_delete;
                        return Err(Error::NotFound);
                    }
                }
            }
        };
        if !found {
            return Err(Error::NotFound);
        }
        self.current(pages)
    }

    /// Point at `key` or, if it is gone, at its successor
    fn reseek<P: Pages + ?Sized>(&mut self, pages: &P, info: &DbInfo, key: &[u8]) -> Result<()> {
        match btree::seek(pages, info, key)? {
            Some((stack, exact)) => {
                self.stack = stack;
                self.pos = Position::At;
                self.after_delete = !exact;
            }
            None => {
                self.stack.clear();
                self.pos = Position::AfterLast;
                self.after_delete = false;
            }
        }
        Ok(())
    }
}

fn pair(entry: Entry<'_>) -> (&[u8], &[u8]) {
    (entry.key, entry.data)
}

/// Read cursor over one database.
///
/// The cursor borrows its transaction, so it cannot outlive it. Returned
/// keys and values live as long as the transaction.
#[derive(Debug)]
pub struct Cursor<'txn> {
    txn: &'txn Transaction<'txn>,
    info: DbInfo,
    state: CursorState,
}

impl<'txn> Cursor<'txn> {
    pub(crate) fn new(txn: &'txn Transaction<'txn>, dbi: u32) -> Result<Self> {
        Ok(Cursor {
            txn,
            info: txn.db_info(dbi)?,
            state: CursorState::new(dbi),
        })
    }

    pub fn dbi(&self) -> u32 {
        self.state.dbi
    }

    /// Position the cursor with `op` and return the item there.
    ///
    /// `key` is required by `Set`, `SetKey` and `SetRange` and ignored
    /// otherwise. Moving off either end yields `NotFound`.
    pub fn get(&mut self, key: Option<&[u8]>, op: CursorOp) -> Result<(&'txn [u8], &'txn [u8])> {
        let txn = self.txn;
        self.state.get(txn, &self.info, key, op).map(pair)
    }

    pub fn first(&mut self) -> Result<(&'txn [u8], &'txn [u8])> {
        self.get(None, CursorOp::First)
    }

    pub fn last(&mut self) -> Result<(&'txn [u8], &'txn [u8])> {
        self.get(None, CursorOp::Last)
    }

    pub fn next(&mut self) -> Result<(&'txn [u8], &'txn [u8])> {
        self.get(None, CursorOp::Next)
    }

    pub fn prev(&mut self) -> Result<(&'txn [u8], &'txn [u8])> {
        self.get(None, CursorOp::Prev)
    }

    pub fn set_range(&mut self, key: &[u8]) -> Result<(&'txn [u8], &'txn [u8])> {
        self.get(Some(key), CursorOp::SetRange)
    }

    /// Iterate over every item from the first
    pub fn iter(&mut self) -> Iter<'_, 'txn> {
        Iter {
            cursor: self,
            start: None,
            end: None,
            started: false,
            finished: false,
        }
    }

    /// Iterate over items with `start <= key <= end`
    pub fn iter_range<'a>(&'a mut self, start: &'a [u8], end: &'a [u8]) -> Iter<'a, 'txn> {
        Iter {
            cursor: self,
            start: Some(start),
            end: Some(end),
            started: false,
            finished: false,
        }
    }

    /// Release the cursor
    pub fn close(self) {}
}

/// Iterator over a cursor's items in key order
#[derive(Debug)]
pub struct Iter<'a, 'txn> {
    cursor: &'a mut Cursor<'txn>,
    start: Option<&'a [u8]>,
    end: Option<&'a [u8]>,
    started: bool,
    finished: bool,
}

impl<'txn> Iterator for Iter<'_, 'txn> {
    type Item = Result<(&'txn [u8], &'txn [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let step = if self.started {
            self.cursor.next()
        } else {
            self.started = true;
            match self.start {
                Some(start) => self.cursor.set_range(start),
                None => self.cursor.first(),
            }
        };
        match step {
            Ok((key, _)) if self.end.is_some_and(|end| key > end) => {
                self.finished = true;
                None
            }
            Ok(item) => Some(Ok(item)),
            Err(Error::NotFound) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Cursor that can also write at its position.
///
/// It holds the write transaction mutably, so no other access to the
/// transaction is possible while it is open.
#[derive(Debug)]
pub struct RwCursor<'txn, 'env> {
    txn: &'txn mut Transaction<'env>,
    state: CursorState,
}

impl<'txn, 'env> RwCursor<'txn, 'env> {
    pub(crate) fn new(txn: &'txn mut Transaction<'env>, dbi: u32) -> Result<Self> {
        if txn.is_readonly() {
            return Err(Error::TxnReadOnly);
        }
        txn.db_info(dbi)?;
        Ok(RwCursor {
            txn,
            state: CursorState::new(dbi),
        })
    }

    pub fn dbi(&self) -> u32 {
        self.state.dbi
    }

    /// Position the cursor with `op` and return the item there
    pub fn get(&mut self, key: Option<&[u8]>, op: CursorOp) -> Result<(&[u8], &[u8])> {
        let info = self.txn.db_info(self.state.dbi)?;
        self.state.get(&*self.txn, &info, key, op).map(pair)
    }

    /// Store an item and leave the cursor on it.
    ///
    /// With `CURRENT` the key must equal the one under the cursor and its
    /// value is replaced.
    pub fn put(&mut self, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let dbi = self.state.dbi;
        if flags.contains(WriteFlags::CURRENT) {
            let current = self.state.current(&*self.txn)?;
            if current.key != key {
                return Err(Error::invalid_argument());
            }
        }
        self.txn.put(dbi, key, data, flags - WriteFlags::CURRENT)?;
        let info = self.txn.db_info(dbi)?;
        self.state.reseek(&*self.txn, &info, key)
    }

    /// Delete the item under the cursor. The cursor moves to the following
    /// item, which the next `Next` returns.
    pub fn del(&mut self, flags: WriteFlags) -> Result<()> {
        if !(flags - WriteFlags::NODUPDATA).is_empty() {
            return Err(Error::invalid_argument());
        }
        let dbi = self.state.dbi;
        let key = self.state.current(&*self.txn)?.key.to_vec();
        self.txn.del(dbi, &key)?;
        let info = self.txn.db_info(dbi)?;
        self.state.reseek(&*self.txn, &info, &key)
    }

    /// Release the cursor, giving the transaction back
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EnvFlags, MAIN_DBI};
    use crate::env::Environment;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Environment) {
        let dir = TempDir::new().unwrap();
        let env = Environment::builder()
            .open(dir.path(), EnvFlags::empty(), 0o644)
            .unwrap();
        (dir, env)
    }

    #[test]
    fn test_unset_cursor_has_no_current_item() {
        let (_dir, env) = setup();
        let txn = env.begin_ro_txn(None).unwrap();
        let mut cursor = Cursor::new(&txn, MAIN_DBI).unwrap();
        assert_eq!(cursor.get(None, CursorOp::GetCurrent), Err(Error::invalid_argument()));
        assert_eq!(cursor.get(None, CursorOp::Set), Err(Error::invalid_argument()));
        assert_eq!(cursor.first(), Err(Error::NotFound));
        assert_eq!(cursor.get(None, CursorOp::GetCurrent), Err(Error::NotFound));
    }

    #[test]
    fn test_delete_then_next_returns_successor() {
        let (_dir, env) = setup();
        let mut txn = env.begin_txn(None).unwrap();
        for k in [b"a", b"b", b"c"] {
            txn.put(MAIN_DBI, k, k, WriteFlags::empty()).unwrap();
        }
        let mut cursor = RwCursor::new(&mut txn, MAIN_DBI).unwrap();
        assert_eq!(cursor.get(Some(&b"b"[..]), CursorOp::Set).unwrap().0, b"b");
        cursor.del(WriteFlags::empty()).unwrap();
        assert_eq!(cursor.get(None, CursorOp::Next).unwrap().0, b"c");
        assert_eq!(cursor.get(None, CursorOp::Prev).unwrap().0, b"a");

        assert_eq!(cursor.del(WriteFlags::APPEND), Err(Error::invalid_argument()));
        assert_eq!(cursor.get(None, CursorOp::Last).unwrap().0, b"c");
        cursor.del(WriteFlags::NODUPDATA).unwrap();
        assert_eq!(cursor.get(None, CursorOp::Next), Err(Error::NotFound));
        assert_eq!(cursor.get(None, CursorOp::Prev).unwrap().0, b"a");
    }
}

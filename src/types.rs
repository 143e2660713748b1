/// Cursor positioning operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    /// Position at the first key
    First,
    /// Return the key/data at the current position
    GetCurrent,
    /// Position at the last key
    Last,
    /// Position at the next key
    Next,
    /// Position at the previous key
    Prev,
    /// Position at the given key
    Set,
    /// Position at the given key, returning it with its data
    SetKey,
    /// Position at the first key greater than or equal to the given key
    SetRange,
}

impl CursorOp {
    /// Whether the operation needs a search key
    pub fn needs_key(&self) -> bool {
        matches!(self, CursorOp::Set | CursorOp::SetKey | CursorOp::SetRange)
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub psize: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

/// Environment information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    /// Size of the data memory map
    pub mapsize: usize,
    /// Last page used in the data file
    pub last_pgno: usize,
    /// Last committed transaction
    pub last_txnid: usize,
    pub max_readers: u32,
    /// Reader slots currently in use
    pub num_readers: u32,
}

/// Occupied reader slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderInfo {
    pub slot: usize,
    /// Owning process
    pub pid: u32,
    /// Snapshot the reader is bound to; `None` after a reset
    pub txnid: Option<u64>,
}

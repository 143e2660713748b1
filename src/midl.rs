/// ID List: a sorted set of page numbers.
///
/// Used for the pages a write transaction frees, for the pages it may reuse,
/// and as the value format of free database records (little endian u64s).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Idl {
    ids: Vec<u64>,
}

impl Idl {
    pub(crate) fn new() -> Self {
        Idl { ids: Vec::new() }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn as_slice(&self) -> &[u64] {
        &self.ids
    }

    /// Insert an ID. Returns false if it was already present.
    pub(crate) fn insert(&mut self, id: u64) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Insert a run of `n` consecutive IDs starting at `first`
    pub(crate) fn insert_run(&mut self, first: u64, n: usize) {
        self.merge(first..first + n as u64);
    }

    /// Merge IDs from another list
    pub(crate) fn merge<I: IntoIterator<Item = u64>>(&mut self, other: I) {
        self.ids.extend(other);
        self.ids.sort_unstable();
        self.ids.dedup();
    }

    /// Remove and return the first ID of the lowest run of `n` consecutive IDs
    pub(crate) fn take_run(&mut self, n: usize) -> Option<u64> {
        if n == 0 || self.ids.len() < n {
            return None;
        }
        let span = (n - 1) as u64;
        let start = (0..=self.ids.len() - n).find(|&i| self.ids[i + n - 1] - self.ids[i] == span)?;
        let first = self.ids[start];
        self.ids.drain(start..start + n);
        Some(first)
    }

    /// Encode as records of at most `per_record` IDs each
    pub(crate) fn encode_chunks(&self, per_record: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.ids.chunks(per_record).map(|chunk| {
            let mut buf = Vec::with_capacity(chunk.len() * 8);
            for id in chunk {
                buf.extend_from_slice(&id.to_le_bytes());
            }
            buf
        })
    }

    pub(crate) fn decode(buf: &[u8]) -> Self {
        let mut ids: Vec<u64> = buf
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                u64::from_le_bytes(b)
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Idl { ids }
    }
}

use std::io;
use std::result;

/// Custom result type for store operations
pub type Result<T> = result::Result<T, Error>;

/// errno for an invalid argument or call sequence
pub(crate) const EINVAL: i32 = 22;
/// errno for a generic I/O failure
pub(crate) const EIO: i32 = 5;

/// Store error codes.
///
/// Every variant maps to a signed result code through [`Error::code`]; zero is
/// reserved for success. The LMDB range -30799..=-30780 is kept verbatim so
/// callers switching on raw codes keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Requested page not found
    #[error("Requested page not found")]
    PageNotFound,
    /// Database file is corrupted
    #[error("Database file is corrupted")]
    Corrupted,
    /// Update of meta page failed
    #[error("Update of meta page failed or environment had fatal error")]
    Panic,
    /// Database version mismatch
    #[error("Database environment version mismatch")]
    VersionMismatch,
    /// File is not a valid data file
    #[error("File is not a valid LMDB file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("Environment maxreaders limit reached")]
    ReadersFull,
    /// Thread-local storage keys full
    #[error("Thread-local storage keys full - too many environments open")]
    TlsFull,
    /// Transaction has too many dirty pages
    #[error("Transaction has too many dirty pages - transaction too big")]
    TxnFull,
    /// Too many open cursors
    #[error("Internal error - cursor stack limit reached")]
    CursorFull,
    /// Page has not enough space
    #[error("Internal error - page has no more space")]
    PageFull,
    /// Database contents grew beyond environment mapsize
    #[error("Database contents grew beyond environment mapsize")]
    MapResized,
    /// Operation and DB incompatible
    #[error("Operation and DB incompatible, or DB flags changed")]
    Incompatible,
    /// Invalid reuse of reader locktable slot
    #[error("Invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid
    #[error("Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data
    #[error("Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("The specified DBI handle was closed/changed unexpectedly")]
    BadDbi,
    /// The process-wide environment has not been initialized
    #[error("Environment is not initialized")]
    EnvNotInitialized,
    /// Environment is read-only
    #[error("Environment is read-only")]
    EnvReadOnly,
    /// Invalid environment configuration
    #[error("Invalid environment configuration")]
    EnvInvalidConfig,
    /// Environment path is invalid
    #[error("Invalid environment path")]
    EnvInvalidPath,
    /// Environment map size is invalid
    #[error("Invalid map size")]
    EnvInvalidMapSize,
    /// Environment max readers value is invalid
    #[error("Invalid maximum readers value")]
    EnvInvalidMaxReaders,
    /// Transaction is read-only
    #[error("Transaction is read-only")]
    TxnReadOnly,
    /// Parent transaction is invalid for this kind of child
    #[error("Parent transaction is invalid")]
    InvalidParentTxn,
    /// Operating system error, carrying the positive errno
    #[error("{}", os_error_text(.0))]
    Io(i32),
    /// Unknown negative code
    #[error("Unknown error code: {0}")]
    Other(i32),
}

fn os_error_text(code: &i32) -> String {
    io::Error::from_raw_os_error(*code).to_string()
}

impl Error {
    /// Signed result code for this error
    pub fn code(&self) -> i32 {
        match *self {
            Error::KeyExist => -30799,
            Error::NotFound => -30798,
            Error::PageNotFound => -30797,
            Error::Corrupted => -30796,
            Error::Panic => -30795,
            Error::VersionMismatch => -30794,
            Error::Invalid => -30793,
            Error::MapFull => -30792,
            Error::DbsFull => -30791,
            Error::ReadersFull => -30790,
            Error::TlsFull => -30789,
            Error::TxnFull => -30788,
            Error::CursorFull => -30787,
            Error::PageFull => -30786,
            Error::MapResized => -30785,
            Error::Incompatible => -30784,
            Error::BadRslot => -30783,
            Error::BadTxn => -30782,
            Error::BadValSize => -30781,
            Error::BadDbi => -30780,
            Error::EnvNotInitialized => -30778,
            Error::EnvReadOnly => -30777,
            Error::EnvInvalidConfig => -30776,
            Error::EnvInvalidPath => -30775,
            Error::EnvInvalidMapSize => -30774,
            Error::EnvInvalidMaxReaders => -30773,
            Error::TxnReadOnly => -30768,
            Error::InvalidParentTxn => -30762,
            Error::Io(code) => code,
            Error::Other(code) => code,
        }
    }

    /// Error for a nonzero result code
    pub fn from_code(code: i32) -> Error {
        match code {
            -30799 => Error::KeyExist,
            -30798 => Error::NotFound,
            -30797 => Error::PageNotFound,
            -30796 => Error::Corrupted,
            -30795 => Error::Panic,
            -30794 => Error::VersionMismatch,
            -30793 => Error::Invalid,
            -30792 => Error::MapFull,
            -30791 => Error::DbsFull,
            -30790 => Error::ReadersFull,
            -30789 => Error::TlsFull,
            -30788 => Error::TxnFull,
            -30787 => Error::CursorFull,
            -30786 => Error::PageFull,
            -30785 => Error::MapResized,
            -30784 => Error::Incompatible,
            -30783 => Error::BadRslot,
            -30782 => Error::BadTxn,
            -30781 => Error::BadValSize,
            -30780 => Error::BadDbi,
            -30778 => Error::EnvNotInitialized,
            -30777 => Error::EnvReadOnly,
            -30776 => Error::EnvInvalidConfig,
            -30775 => Error::EnvInvalidPath,
            -30774 => Error::EnvInvalidMapSize,
            -30773 => Error::EnvInvalidMaxReaders,
            -30768 => Error::TxnReadOnly,
            -30762 => Error::InvalidParentTxn,
            code if code > 0 => Error::Io(code),
            code => Error::Other(code),
        }
    }

    /// Invalid argument or call sequence
    pub(crate) fn invalid_argument() -> Error {
        Error::Io(EINVAL)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if let Some(code) = err.raw_os_error() {
            return Error::Io(code);
        }
        let code = match err.kind() {
            io::ErrorKind::NotFound => 2,
            io::ErrorKind::PermissionDenied => 13,
            io::ErrorKind::AlreadyExists => 17,
            io::ErrorKind::InvalidInput => EINVAL,
            io::ErrorKind::WouldBlock => 11,
            _ => EIO,
        };
        Error::Io(code)
    }
}

/// Helper trait for converting result codes to Results
pub trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for i32 {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from_code(self))
        }
    }
}

/// Human-readable description of a result code
pub fn strerror(code: i32) -> String {
    if code == 0 {
        return "Successful return: 0".to_string();
    }
    Error::from_code(code).to_string()
}

/// Result code for an outcome, zero on success
pub fn result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

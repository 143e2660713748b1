// src/lib.rs
mod btree;
mod config;
mod constants;
mod cursor;
mod database;
mod diag;
mod env;
mod error;
mod meta;
mod midl;
mod page;
mod readers;
mod transaction;
mod types;

pub use config::EnvConfig;
pub use constants::{
    EnvFlags, WriteFlags, DEFAULT_FILE_MODE, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS,
    DEFAULT_MAX_READERS, MAX_KEY_SIZE, MIN_MAP_SIZE, PAGE_SIZE,
};
pub use cursor::{Cursor, Iter, RwCursor};
pub use database::Database;
pub use diag::{CallSite, DiagnosticSink, LogSink, NopSink, StderrSink};
pub use env::{global, global_config, initialize, initialize_with_sink, version, EnvBuilder, Environment};
pub use error::{result_code, strerror, Error, IntoResult, Result};
pub use transaction::Transaction;
pub use types::{CursorOp, EnvInfo, ReaderInfo, Stat};

// Database -> Transaction -> Environment

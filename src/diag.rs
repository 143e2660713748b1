//! Diagnostic sink.
//!
//! The store reports through four leveled calls (status, note, warning,
//! error) and a tagged debug call. Which backend receives them is decided by
//! whoever builds the environment: [`LogSink`] forwards to the `log` facade,
//! [`StderrSink`] prints to standard error and [`NopSink`] drops everything.

use std::fmt;
use std::io::Write;
use std::path::Path;

/// Source location attached to a debug message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Enclosing module or function path
    pub function: &'static str,
    /// Source file
    pub file: &'static str,
    /// Source line
    pub line: u32,
}

/// Backend receiving store diagnostics
pub trait DiagnosticSink: Send + Sync + fmt::Debug {
    /// Routine progress information
    fn status(&self, args: fmt::Arguments<'_>);
    /// Noteworthy but normal condition
    fn note(&self, args: fmt::Arguments<'_>);
    /// Recoverable anomaly
    fn warning(&self, args: fmt::Arguments<'_>);
    /// Failed operation
    fn error(&self, args: fmt::Arguments<'_>);
    /// Tagged developer message
    fn debug(&self, tag: &str, site: &CallSite, args: fmt::Arguments<'_>);
}

/// Emit a tagged debug message with the current call site
macro_rules! diag_debug {
    ($sink:expr, $tag:expr, $($arg:tt)+) => {
        $sink.debug(
            $tag,
            &$crate::diag::CallSite {
                function: module_path!(),
                file: file!(),
                line: line!(),
            },
            format_args!($($arg)+),
        )
    };
}
pub(crate) use diag_debug;

/// Routes diagnostics to the `log` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn status(&self, args: fmt::Arguments<'_>) {
        log::info!(target: "lumodb", "{}", args);
    }

    fn note(&self, args: fmt::Arguments<'_>) {
        log::info!(target: "lumodb", "{}", args);
    }

    fn warning(&self, args: fmt::Arguments<'_>) {
        log::warn!(target: "lumodb", "{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        log::error!(target: "lumodb", "{}", args);
    }

    fn debug(&self, tag: &str, site: &CallSite, args: fmt::Arguments<'_>) {
        log::debug!(
            target: "lumodb",
            "({}) <{}:{} ({})> {}",
            tag,
            site.file,
            site.line,
            site.function,
            args
        );
    }
}

/// Writes diagnostics to standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl StderrSink {
    fn emit(&self, level: &str, args: fmt::Arguments<'_>) {
        // Losing a diagnostic line must never fail the store operation
        let _ = writeln!(std::io::stderr().lock(), "[{}] {}", level, args);
    }
}

impl DiagnosticSink for StderrSink {
    fn status(&self, args: fmt::Arguments<'_>) {
        self.emit("STATUS", args);
    }

    fn note(&self, args: fmt::Arguments<'_>) {
        self.emit("NOTE", args);
    }

    fn warning(&self, args: fmt::Arguments<'_>) {
        self.emit("WARNING", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.emit("ERROR", args);
    }

    fn debug(&self, tag: &str, site: &CallSite, args: fmt::Arguments<'_>) {
        let file = Path::new(site.file)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(site.file);
        let _ = writeln!(
            std::io::stderr().lock(),
            "[DEBUG] <{}:{} ({})> ({}) {}",
            file,
            site.line,
            site.function,
            tag,
            args
        );
    }
}

/// Discards all diagnostics
#[derive(Debug, Default, Clone, Copy)]
pub struct NopSink;

impl DiagnosticSink for NopSink {
    fn status(&self, _args: fmt::Arguments<'_>) {}
    fn note(&self, _args: fmt::Arguments<'_>) {}
    fn warning(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
    fn debug(&self, _tag: &str, _site: &CallSite, _args: fmt::Arguments<'_>) {}
}

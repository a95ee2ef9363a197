// src/common.rs

//! Common imports, type aliases, and other globals for _websiftlib_.

/// `F`ake `Path` or `F`ile `Path`.
///
/// An easier-to-pass stand-in for [`std::path::Path`]; log file names come
/// from the command line as plain strings and stay that way (`-` names the
/// stdin pipe, which is not a path at all).
pub type FPath = String;

/// a sequence of [`FPath`]s
pub type FPaths = Vec<FPath>;

/// File Size in bytes
pub type FileSz = u64;

/// A general-purpose counting type, typically used for internal statistics
/// counting.
pub type Count = u64;

/// A zero-based count of lines consumed from a log.
pub type LineNr = u64;

/// A file serial number as returned by `stat(2)`; `0` stands for a pipe.
pub type Inode = u64;

/// A [`Vec`](std::vec::Vec) of `u8`.
pub type Bytes = Vec<u8>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// parsing limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Number of leading bytes of a log captured as its *snippet*, used together
/// with the inode to recognize the same file across runs.
pub const READ_BYTES: usize = 4096;

/// Upper bound of per-log parse error messages retained for reporting.
pub const MAX_LOG_ERRORS: usize = 20;

/// Initial line buffer size for the line reader.
pub const LINE_BUFFER: usize = 4096;

/// Default number of lines read during the initial log format sniff.
pub const NUM_TESTS: u32 = 10;

/// Default number of lines per parser chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Maximum length in bytes of an extracted referring site.
pub const REF_SITE_LEN: usize = 511;

/// Maximum length in bytes of a normalized MIME type field.
pub const MAX_MIME_OUT: usize = 128;

/// Microseconds per second; serve times are always stored in microseconds.
pub const SECS: u64 = 1_000_000;

/// Microseconds per millisecond.
pub const MILS: u64 = 1_000;

/// Outcome of reading one log source to completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// the log was consumed to EOF (or until the stop flag was raised)
    Done,
    /// a non-blocking pipe ran dry before the format sniff could decide;
    /// the caller may retry later
    InsufficientData,
}

impl ReadOutcome {
    #[inline(always)]
    pub const fn is_done(&self) -> bool {
        matches!(*self, ReadOutcome::Done)
    }
}

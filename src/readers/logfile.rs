// src/readers/logfile.rs

//! Per-source log state: the [`Log`], the ordered [`Logs`] collection, and
//! the [`LastParse`] resume fingerprint with its gate.
//!
//! A log is recognized across runs by its inode plus the first
//! [`READ_BYTES`] bytes of content (the *snippet*). The resume gate
//! prefers missing a few lines over double-counting any.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::common::{Count, FPath, FileSz, Inode, LineNr, MAX_LOG_ERRORS, READ_BYTES};
use crate::config::{FormatError, ParseConf};
use crate::data::datetime::{epoch_seconds, Local, NaiveDateTime};
use crate::data::logitem::LogItem;
use crate::storage::LastParseStore;

use ::regex::Regex;
use ::si_trace_print::{defn, defx, defñ};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fatal problem with one log source or with the run configuration.
#[derive(Debug)]
pub enum LogError {
    /// the configured formats cannot produce records
    Format(FormatError),
    /// the `fname_as_vhost` regex failed to compile or to match
    VhostRegex { fname: FPath, regex: String },
    /// could not open or read the log
    Io { path: FPath, err: std::io::Error },
    /// the format sniff found no valid records
    FormatMismatch { path: FPath },
}

impl fmt::Display for LogError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        match self {
            LogError::Format(err) => {
                write!(f, "{}", err)
            }
            LogError::VhostRegex { fname, regex } => {
                write!(f, "Unable to extract a virtual host from {:?} [{}]", fname, regex)
            }
            LogError::Io { path, err } => {
                write!(f, "Unable to open the specified log file '{}'. {}", path, err)
            }
            LogError::FormatMismatch { path } => {
                write!(
                    f,
                    "No valid records found while testing the log format against '{}'",
                    path
                )
            }
        }
    }
}

impl std::error::Error for LogError {}

impl From<FormatError> for LogError {
    fn from(err: FormatError) -> LogError {
        LogError::Format(err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LastParse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persisted resume fingerprint of one log, keyed by inode
/// (`0` for pipes).
#[derive(Clone)]
pub struct LastParse {
    /// newest record timestamp seen, epoch seconds
    pub ts: i64,
    /// lines consumed
    pub line: LineNr,
    /// file size at the time of parsing
    pub size: FileSz,
    /// first bytes of the file
    pub snippet: [u8; READ_BYTES],
    pub snippetlen: usize,
}

impl Default for LastParse {
    fn default() -> LastParse {
        LastParse {
            ts: 0,
            line: 0,
            size: 0,
            snippet: [0; READ_BYTES],
            snippetlen: 0,
        }
    }
}

impl fmt::Debug for LastParse {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("LastParse")
            .field("ts", &self.ts)
            .field("line", &self.line)
            .field("size", &self.size)
            .field("snippetlen", &self.snippetlen)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity of one log source.
#[derive(Clone, Debug, Default)]
pub struct LogProps {
    pub filename: FPath,
    /// basename of `filename`
    pub fname: FPath,
    pub inode: Inode,
    pub size: FileSz,
}

/// One input source with its counters.
///
/// The atomic counters are updated by parser workers; the plain fields are
/// only touched by the reading thread outside the parallel section.
pub struct Log {
    pub props: LogProps,
    /// vhost extracted from the file name, applied to every record
    pub fname_as_vhost: Option<String>,
    /// reading the stdin pipe rather than a file
    pub piping: bool,
    /// lines consumed (valid or invalid, but not comments)
    pub read: AtomicU64,
    /// bytes consumed by the chunked reader
    pub bytes: AtomicU64,
    /// final `bytes` value of the last completed run
    pub length: u64,
    pub processed: AtomicU64,
    pub invalid: AtomicU64,
    /// bounded ring of parse error diagnostics
    pub errors: Mutex<Vec<String>>,
    pub snippet: [u8; READ_BYTES],
    pub snippetlen: usize,
    /// wall-clock time the log was opened; seed for partial datetimes
    pub start_time: NaiveDateTime,
    /// newest record timestamp of this run; monotonic maximum across
    /// concurrent parsers
    pub lp_ts: AtomicI64,
    /// file size at open time, persisted with the fingerprint
    pub lp_size: FileSz,
}

impl fmt::Debug for Log {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Log")
            .field("props", &self.props)
            .field("piping", &self.piping)
            .field("read", &self.read.load(Ordering::SeqCst))
            .field("processed", &self.processed.load(Ordering::SeqCst))
            .field("invalid", &self.invalid.load(Ordering::SeqCst))
            .finish()
    }
}

/// basename of a path-ish string
fn basename(filename: &str) -> &str {
    match filename.rfind('/') {
        Some(pos) => &filename[pos + 1..],
        None => filename,
    }
}

impl Log {
    /// Register a log source.
    ///
    /// When `fname_as_vhost` is configured, the regex must compile and its
    /// first capture group must match the file's basename.
    pub fn new(
        filename: &str,
        conf: &ParseConf,
    ) -> Result<Log, LogError> {
        defñ!("({:?})", filename);
        let fname: String = basename(filename).to_string();
        let piping: bool = filename == "-";

        let mut fvh: Option<String> = None;
        if let Some(re_str) = conf.fname_as_vhost.as_deref() {
            if !piping {
                let re = Regex::new(re_str).map_err(|_| LogError::VhostRegex {
                    fname: fname.clone(),
                    regex: re_str.to_string(),
                })?;
                let caps = re
                    .captures(&fname)
                    .ok_or_else(|| LogError::VhostRegex {
                        fname: fname.clone(),
                        regex: re_str.to_string(),
                    })?;
                fvh = caps.get(1).map(|m| m.as_str().to_string());
                if fvh.is_none() {
                    return Err(LogError::VhostRegex {
                        fname,
                        regex: re_str.to_string(),
                    });
                }
            }
        }

        Ok(Log {
            props: LogProps {
                filename: filename.to_string(),
                fname,
                inode: 0,
                size: 0,
            },
            fname_as_vhost: fvh,
            piping,
            read: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            length: 0,
            processed: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            errors: Mutex::new(Vec::with_capacity(MAX_LOG_ERRORS)),
            snippet: [0; READ_BYTES],
            snippetlen: 0,
            start_time: Local::now().naive_local(),
            lp_ts: AtomicI64::new(0),
            lp_size: 0,
        })
    }

    // ------------------------------------------------------------------
    // counters

    pub fn count_process(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Count the line as processed *and* invalid, retaining the diagnostic
    /// while the error ring has room.
    pub fn count_process_and_invalid(
        &self,
        logitem: &LogItem,
        line: &str,
    ) {
        self.count_process();
        self.invalid.fetch_add(1, Ordering::SeqCst);
        let mut errors = self.errors.lock().unwrap();
        if errors.len() < MAX_LOG_ERRORS {
            errors.push(format!(
                "{} | {}",
                logitem.errstr.as_deref().unwrap_or("-"),
                line.trim_end()
            ));
        }
    }

    pub fn uncount_processed(&self) {
        self.processed.store(0, Ordering::SeqCst);
    }

    pub fn uncount_invalid(&self) {
        self.invalid.store(0, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // resume fingerprint

    /// Raise this run's newest-record timestamp to that of `logitem`;
    /// a monotonic maximum under concurrent parsers.
    pub fn update_lp_ts(
        &self,
        logitem: &LogItem,
    ) -> i64 {
        let newts: i64 = epoch_seconds(&logitem.dt);
        self.lp_ts.fetch_max(newts, Ordering::SeqCst);

        newts
    }

    /// Does the current log carry the content from the last time it was
    /// parsed? Compared over the first [`READ_BYTES`] bytes.
    pub fn is_likely_same_log(
        &self,
        lp: &LastParse,
    ) -> bool {
        if lp.size == 0 {
            return true;
        }
        let size: usize = self.snippetlen.min(lp.snippetlen);

        self.snippet[0] != 0 && lp.snippet[0] != 0 && self.snippet[..size] == lp.snippet[..size]
    }

    /// The resume gate: should a parsed record be dropped as already
    /// persisted by a prior run?
    pub fn should_restore_from_disk(
        &self,
        conf: &ParseConf,
        store: &dyn LastParseStore,
    ) -> bool {
        if !conf.restore {
            return false;
        }
        let lp: LastParse = store.last_parse(self.props.inode);

        // no last parse timestamp, nothing to compare against
        if lp.ts == 0 {
            return false;
        }

        // same content: keep parsing once past the previously read line
        if self.props.inode != 0 && self.is_likely_same_log(&lp) {
            if self.props.size > lp.size && self.read.load(Ordering::SeqCst) >= lp.line {
                return false;
            }
            return true;
        }

        // no inode (a pipe): prior or equal timestamps restore from disk
        if self.props.inode == 0 && lp.ts >= self.lp_ts.load(Ordering::SeqCst) {
            return true;
        }

        // newer timestamp than last parsed: read the line
        if self.lp_ts.load(Ordering::SeqCst) > lp.ts {
            return false;
        }

        // a smaller file with an equal timestamp was possibly truncated
        if self.props.size < lp.size && self.lp_ts.load(Ordering::SeqCst) == lp.ts {
            return false;
        }

        // everything else restores: rather miss a few lines than
        // double-count a few
        true
    }

    /// The invalid-line variant of the resume gate: count the invalid line
    /// unless it belongs to an already-ingested prefix. A line without an
    /// extractable timestamp offers nothing to gate on and is counted.
    pub fn process_invalid(
        &self,
        logitem: &LogItem,
        line: &str,
        conf: &ParseConf,
        store: &dyn LastParseStore,
    ) {
        if !conf.restore {
            self.count_process_and_invalid(logitem, line);
            return;
        }

        let lp: LastParse = store.last_parse(self.props.inode);

        if self.props.inode != 0 && self.is_likely_same_log(&lp) {
            // only count invalids past the last parsed line
            if self.props.size > lp.size && self.read.load(Ordering::SeqCst) >= lp.line {
                self.count_process_and_invalid(logitem, line);
            }
            return;
        }

        // no timestamp to compare against, just count the invalid
        if logitem.numdate == 0 {
            self.count_process_and_invalid(logitem, line);
            return;
        }

        self.update_lp_ts(logitem);
        if !self.should_restore_from_disk(conf, store) {
            self.count_process_and_invalid(logitem, line);
        }
    }

    /// Capture the first bytes of the file and rewind.
    pub(crate) fn set_initial_snippet(
        &mut self,
        fp: &mut File,
    ) -> std::io::Result<()> {
        self.snippet = [0; READ_BYTES];
        self.snippetlen = 0;
        if self.props.size == 0 {
            return Ok(());
        }
        let len: usize = (self.props.size as usize).min(READ_BYTES);
        let mut nread: usize = 0;
        while nread < len {
            let n: usize = fp.read(&mut self.snippet[nread..len])?;
            if n == 0 {
                break;
            }
            nread += n;
        }
        self.snippetlen = nread;
        fp.seek(SeekFrom::Start(0))?;

        Ok(())
    }

    /// Write back the updated fingerprint after a completed parse.
    pub fn persist_last_parse(
        &self,
        store: &dyn LastParseStore,
    ) {
        defn!("({:?})", self.props.filename);
        if self.props.inode != 0 && self.props.size != 0 {
            let mut lp = LastParse {
                ts: self.lp_ts.load(Ordering::SeqCst),
                line: self.read.load(Ordering::SeqCst),
                size: self.lp_size,
                snippet: [0; READ_BYTES],
                snippetlen: self.snippetlen,
            };
            lp.snippet[..self.snippetlen].copy_from_slice(&self.snippet[..self.snippetlen]);
            store.insert_last_parse(self.props.inode, &lp);
        } else if self.props.inode == 0 {
            // probably a pipe; keyed under inode zero
            let lp = LastParse {
                ts: self.lp_ts.load(Ordering::SeqCst),
                line: self.read.load(Ordering::SeqCst),
                size: self.lp_size,
                snippet: [0; READ_BYTES],
                snippetlen: 0,
            };
            store.insert_last_parse(0, &lp);
        }
        defx!();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The ordered collection of log sources, with the currently-processed
/// target for a UI spinner.
pub struct Logs {
    pub glogs: Vec<Log>,
    current: Mutex<usize>,
}

impl Logs {
    /// Register every configured filename.
    pub fn new(conf: &ParseConf) -> Result<Logs, LogError> {
        let mut glogs: Vec<Log> = Vec::with_capacity(conf.filenames.len());
        for filename in conf.filenames.iter() {
            glogs.push(Log::new(filename, conf)?);
        }

        Ok(Logs {
            glogs,
            current: Mutex::new(0),
        })
    }

    /// Point the spinner at the log being consumed.
    pub fn set_processing(
        &self,
        idx: usize,
    ) {
        *self.current.lock().unwrap() = idx;
    }

    /// Filename the spinner should display.
    pub fn current_filename(&self) -> FPath {
        let idx: usize = *self.current.lock().unwrap();
        match self.glogs.get(idx) {
            Some(glog) => glog.props.filename.clone(),
            None => FPath::new(),
        }
    }

    /// Zero the processed/invalid counters of every log.
    pub fn reset_counters(&self) {
        for glog in self.glogs.iter() {
            glog.processed.store(0, Ordering::SeqCst);
            glog.invalid.store(0, Ordering::SeqCst);
        }
    }

    pub fn total_processed(&self) -> Count {
        self.glogs
            .iter()
            .map(|g| g.processed.load(Ordering::SeqCst))
            .sum()
    }

    pub fn total_invalid(&self) -> Count {
        self.glogs
            .iter()
            .map(|g| g.invalid.load(Ordering::SeqCst))
            .sum()
    }
}

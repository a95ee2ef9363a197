// src/config.rs

//! The parse configuration and shared runtime state.
//!
//! [`ParseConf`] is constructed once (usually from the command line) and then
//! only ever passed by shared reference; nothing in the parsing core mutates
//! it. The few flags that *are* mutated during a run live in
//! [`RuntimeFlags`] as atomics shared by all parser workers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::{FPaths, CHUNK_SIZE, NUM_TESTS};
use crate::data::datetime::strf;
use crate::parsers::format::LogFormat;

use ::chrono::NaiveDate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ParseConf
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How requests for static assets (images, scripts, archives, …) are
/// treated by the line classifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IgnoreStatics {
    /// static requests are kept
    #[default]
    Off,
    /// counted as processed but excluded from request panels
    Req,
    /// excluded entirely
    Panel,
}

/// All recognized parsing options.
///
/// The format strings use the directive language described in
/// [`LogFormat`]; `date_format` and `time_format` use `strftime(3)`
/// specifiers as understood by [`chrono`].
///
/// [`LogFormat`]: crate::parsers::format::LogFormat
#[derive(Clone, Debug)]
pub struct ParseConf {
    /// the log format directive string, e.g. `%h %^ %^ [%d:%t %^] "%r" %s %b`
    pub log_format: String,
    /// `strftime` format of the `%d` token, e.g. `%d/%b/%Y`
    pub date_format: String,
    /// `strftime` format of the `%t` token, e.g. `%H:%M:%S`
    pub time_format: String,
    /// numeric output format of [`LogItem::date`], `%Y%m%d` by default
    ///
    /// [`LogItem::date`]: crate::data::logitem::LogItem#structfield.date
    pub date_num_format: String,
    /// treat each line as a JSON object instead of a directive-formatted line
    pub is_json_log_format: bool,
    /// per-JSON-key subformat strings, consulted by the JSON directive engine
    pub json_log_keys: HashMap<String, String>,
    /// decode percent-encoded fields twice
    pub double_decode: bool,
    /// keep the HTTP method extracted from `%r`
    pub append_method: bool,
    /// keep the HTTP protocol extracted from `%r`
    pub append_protocol: bool,
    /// accept any non-empty `%h` token, not only valid IPv4/6 literals
    pub no_ip_validation: bool,
    /// accept any numeric `%s` token, not only known HTTP status codes
    pub no_strict_status: bool,
    /// drop lines whose user agent is a known crawler
    pub ignore_crawlers: bool,
    /// keep *only* lines whose user agent is a known crawler
    pub crawlers_only: bool,
    /// static-asset handling
    pub ignore_statics: IgnoreStatics,
    /// strip the query string from requests
    pub ignore_qstr: bool,
    /// status codes to drop
    pub ignore_status: Vec<i32>,
    /// static-asset filename extensions, each including the dot (".css")
    pub static_files: Vec<String>,
    /// also probe for a static extension right before a `?`
    pub all_static_files: bool,
    /// treat nginx 444 as a 404
    pub code444_as_404: bool,
    /// skip lines already ingested by a prior run (resume)
    pub restore: bool,
    /// number of lines for the initial format sniff; `0` disables it
    pub num_tests: u32,
    /// number of parser workers; `1` parses inline on the reading thread
    pub jobs: usize,
    /// lines per parser chunk
    pub chunk_size: usize,
    /// regex whose first capture group extracts a virtual host from the
    /// log's file name
    pub fname_as_vhost: Option<String>,
    /// parse once and exit; a dry pipe is waited on instead of ending the run
    pub process_and_exit: bool,
    /// a log is arriving on stdin
    pub read_stdin: bool,
    /// the log files to parse; `-` names the stdin pipe
    pub filenames: FPaths,
}

impl Default for ParseConf {
    fn default() -> ParseConf {
        ParseConf {
            log_format: String::new(),
            date_format: String::new(),
            time_format: String::new(),
            date_num_format: String::from("%Y%m%d"),
            is_json_log_format: false,
            json_log_keys: HashMap::new(),
            double_decode: false,
            append_method: true,
            append_protocol: true,
            no_ip_validation: false,
            no_strict_status: false,
            ignore_crawlers: false,
            crawlers_only: false,
            ignore_statics: IgnoreStatics::Off,
            ignore_qstr: false,
            ignore_status: Vec::new(),
            static_files: Vec::new(),
            all_static_files: false,
            code444_as_404: false,
            restore: false,
            num_tests: NUM_TESTS,
            jobs: 1,
            chunk_size: CHUNK_SIZE,
            fname_as_vhost: None,
            process_and_exit: false,
            read_stdin: false,
            filenames: FPaths::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// format verification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A configuration problem that makes every line unparsable.
/// Fatal at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormatError {
    EmptyLogFormat,
    EmptyDateFormat,
    EmptyTimeFormat,
    /// a `%` specifier immediately followed by whitespace
    SpecifierSpace,
    /// `%{` without a matching unescaped `}`
    UnclosedBraces,
    /// `%{…}` not followed by `h`
    BracesWithoutHost,
    /// `date_num_format` does not render to a number
    BadDateNumFormat(String),
}

impl fmt::Display for FormatError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        match self {
            FormatError::EmptyLogFormat => {
                write!(f, "No log format was found on your conf file or command line")
            }
            FormatError::EmptyDateFormat => {
                write!(f, "No date format was found on your conf file or command line")
            }
            FormatError::EmptyTimeFormat => {
                write!(f, "No time format was found on your conf file or command line")
            }
            FormatError::SpecifierSpace => {
                write!(f, "Specifier '%' followed by a space in the log format")
            }
            FormatError::UnclosedBraces => {
                write!(f, "Missing closing brace '}}' in the log format")
            }
            FormatError::BracesWithoutHost => {
                write!(f, "Braces '{{…}}' must be followed by specifier 'h'")
            }
            FormatError::BadDateNumFormat(fmt_) => {
                write!(f, "Numeric date format {:?} does not render to a number", fmt_)
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Verify that the configured formats can possibly produce records.
///
/// Mirrors the fatal startup check of the original engine; a failure here
/// means the run must not start.
pub fn verify_formats(conf: &ParseConf) -> Result<(), FormatError> {
    if conf.is_json_log_format {
        if conf.json_log_keys.is_empty() {
            return Err(FormatError::EmptyLogFormat);
        }
        // every per-key subformat must itself compile
        for spec in conf.json_log_keys.values() {
            LogFormat::compile(spec, &conf.date_format)?;
        }
    } else {
        if conf.log_format.is_empty() {
            return Err(FormatError::EmptyLogFormat);
        }
        LogFormat::compile(&conf.log_format, &conf.date_format)?;
    }
    if conf.date_format.is_empty() {
        return Err(FormatError::EmptyDateFormat);
    }
    if conf.time_format.is_empty() {
        return Err(FormatError::EmptyTimeFormat);
    }
    // probe the numeric date format once so the per-line path can treat a bad
    // render as an invalid token instead of aborting mid-parse
    let probe = NaiveDate::from_ymd_opt(2000, 10, 10)
        .unwrap_or_default()
        .and_hms_opt(13, 55, 36)
        .unwrap_or_default();
    match strf(&probe, &conf.date_num_format) {
        Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {}
        _ => return Err(FormatError::BadDateNumFormat(conf.date_num_format.clone())),
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RuntimeFlags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Atomic flags mutated during a run and shared by all parser workers.
///
/// `bandwidth` and `serve_usecs` are set-once facts ("this log carries
/// response sizes / serve times") a storage engine may consult after the
/// run; `stop_processing` is raised by the `SIGINT` handler and checked by
/// the reader between chunks.
#[derive(Debug)]
pub struct RuntimeFlags {
    bandwidth: AtomicBool,
    serve_usecs: AtomicBool,
    stop_processing: AtomicBool,
}

impl RuntimeFlags {
    pub const fn new() -> RuntimeFlags {
        RuntimeFlags {
            bandwidth: AtomicBool::new(false),
            serve_usecs: AtomicBool::new(false),
            stop_processing: AtomicBool::new(false),
        }
    }

    /// record that at least one `%b` token was seen
    pub fn set_bandwidth(&self) {
        let _ = self
            .bandwidth
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn bandwidth(&self) -> bool {
        self.bandwidth.load(Ordering::SeqCst)
    }

    /// record that at least one serve-time token was seen
    pub fn set_serve_usecs(&self) {
        let _ = self
            .serve_usecs
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn serve_usecs(&self) -> bool {
        self.serve_usecs.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_processing.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_processing.load(Ordering::SeqCst)
    }
}

impl Default for RuntimeFlags {
    fn default() -> RuntimeFlags {
        RuntimeFlags::new()
    }
}

// src/bin/websift.rs

//! Driver program _websift_ drives the [_websiftlib_].
//!
//! Processes user-passed command-line arguments into a [`ParseConf`],
//! registers the named log files (or the stdin pipe), and runs the
//! read/parse pipeline over them. Each validated record is printed to
//! stdout as one tab-separated line; per-log totals and the bounded parse
//! error report go to stderr.
//!
//! `websift.rs` is the main thread and the only thread that prints to
//! STDOUT.
//!
//! [_websiftlib_]: websiftlib
//! [`ParseConf`]: websiftlib::config::ParseConf

#![allow(non_camel_case_types)]

use std::collections::HashMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Mutex;

use ::clap::{Parser, ValueEnum};
use ::const_format::concatcp;

use ::websiftlib::common::{Count, CHUNK_SIZE, NUM_TESTS};
use ::websiftlib::config::{IgnoreStatics, ParseConf, RuntimeFlags};
use ::websiftlib::data::logitem::LogItem;
use ::websiftlib::{e_err, e_wrn};
use ::websiftlib::readers::logfile::Logs;
use ::websiftlib::readers::pipeline::{parse_log, test_format};
use ::websiftlib::storage::{Downstream, LogSink, MemLastParseStore, NullClassify, NullSink};

// --------------------
// command-line parsing

/// user-passed signifier that the log arrives on STDIN
const LOG_ON_STDIN: &str = "-";

/// general error exit value
const EXIT_ERR: u8 = 1;

const CLI_HELP_AFTER: &str = concatcp!(
    "Examples:",
    "\n",
    "  websift --log-format '%h %^ %^ [%d:%t %^] \"%r\" %s %b' \\",
    "\n",
    "          --date-format '%d/%b/%Y' --time-format '%H:%M:%S' access.log",
    "\n",
    "  zcat access.log.gz | websift --log-format '…' --date-format '…' --time-format '…' -",
);

/// CLI enum that maps to [`IgnoreStatics`].
///
/// [`IgnoreStatics`]: websiftlib::config::IgnoreStatics
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CLI_Ignore_Statics {
    req,
    panel,
}

/// Parse web access logs with a user-passed log format and stream the
/// validated records to stdout.
#[derive(Parser, Debug)]
#[command(
    name = "websift",
    version,
    about,
    after_help = CLI_HELP_AFTER,
)]
struct CLI_Args {
    /// Log files to parse; `-` reads from stdin
    #[arg(required = true)]
    files: Vec<String>,

    /// The log format directive string
    #[arg(long, short = 'g', default_value_t = String::new())]
    log_format: String,

    /// strftime format of the `%d` date token
    #[arg(long, default_value_t = String::new())]
    date_format: String,

    /// strftime format of the `%t` time token
    #[arg(long, default_value_t = String::new())]
    time_format: String,

    /// Numeric output date format
    #[arg(long, default_value = "%Y%m%d")]
    datenum_format: String,

    /// Per-key JSON subformat, KEY=SUBFORMAT; implies JSON log mode
    #[arg(long = "json-log-key", value_name = "KEY=SUBFORMAT")]
    json_log_keys: Vec<String>,

    /// Decode percent-encoded fields twice
    #[arg(long)]
    double_decode: bool,

    /// Do not keep the method extracted from `%r`
    #[arg(long)]
    no_append_method: bool,

    /// Do not keep the protocol extracted from `%r`
    #[arg(long)]
    no_append_protocol: bool,

    /// Accept any non-empty `%h` token, not only IPv4/6 literals
    #[arg(long)]
    no_ip_validation: bool,

    /// Accept any numeric `%s` token, not only known HTTP statuses
    #[arg(long)]
    no_strict_status: bool,

    /// Drop lines whose user agent is a known crawler
    #[arg(long)]
    ignore_crawlers: bool,

    /// Keep only lines whose user agent is a known crawler
    #[arg(long)]
    crawlers_only: bool,

    /// Treatment of static-asset requests
    #[arg(long, value_enum, value_name = "LEVEL")]
    ignore_statics: Option<CLI_Ignore_Statics>,

    /// Strip query strings from requests
    #[arg(long)]
    no_query_string: bool,

    /// Status code to drop (may repeat)
    #[arg(long = "ignore-status", value_name = "CODE")]
    ignore_status: Vec<i32>,

    /// Static-asset extension including the dot (may repeat)
    #[arg(long = "static-file", value_name = "EXT")]
    static_files: Vec<String>,

    /// Also probe for a static extension right before a `?`
    #[arg(long)]
    all_static_files: bool,

    /// Treat nginx 444 as 404
    #[arg(long = "444-as-404")]
    code444_as_404: bool,

    /// Skip lines already ingested by a prior run
    #[arg(long)]
    restore: bool,

    /// Lines for the initial format sniff; 0 disables it
    #[arg(long, default_value_t = NUM_TESTS, value_name = "LINES")]
    num_tests: u32,

    /// Parser workers; 1 parses inline
    #[arg(long, short = 'j', default_value_t = 1)]
    jobs: usize,

    /// Lines per parser chunk
    #[arg(long, default_value_t = CHUNK_SIZE, value_name = "LINES")]
    chunk_size: usize,

    /// Regex whose first capture group extracts a vhost from the file name
    #[arg(long, value_name = "REGEX")]
    fname_as_vhost: Option<String>,

    /// Parse once and exit; wait on a dry pipe instead of ending the run
    #[arg(long)]
    process_and_exit: bool,

    /// Only verify the formats against the logs and report errors
    #[arg(long = "test-format")]
    test_log_format: bool,
}

fn conf_from_args(args: &CLI_Args) -> ParseConf {
    let mut json_log_keys: HashMap<String, String> = HashMap::new();
    for pair in args.json_log_keys.iter() {
        if let Some((key, spec)) = pair.split_once('=') {
            json_log_keys.insert(key.to_string(), spec.to_string());
        }
    }

    ParseConf {
        log_format: args.log_format.clone(),
        date_format: args.date_format.clone(),
        time_format: args.time_format.clone(),
        date_num_format: args.datenum_format.clone(),
        is_json_log_format: !json_log_keys.is_empty(),
        json_log_keys,
        double_decode: args.double_decode,
        append_method: !args.no_append_method,
        append_protocol: !args.no_append_protocol,
        no_ip_validation: args.no_ip_validation,
        no_strict_status: args.no_strict_status,
        ignore_crawlers: args.ignore_crawlers,
        crawlers_only: args.crawlers_only,
        ignore_statics: match args.ignore_statics {
            None => IgnoreStatics::Off,
            Some(CLI_Ignore_Statics::req) => IgnoreStatics::Req,
            Some(CLI_Ignore_Statics::panel) => IgnoreStatics::Panel,
        },
        ignore_qstr: args.no_query_string,
        ignore_status: args.ignore_status.clone(),
        static_files: args.static_files.clone(),
        all_static_files: args.all_static_files,
        code444_as_404: args.code444_as_404,
        restore: args.restore,
        num_tests: args.num_tests,
        jobs: args.jobs.max(1),
        chunk_size: args.chunk_size.max(1),
        fname_as_vhost: args.fname_as_vhost.clone(),
        process_and_exit: args.process_and_exit,
        read_stdin: args.files.iter().any(|f| f == LOG_ON_STDIN),
        filenames: args.files.clone(),
    }
}

// --------------------
// record output

/// Prints each validated record to stdout as one tab-separated line.
struct TsvSink {
    out: Mutex<std::io::BufWriter<std::io::Stdout>>,
}

impl TsvSink {
    fn new() -> TsvSink {
        TsvSink {
            out: Mutex::new(std::io::BufWriter::new(std::io::stdout())),
        }
    }

    fn flush(&self) {
        let _ = self.out.lock().unwrap().flush();
    }
}

impl LogSink for TsvSink {
    fn process_log(
        &self,
        logitem: &LogItem,
    ) {
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            logitem.date.as_deref().unwrap_or("-"),
            logitem.time.as_deref().unwrap_or("-"),
            logitem.host.as_deref().unwrap_or("-"),
            logitem.method.as_deref().unwrap_or("-"),
            logitem.req.as_deref().unwrap_or("-"),
            logitem.status,
            logitem.resp_size,
            logitem.referer.as_deref().unwrap_or("-"),
            logitem.agent.as_deref().unwrap_or("-"),
        );
    }
}

// --------------------
// signal handling

/// runtime flags shared with the SIGINT handler
static RTFLAGS: RuntimeFlags = RuntimeFlags::new();

extern "C" fn sigint_handler(_sig: libc::c_int) {
    RTFLAGS.request_stop();
}

fn set_signal_handler() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            sigint_handler as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

// --------------------
// reporting

/// Output all log errors stored during parsing.
fn output_logerrors(logs: &Logs) {
    for glog in logs.glogs.iter() {
        let errors = glog.errors.lock().unwrap();
        if errors.is_empty() {
            continue;
        }
        e_err!("FILE: {}", glog.props.filename);
        e_err!("Parsed lines producing {} errors:", errors.len());
        for err in errors.iter() {
            e_err!("{}", err);
        }
    }
}

fn print_summary(logs: &Logs) {
    for glog in logs.glogs.iter() {
        let processed: Count = glog.processed.load(std::sync::atomic::Ordering::SeqCst);
        let invalid: Count = glog.invalid.load(std::sync::atomic::Ordering::SeqCst);
        if processed == 0 {
            e_wrn!("nothing was parsed from {}", glog.props.filename);
        }
        eprintln!(
            "{}: {} processed, {} invalid, {} bytes",
            glog.props.filename, processed, invalid, glog.length,
        );
    }
}

// --------------------
// main

fn main() -> ExitCode {
    let args: CLI_Args = CLI_Args::parse();
    let conf: ParseConf = conf_from_args(&args);

    let mut logs: Logs = match Logs::new(&conf) {
        Ok(val) => val,
        Err(err) => {
            e_err!("{}", err);
            return ExitCode::from(EXIT_ERR);
        }
    };

    let store = MemLastParseStore::new();
    let classify = NullClassify;

    if args.test_log_format {
        let sink = NullSink;
        let down = Downstream {
            sink: &sink,
            store: &store,
            classify: &classify,
        };
        return match test_format(&mut logs, &conf, &RTFLAGS, down) {
            Ok(_) => {
                eprintln!("Log format verified.");
                ExitCode::SUCCESS
            }
            Err(errors) => {
                for err in errors.iter() {
                    e_err!("{}", err);
                }
                ExitCode::from(EXIT_ERR)
            }
        };
    }

    set_signal_handler();

    let sink = TsvSink::new();
    let down = Downstream {
        sink: &sink,
        store: &store,
        classify: &classify,
    };
    match parse_log(&mut logs, false, &conf, &RTFLAGS, down) {
        Ok(_) => {}
        Err(err) => {
            e_err!("{}", err);
            output_logerrors(&logs);
            return ExitCode::from(EXIT_ERR);
        }
    }
    sink.flush();

    print_summary(&logs);
    output_logerrors(&logs);

    ExitCode::SUCCESS
}

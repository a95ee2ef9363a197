// src/tests/common.rs

//! Common helpers for tests: canned formats, a collecting sink, and
//! temporary log files.

use std::io::Write;
use std::sync::Mutex;

use crate::common::FPath;
use crate::config::{ParseConf, RuntimeFlags};
use crate::data::datetime::{NaiveDate, NaiveDateTime};
use crate::data::logitem::LogItem;
use crate::parsers::format::{parse_format, LogFormat, SpecErr};
use crate::storage::{Downstream, LastParseStore, LogSink, MemLastParseStore, NullClassify};
use crate::readers::logfile::Logs;
use crate::readers::pipeline::parse_log;

use ::tempfile::NamedTempFile;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Common Log Format and friends
pub const CLF_LOG_FORMAT: &str = "%h %^ %^ [%d:%t %^] \"%r\" %s %b";
pub const CLF_DATE_FORMAT: &str = "%d/%b/%Y";
pub const CLF_TIME_FORMAT: &str = "%H:%M:%S";

pub const CLF_LINE_1: &str =
    "127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] \"GET /apache_pb.gif HTTP/1.0\" 200 2326\n";

/// NamedTempFile instances default to this file name prefix.
pub const STR_TEMPFILE_PREFIX: &str = "tmp-websift-test-";

/// a fixed start time so partial datetimes are deterministic
pub fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// a `ParseConf` preloaded with the Common Log Format
pub fn clf_conf() -> ParseConf {
    ParseConf {
        log_format: String::from(CLF_LOG_FORMAT),
        date_format: String::from(CLF_DATE_FORMAT),
        time_format: String::from(CLF_TIME_FORMAT),
        ..ParseConf::default()
    }
}

/// Run the directive engine over one line; returns the item and the
/// engine result.
pub fn parse_one(
    line: &str,
    conf: &ParseConf,
) -> (LogItem, Result<(), SpecErr>) {
    let fmt: LogFormat = match LogFormat::compile(&conf.log_format, &conf.date_format) {
        Ok(val) => val,
        Err(err) => panic!("LogFormat::compile({:?}) failed: {}", conf.log_format, err),
    };
    let rt = RuntimeFlags::new();
    let classify = NullClassify;
    let mut logitem = LogItem::new(start_time());
    let result = parse_format(&mut logitem, line, &fmt, conf, &rt, &classify);

    (logitem, result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// a collecting sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records `host|req|status` per processed record, in call order.
#[derive(Default)]
pub struct CollectSink {
    pub items: Mutex<Vec<String>>,
}

impl CollectSink {
    pub fn new() -> CollectSink {
        CollectSink {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.items.lock().unwrap().clone()
    }
}

impl LogSink for CollectSink {
    fn process_log(
        &self,
        logitem: &LogItem,
    ) {
        self.items.lock().unwrap().push(format!(
            "{}|{}|{}",
            logitem.host.as_deref().unwrap_or("-"),
            logitem.req.as_deref().unwrap_or("-"),
            logitem.status,
        ));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// temporary log files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Testing helper function to write a `str` to a temporary file.
pub fn create_temp_file(data: &str) -> NamedTempFile {
    let mut ntf = match tempfile::Builder::new()
        .prefix::<str>(STR_TEMPFILE_PREFIX)
        .tempfile()
    {
        Ok(val) => val,
        Err(err) => {
            panic!("NamedTempFile::new() return Err {}", err);
        }
    };
    match ntf.write_all(data.as_bytes()) {
        Ok(_) => {}
        Err(err) => {
            panic!("NamedTempFile::write_all() return Err {}", err);
        }
    }

    ntf
}

/// Small helper function for copying `NamedTempFile` path to a `FPath`.
pub fn ntf_fpath(ntf: &NamedTempFile) -> FPath {
    FPath::from(ntf.path().to_str().unwrap())
}

/// Run a full parse of one file, collecting the processed records.
/// Returns the collected lines and the `Logs` for counter assertions.
pub fn run_parse(
    path: &FPath,
    conf: &ParseConf,
    store: &dyn LastParseStore,
) -> (Vec<String>, Logs) {
    let mut conf = conf.clone();
    conf.filenames = vec![path.clone()];
    let mut logs = match Logs::new(&conf) {
        Ok(val) => val,
        Err(err) => panic!("Logs::new() failed: {}", err),
    };
    let rt = RuntimeFlags::new();
    let sink = CollectSink::new();
    let classify = NullClassify;
    let down = Downstream {
        sink: &sink,
        store,
        classify: &classify,
    };
    match parse_log(&mut logs, false, &conf, &rt, down) {
        Ok(_) => {}
        Err(err) => panic!("parse_log({:?}) failed: {}", path, err),
    }

    (sink.lines(), logs)
}

/// As [`run_parse`] but with a throwaway store.
pub fn run_parse_once(
    path: &FPath,
    conf: &ParseConf,
) -> (Vec<String>, Logs) {
    let store = MemLastParseStore::new();

    run_parse(path, conf, &store)
}

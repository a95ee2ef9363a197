// src/readers/pipeline.rs

//! The parallel read/parse pipeline.
//!
//! The reading thread batches lines into chunks and hands them to a pool
//! of parser workers over a bounded channel; each worker runs the
//! directive engine and the classifier on its lines. Parsed chunks flow
//! back tagged with their sequence number, and the reading thread inserts
//! them downstream strictly in sequence order, so the downstream
//! [`process_log`] call sequence always equals input order, regardless of
//! the worker count. With one job everything runs inline and no thread is
//! spawned.
//!
//! Before the pipeline starts, the format sniff reads a handful of lines
//! synchronously; if none parses, the run is declared format-mismatched.
//! The file position is deliberately *not* rewound afterwards, which is
//! what makes pipes workable.
//!
//! [`process_log`]: crate::storage::LogSink::process_log

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::os::unix::fs::MetadataExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crate::common::{ReadOutcome, LINE_BUFFER, NUM_TESTS};
use crate::config::{verify_formats, FormatError, ParseConf, RuntimeFlags};
use crate::data::datetime::Local;
use crate::data::logitem::{IgnoreLevel, LogItem};
use crate::parsers::classify::{ignore_line, is_404, is_static_req, verify_missing_fields};
use crate::parsers::format::{parse_format, LogFormat};
use crate::parsers::jsonfmt::{parse_json_format, JsonLogFormat};
use crate::readers::logfile::{Log, LogError, Logs};
use crate::storage::Downstream;

#[allow(unused_imports)]
use crate::debug::printers::de_err;

use ::crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use ::si_trace_print::{defn, defo, defx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// parse context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The configured formats, compiled once per run.
#[derive(Clone, Debug)]
pub enum CompiledFormat {
    Line(LogFormat),
    Json(JsonLogFormat),
}

impl CompiledFormat {
    pub fn compile(conf: &ParseConf) -> Result<CompiledFormat, FormatError> {
        if conf.is_json_log_format {
            return Ok(CompiledFormat::Json(JsonLogFormat::compile(conf)?));
        }

        Ok(CompiledFormat::Line(LogFormat::compile(
            &conf.log_format,
            &conf.date_format,
        )?))
    }
}

/// Everything a parse of one run needs, shared read-only by all workers.
#[derive(Clone, Copy)]
pub struct ParseCtx<'a> {
    pub conf: &'a ParseConf,
    pub fmt: &'a CompiledFormat,
    pub rt: &'a RuntimeFlags,
    pub down: Downstream<'a>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// per-line processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of [`parse_line`] for one raw line.
enum LineParsed {
    /// empty line or comment; soft-ignored, no counters touched
    Skip,
    /// format held; the record is attached unless it was filtered,
    /// de-duplicated by the resume gate, or this is a dry run
    Valid(Option<Box<LogItem>>),
    /// format or required-field failure; already counted
    Invalid,
}

/// Is the line parseable at all (and not a comment)?
fn valid_line(line: &str) -> bool {
    let b: &[u8] = line.as_bytes();

    !(b.is_empty() || b[0] == b'#' || b[0] == b'\n')
}

/// Process one line: run the directive engine, check required fields,
/// apply the resume gate and the ignore policy, and finalize the record.
fn parse_line(
    glog: &Log,
    line: &str,
    dry_run: bool,
    ctx: &ParseCtx,
) -> LineParsed {
    // soft ignore these lines
    if !valid_line(line) {
        return LineParsed::Skip;
    }

    let mut logitem: Box<LogItem> = Box::new(LogItem::new(glog.start_time));

    let parsed = match ctx.fmt {
        CompiledFormat::Line(fmt) => parse_format(
            &mut logitem,
            line,
            fmt,
            ctx.conf,
            ctx.rt,
            ctx.down.classify,
        ),
        CompiledFormat::Json(jfmt) => parse_json_format(
            &mut logitem,
            line,
            jfmt,
            ctx.conf,
            ctx.rt,
            ctx.down.classify,
        ),
    };

    // invalid log line (format issue)
    if parsed.is_err() {
        glog.process_invalid(&logitem, line, ctx.conf, ctx.down.store);
        return LineParsed::Invalid;
    }

    if !glog.piping && glog.fname_as_vhost.is_some() {
        logitem.vhost = glog.fname_as_vhost.clone();
    }

    // valid format but missing fields
    if verify_missing_fields(&mut logitem) {
        glog.process_invalid(&logitem, line, ctx.conf, ctx.down.store);
        return LineParsed::Invalid;
    }

    // from here on, a valid record that may still be filtered
    glog.update_lp_ts(&logitem);

    if glog.should_restore_from_disk(ctx.conf, ctx.down.store) {
        return LineParsed::Valid(None);
    }

    glog.count_process();

    // testing the log only
    if dry_run {
        return LineParsed::Valid(None);
    }

    // agent is absent when %u is not in the format
    if logitem.agent.is_none() {
        logitem.agent = Some(String::from("-"));
        logitem.set_agent_hash();
    }

    logitem.ignorelevel = ignore_line(&mut logitem, ctx.conf, ctx.down.classify);
    if logitem.ignorelevel == IgnoreLevel::Panel {
        return LineParsed::Valid(None);
    }

    if is_404(&logitem, ctx.conf) {
        logitem.is_404 = true;
    } else if let Some(req) = logitem.req.as_deref() {
        if is_static_req(req, ctx.conf) {
            logitem.is_static = true;
        }
    }

    let tls_type_cypher: Option<String> = match (&logitem.tls_type, &logitem.tls_cypher) {
        (Some(tls_type), Some(tls_cypher)) => Some(format!("{}/{}", tls_type, tls_cypher)),
        _ => None,
    };
    logitem.tls_type_cypher = tls_type_cypher;

    logitem.uniq_key = logitem.uniq_visitor_key();

    LineParsed::Valid(Some(logitem))
}

/// Entry point to process one line, shared by the sniff phase and the
/// parser workers. Flips the format-test flag on the first valid line and
/// rolls back the counters when the test window closes without one.
fn read_line(
    glog: &Log,
    line: &str,
    test: &AtomicBool,
    cnt: &AtomicU32,
    dry_run: bool,
    ctx: &ParseCtx,
) -> Option<Box<LogItem>> {
    let status: LineParsed = parse_line(glog, line, dry_run, ctx);

    // flip the test flag on the first record with a valid format, filtered
    // or not
    if matches!(status, LineParsed::Valid(_)) {
        test.store(false, Ordering::SeqCst);
    }
    if matches!(status, LineParsed::Skip) {
        return None;
    }

    // reached the number of lines to test without one valid record: the
    // log format is likely not matching
    if ctx.conf.num_tests > 0 {
        let c: u32 = cnt.fetch_add(1, Ordering::SeqCst) + 1;
        if c >= ctx.conf.num_tests && test.load(Ordering::SeqCst) {
            glog.uncount_processed();
            glog.uncount_invalid();
            return None;
        }
    }
    glog.read.fetch_add(1, Ordering::SeqCst);

    match status {
        LineParsed::Valid(logitem) => logitem,
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// line fetching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One fetched line, or why there is none.
enum FetchedLine {
    Line(String),
    Eof,
    /// non-blocking pipe ran dry
    WouldBlock,
}

/// Read one line including its trailing newline (the last line of a file
/// may lack one).
///
/// On `EAGAIN` from a non-blocking pipe: sleep 100 ms and retry when
/// configured to process-and-exit, otherwise report [`WouldBlock`].
///
/// [`WouldBlock`]: self::FetchedLine#variant.WouldBlock
fn fgetline(
    fp: &mut dyn BufRead,
    conf: &ParseConf,
) -> std::io::Result<FetchedLine> {
    let mut buf: Vec<u8> = Vec::with_capacity(LINE_BUFFER);
    loop {
        match fp.read_until(b'\n', &mut buf) {
            Ok(0) => {
                if buf.is_empty() {
                    return Ok(FetchedLine::Eof);
                }
                return Ok(FetchedLine::Line(String::from_utf8_lossy(&buf).into_owned()));
            }
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    return Ok(FetchedLine::Line(String::from_utf8_lossy(&buf).into_owned()));
                }
                // mid-line EOF; the next read decides
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if conf.process_and_exit {
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
                return Ok(FetchedLine::WouldBlock);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Fill one chunk. Returns the lines and whether the source is exhausted.
fn read_chunk(
    fp: &mut dyn BufRead,
    glog: &Log,
    conf: &ParseConf,
) -> std::io::Result<(Vec<String>, bool)> {
    let mut lines: Vec<String> = Vec::with_capacity(conf.chunk_size);
    let mut at_end = false;
    while lines.len() < conf.chunk_size {
        match fgetline(fp, conf)? {
            FetchedLine::Line(line) => {
                glog.bytes.fetch_add(line.len() as u64, Ordering::SeqCst);
                lines.push(line);
            }
            FetchedLine::Eof | FetchedLine::WouldBlock => {
                at_end = true;
                break;
            }
        }
    }

    Ok((lines, at_end))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// format sniff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum SniffOutcome {
    Verified,
    Mismatch,
    InsufficientData,
}

/// Read up to `num_tests` lines synchronously, parsing (and in a real run
/// inserting) each. The file position is not rewound afterwards.
fn initial_sniff(
    fp: &mut dyn BufRead,
    glog: &Log,
    dry_run: bool,
    ctx: &ParseCtx,
    test: &AtomicBool,
    cnt: &AtomicU32,
) -> Result<SniffOutcome, LogError> {
    defn!("({:?})", glog.props.filename);
    while cnt.load(Ordering::SeqCst) < ctx.conf.num_tests {
        let line: String = match fgetline(fp, ctx.conf).map_err(|err| LogError::Io {
            path: glog.props.filename.clone(),
            err,
        })? {
            FetchedLine::Line(line) => line,
            FetchedLine::Eof => break,
            FetchedLine::WouldBlock => {
                if test.load(Ordering::SeqCst) {
                    // the pipe ran dry before the sniff could decide
                    defx!("InsufficientData");
                    return Ok(SniffOutcome::InsufficientData);
                }
                break;
            }
        };
        if let Some(logitem) = read_line(glog, &line, test, cnt, dry_run, ctx) {
            // in a real run insert right away; prevents redundant reads
            // and supports pipes
            if !dry_run && logitem.errstr.is_none() {
                ctx.down.sink.process_log(&logitem);
            }
        }
    }

    if test.load(Ordering::SeqCst) {
        glog.uncount_processed();
        glog.uncount_invalid();
        defx!("Mismatch");
        return Ok(SniffOutcome::Mismatch);
    }
    defx!("Verified");

    Ok(SniffOutcome::Verified)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// the pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chunk of parsed items, tagged with the chunk sequence number.
type ChunkItems = (u64, Vec<Option<Box<LogItem>>>);

/// Drain one parsed chunk into the sink, in line order.
fn insert_items(
    items: Vec<Option<Box<LogItem>>>,
    dry_run: bool,
    ctx: &ParseCtx,
) {
    for logitem in items.into_iter().flatten() {
        if !dry_run && logitem.errstr.is_none() {
            ctx.down.sink.process_log(&logitem);
        }
    }
}

/// Single-job path: parse and insert inline, no threads.
fn read_lines_inline(
    fp: &mut dyn BufRead,
    glog: &Log,
    dry_run: bool,
    ctx: &ParseCtx,
    test: &AtomicBool,
    cnt: &AtomicU32,
) -> Result<(), LogError> {
    loop {
        let (lines, at_end) = read_chunk(fp, glog, ctx.conf).map_err(|err| LogError::Io {
            path: glog.props.filename.clone(),
            err,
        })?;
        for line in lines.iter() {
            if let Some(logitem) = read_line(glog, line, test, cnt, dry_run, ctx) {
                if !dry_run && logitem.errstr.is_none() {
                    ctx.down.sink.process_log(&logitem);
                }
            }
        }
        if dry_run && cnt.load(Ordering::SeqCst) >= NUM_TESTS {
            break;
        }
        if ctx.rt.stop_requested() {
            break;
        }
        if at_end {
            break;
        }
    }

    Ok(())
}

/// Multi-job path: a worker pool over a bounded chunk channel, with the
/// reading thread doubling as the in-order inserter.
fn read_lines_parallel(
    fp: &mut dyn BufRead,
    glog: &Log,
    dry_run: bool,
    ctx: &ParseCtx,
    test: &AtomicBool,
    cnt: &AtomicU32,
) -> Result<(), LogError> {
    let jobs: usize = ctx.conf.jobs;
    let mut io_err: Option<std::io::Error> = None;

    thread::scope(|s| {
        let (chunk_send, chunk_recv): (Sender<(u64, Vec<String>)>, Receiver<(u64, Vec<String>)>) =
            bounded(jobs);
        // results are bounded by the in-flight cap below
        let (items_send, items_recv): (Sender<ChunkItems>, Receiver<ChunkItems>) = unbounded();

        for _ in 0..jobs {
            let chunk_recv = chunk_recv.clone();
            let items_send = items_send.clone();
            s.spawn(move || {
                for (seq, lines) in chunk_recv.iter() {
                    let mut items: Vec<Option<Box<LogItem>>> = Vec::with_capacity(lines.len());
                    for line in lines.iter() {
                        items.push(read_line(glog, line, test, cnt, dry_run, ctx));
                    }
                    if items_send.send((seq, items)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(chunk_recv);
        drop(items_send);

        // chunks parsed out-of-order are parked here until their turn
        let mut pending: BTreeMap<u64, Vec<Option<Box<LogItem>>>> = BTreeMap::new();
        let mut next_seq: u64 = 0;
        let mut next_insert: u64 = 0;
        let mut in_flight: usize = 0;

        loop {
            let (lines, at_end) = match read_chunk(fp, glog, ctx.conf) {
                Ok(val) => val,
                Err(err) => {
                    io_err = Some(err);
                    break;
                }
            };

            if !lines.is_empty() {
                // cap the window so parsed chunks cannot pile up
                while in_flight >= jobs {
                    match items_recv.recv() {
                        Ok((seq, items)) => {
                            pending.insert(seq, items);
                            in_flight -= 1;
                        }
                        Err(_) => break,
                    }
                }
                defo!("chunk {} with {} lines", next_seq, lines.len());
                if chunk_send.send((next_seq, lines)).is_err() {
                    break;
                }
                next_seq += 1;
                in_flight += 1;
            }

            // drain whatever is ready, inserting strictly in order
            while let Ok((seq, items)) = items_recv.try_recv() {
                pending.insert(seq, items);
                in_flight -= 1;
            }
            while let Some(items) = pending.remove(&next_insert) {
                insert_items(items, dry_run, ctx);
                next_insert += 1;
            }

            if dry_run && cnt.load(Ordering::SeqCst) >= NUM_TESTS {
                break;
            }
            if ctx.rt.stop_requested() {
                break;
            }
            if at_end {
                break;
            }
        }

        // after EOF (or a stop), join and drain the in-flight chunks
        drop(chunk_send);
        while in_flight > 0 {
            match items_recv.recv() {
                Ok((seq, items)) => {
                    pending.insert(seq, items);
                    in_flight -= 1;
                }
                Err(_err) => {
                    de_err!("parser worker channel closed early: {}", _err);
                    break;
                }
            }
        }
        while let Some(items) = pending.remove(&next_insert) {
            insert_items(items, dry_run, ctx);
            next_insert += 1;
        }
    });

    match io_err {
        Some(err) => Err(LogError::Io {
            path: glog.props.filename.clone(),
            err,
        }),
        None => Ok(()),
    }
}

/// Read all lines of one source through the sniff phase and the pipeline.
pub(crate) fn read_lines(
    fp: &mut dyn BufRead,
    glog: &Log,
    dry_run: bool,
    ctx: &ParseCtx,
) -> Result<ReadOutcome, LogError> {
    let test = AtomicBool::new(ctx.conf.num_tests > 0);
    let cnt = AtomicU32::new(0);
    glog.bytes.store(0, Ordering::SeqCst);

    if test.load(Ordering::SeqCst) {
        match initial_sniff(fp, glog, dry_run, ctx, &test, &cnt)? {
            SniffOutcome::Verified => {
                // handled lines are accounted; restart the test counter for
                // the dry-run cap
                cnt.store(0, Ordering::SeqCst);
            }
            SniffOutcome::Mismatch => {
                return Err(LogError::FormatMismatch {
                    path: glog.props.filename.clone(),
                });
            }
            SniffOutcome::InsufficientData => {
                return Ok(ReadOutcome::InsufficientData);
            }
        }
    }

    if ctx.conf.jobs <= 1 {
        read_lines_inline(fp, glog, dry_run, ctx, &test, &cnt)?;
    } else {
        read_lines_parallel(fp, glog, dry_run, ctx, &test, &cnt)?;
    }

    Ok(ReadOutcome::Done)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// log lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Open one source, capture its identity, run the pipeline over it, and
/// persist the updated resume fingerprint.
pub fn read_log(
    glog: &mut Log,
    dry_run: bool,
    ctx: &ParseCtx,
) -> Result<ReadOutcome, LogError> {
    defn!("({:?})", glog.props.filename);
    glog.start_time = Local::now().naive_local();

    if glog.piping {
        let stdin = std::io::stdin();
        let mut fp = stdin.lock();
        let outcome: ReadOutcome = read_lines(&mut fp, glog, dry_run, ctx)?;
        glog.persist_last_parse(ctx.down.store);
        defx!();
        return Ok(outcome);
    }

    let mut file: File = File::open(&glog.props.filename).map_err(|err| LogError::Io {
        path: glog.props.filename.clone(),
        err,
    })?;
    // grab the inode of the file being parsed and its leading snippet
    if let Ok(meta) = file.metadata() {
        glog.props.inode = meta.ino();
        glog.props.size = meta.size();
        glog.lp_size = meta.size();
        glog.set_initial_snippet(&mut file)
            .map_err(|err| LogError::Io {
                path: glog.props.filename.clone(),
                err,
            })?;
    }
    let mut fp: BufReader<File> = BufReader::with_capacity(LINE_BUFFER, file);

    let outcome: ReadOutcome = read_lines(&mut fp, glog, dry_run, ctx)?;
    glog.persist_last_parse(ctx.down.store);
    defx!();

    Ok(outcome)
}

/// Entry point: verify the formats, then parse every registered log.
pub fn parse_log(
    logs: &mut Logs,
    dry_run: bool,
    conf: &ParseConf,
    rt: &RuntimeFlags,
    down: Downstream,
) -> Result<(), LogError> {
    verify_formats(conf)?;
    let fmt: CompiledFormat = CompiledFormat::compile(conf)?;

    // nothing piped and no logs passed: loading persisted data back is the
    // storage engine's concern
    if conf.restore && conf.filenames.is_empty() && !conf.read_stdin {
        return Ok(());
    }

    let ctx = ParseCtx {
        conf,
        fmt: &fmt,
        rt,
        down,
    };

    for idx in 0..logs.glogs.len() {
        logs.set_processing(idx);
        let glog: &mut Log = &mut logs.glogs[idx];
        read_log(glog, dry_run, &ctx)?;
        glog.length = glog.bytes.load(Ordering::SeqCst);
    }

    Ok(())
}

/// Dry-run the logs to verify the format, collecting the per-log error
/// diagnostics on failure.
pub fn test_format(
    logs: &mut Logs,
    conf: &ParseConf,
    rt: &RuntimeFlags,
    down: Downstream,
) -> Result<(), Vec<String>> {
    match parse_log(logs, true, conf, rt, down) {
        Ok(_) => Ok(()),
        Err(err) => {
            let mut errors: Vec<String> = Vec::new();
            for glog in logs.glogs.iter() {
                let errs = glog.errors.lock().unwrap();
                if !errs.is_empty() {
                    errors = errs.clone();
                    break;
                }
            }
            if errors.is_empty() {
                errors.push(err.to_string());
            }
            Err(errors)
        }
    }
}

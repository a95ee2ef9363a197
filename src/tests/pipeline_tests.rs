// src/tests/pipeline_tests.rs

//! tests for `pipeline.rs`: the chunked worker pipeline, the format
//! sniff, and resume across runs

use std::io::Write;

use crate::config::RuntimeFlags;
use crate::readers::logfile::{LogError, Logs};
use crate::readers::pipeline::{parse_log, test_format};
use crate::storage::{Downstream, MemLastParseStore, NullClassify};
use crate::tests::common::{
    clf_conf,
    create_temp_file,
    ntf_fpath,
    run_parse,
    run_parse_once,
    CollectSink,
};

use ::test_case::test_case;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `n` Common Log Format lines with distinct requests
fn clf_lines(
    start: usize,
    n: usize,
) -> String {
    let mut out = String::new();
    for i in start..start + n {
        out.push_str(&format!(
            "127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET /page/{} HTTP/1.0\" 200 {}\n",
            i,
            i * 10,
        ));
    }

    out
}

fn expected(
    start: usize,
    n: usize,
) -> Vec<String> {
    (start..start + n)
        .map(|i| format!("127.0.0.1|/page/{}|200", i))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ordering across worker counts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test_case(1; "inline")]
#[test_case(2; "two workers")]
#[test_case(4; "four workers")]
#[test_case(8; "eight workers")]
fn test_insert_order_equals_input_order(jobs: usize) {
    let ntf = create_temp_file(&clf_lines(0, 60));
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.jobs = jobs;
    // small chunks so several are in flight at once
    conf.chunk_size = 7;

    let (lines, logs) = run_parse_once(&path, &conf);
    assert_eq!(lines, expected(0, 60));
    assert_eq!(logs.total_processed(), 60);
    assert_eq!(logs.total_invalid(), 0);
}

#[test]
fn test_byte_and_line_accounting() {
    let data: String = clf_lines(0, 30);
    let ntf = create_temp_file(&data);
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.chunk_size = 8;

    let (_lines, logs) = run_parse_once(&path, &conf);
    let glog = &logs.glogs[0];
    assert_eq!(glog.read.load(std::sync::atomic::Ordering::SeqCst), 30);
    // the sniff consumes the first lines before byte accounting starts
    let sniffed: usize = data
        .lines()
        .take(10)
        .map(|l| l.len() + 1)
        .sum();
    assert_eq!(glog.length, (data.len() - sniffed) as u64);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// invalid lines, comments, and the sniff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn test_invalid_lines_counted_not_emitted() {
    let mut data: String = clf_lines(0, 8);
    data.push_str("totally not a log line\n");
    data.push_str("also garbage here\n");
    let ntf = create_temp_file(&data);
    let path = ntf_fpath(&ntf);

    let (lines, logs) = run_parse_once(&path, &clf_conf());
    assert_eq!(lines, expected(0, 8));
    assert_eq!(logs.total_processed(), 10);
    assert_eq!(logs.total_invalid(), 2);
    assert!(!logs.glogs[0].errors.lock().unwrap().is_empty());
}

#[test]
fn test_comments_and_blank_lines_skipped() {
    let mut data = String::from("# a comment\n\n");
    data.push_str(&clf_lines(0, 5));
    let ntf = create_temp_file(&data);
    let path = ntf_fpath(&ntf);

    let (lines, logs) = run_parse_once(&path, &clf_conf());
    assert_eq!(lines, expected(0, 5));
    assert_eq!(logs.total_processed(), 5);
    assert_eq!(logs.total_invalid(), 0);
}

#[test]
fn test_format_mismatch_aborts_run() {
    let ntf = create_temp_file("garbage\nmore garbage\nstill garbage\n");
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.filenames = vec![path];
    let mut logs = Logs::new(&conf).unwrap();
    let rt = RuntimeFlags::new();
    let sink = CollectSink::new();
    let store = MemLastParseStore::new();
    let classify = NullClassify;
    let down = Downstream {
        sink: &sink,
        store: &store,
        classify: &classify,
    };

    let result = parse_log(&mut logs, false, &conf, &rt, down);
    assert!(matches!(result, Err(LogError::FormatMismatch { .. })));
    assert!(sink.lines().is_empty());
    // counters are rolled back, the diagnostics ring is kept
    assert_eq!(logs.total_processed(), 0);
    assert!(!logs.glogs[0].errors.lock().unwrap().is_empty());
}

#[test]
fn test_sniff_disabled_tolerates_garbage() {
    let ntf = create_temp_file("garbage\nmore garbage\n");
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.num_tests = 0;

    let (lines, logs) = run_parse_once(&path, &conf);
    assert!(lines.is_empty());
    assert_eq!(logs.total_processed(), 2);
    assert_eq!(logs.total_invalid(), 2);
}

#[test]
fn test_verify_formats_failure_is_fatal() {
    let ntf = create_temp_file(&clf_lines(0, 3));
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.log_format = String::new();
    conf.filenames = vec![path];
    let mut logs = Logs::new(&conf).unwrap();
    let rt = RuntimeFlags::new();
    let sink = CollectSink::new();
    let store = MemLastParseStore::new();
    let classify = NullClassify;
    let down = Downstream {
        sink: &sink,
        store: &store,
        classify: &classify,
    };
    assert!(matches!(
        parse_log(&mut logs, false, &conf, &rt, down),
        Err(LogError::Format(_)),
    ));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// test_format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn test_test_format_collects_errors() {
    let ntf = create_temp_file("garbage\nmore garbage\n");
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.filenames = vec![path];
    let mut logs = Logs::new(&conf).unwrap();
    let rt = RuntimeFlags::new();
    let sink = CollectSink::new();
    let store = MemLastParseStore::new();
    let classify = NullClassify;
    let down = Downstream {
        sink: &sink,
        store: &store,
        classify: &classify,
    };
    let errors: Vec<String> = test_format(&mut logs, &conf, &rt, down).unwrap_err();
    assert!(!errors.is_empty());
    // dry run: nothing reaches the sink
    assert!(sink.lines().is_empty());
}

#[test]
fn test_test_format_passes_on_valid_log() {
    let ntf = create_temp_file(&clf_lines(0, 5));
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.filenames = vec![path];
    let mut logs = Logs::new(&conf).unwrap();
    let rt = RuntimeFlags::new();
    let sink = CollectSink::new();
    let store = MemLastParseStore::new();
    let classify = NullClassify;
    let down = Downstream {
        sink: &sink,
        store: &store,
        classify: &classify,
    };
    assert!(test_format(&mut logs, &conf, &rt, down).is_ok());
    // a dry run inserts nothing
    assert!(sink.lines().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// resume across runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn test_resume_rerun_is_idempotent() {
    let ntf = create_temp_file(&clf_lines(0, 50));
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.restore = true;
    let store = MemLastParseStore::new();

    let (first, _logs) = run_parse(&path, &conf, &store);
    assert_eq!(first, expected(0, 50));

    // re-running immediately on the unchanged file emits nothing new
    let (second, logs2) = run_parse(&path, &conf, &store);
    assert!(second.is_empty(), "double-counted: {:?}", second);
    assert_eq!(logs2.total_processed(), 0);
}

#[test]
fn test_resume_picks_up_appended_lines() {
    let mut ntf = create_temp_file(&clf_lines(0, 50));
    let path = ntf_fpath(&ntf);
    let mut conf = clf_conf();
    conf.restore = true;
    let store = MemLastParseStore::new();

    let (first, _logs) = run_parse(&path, &conf, &store);
    assert_eq!(first.len(), 50);

    // the log keeps growing between runs
    ntf.as_file_mut()
        .write_all(clf_lines(50, 10).as_bytes())
        .unwrap();
    ntf.as_file_mut().flush().unwrap();

    let (second, logs2) = run_parse(&path, &conf, &store);
    assert_eq!(second, expected(50, 10));
    assert_eq!(logs2.total_processed(), 10);
}

#[test]
fn test_no_restore_reruns_everything() {
    let ntf = create_temp_file(&clf_lines(0, 20));
    let path = ntf_fpath(&ntf);
    let conf = clf_conf();
    let store = MemLastParseStore::new();

    let (first, _) = run_parse(&path, &conf, &store);
    let (second, _) = run_parse(&path, &conf, &store);
    assert_eq!(first, second);
    assert_eq!(second.len(), 20);
}

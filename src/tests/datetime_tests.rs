// src/tests/datetime_tests.rs

//! tests for `datetime.rs` parsing and re-emission

use crate::data::datetime::{
    epoch_seconds,
    parse_date,
    parse_datetime,
    parse_time,
    strf,
    NaiveDate,
    NaiveDateTime,
};
use crate::tests::common::start_time;

use ::test_case::test_case;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn ymd(
    y: i32,
    m: u32,
    d: u32,
) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test_case("10/Oct/2000", "%d/%b/%Y", 2000, 10, 10; "apache clf")]
#[test_case("2000-10-10", "%Y-%m-%d", 2000, 10, 10; "iso")]
#[test_case("02/Jan/2016", "%d/%b/%Y", 2016, 1, 2; "leading zero day")]
fn test_parse_date(
    tkn: &str,
    fmt: &str,
    y: i32,
    m: u32,
    d: u32,
) {
    let base: NaiveDateTime = start_time();
    assert_eq!(parse_date(tkn, fmt, &base), Some(ymd(y, m, d)));
}

#[test]
fn test_parse_date_missing_year_borrows_base() {
    let base: NaiveDateTime = start_time(); // 2020-01-01
    assert_eq!(parse_date("Nov  2", "%b %d", &base), Some(ymd(2020, 11, 2)));
    assert_eq!(parse_date("Nov 22", "%b %d", &base), Some(ymd(2020, 11, 22)));
}

#[test]
fn test_parse_date_garbage_is_none() {
    let base: NaiveDateTime = start_time();
    assert_eq!(parse_date("not-a-date", "%d/%b/%Y", &base), None);
    assert_eq!(parse_date("", "%d/%b/%Y", &base), None);
}

#[test_case("13:55:36", "%H:%M:%S", (13, 55, 36))]
#[test_case("00:00:01", "%T", (0, 0, 1); "percent T shorthand")]
fn test_parse_time(
    tkn: &str,
    fmt: &str,
    hms: (u32, u32, u32),
) {
    let expect = chrono::NaiveTime::from_hms_opt(hms.0, hms.1, hms.2).unwrap();
    assert_eq!(parse_time(tkn, fmt), Some(expect));
}

#[test]
fn test_parse_datetime_epoch() {
    let base: NaiveDateTime = start_time();
    let dt = parse_datetime("1454385289", "%s", &base).unwrap();
    assert_eq!(epoch_seconds(&dt), 1454385289);
    assert_eq!(dt.date(), ymd(2016, 2, 2));
}

#[test]
fn test_parse_datetime_date_only_merges_base_time() {
    let base: NaiveDateTime = ymd(2020, 1, 1).and_hms_opt(9, 30, 0).unwrap();
    let dt = parse_datetime("10/Oct/2000", "%d/%b/%Y", &base).unwrap();
    assert_eq!(dt.date(), ymd(2000, 10, 10));
    assert_eq!(dt.time(), base.time());
}

#[test]
fn test_strf_numeric_date() {
    let dt: NaiveDateTime = ymd(2000, 10, 10).and_hms_opt(13, 55, 36).unwrap();
    assert_eq!(strf(&dt, "%Y%m%d").as_deref(), Some("20001010"));
    assert_eq!(strf(&dt, "%H:%M:%S").as_deref(), Some("13:55:36"));
}

#[test]
fn test_epoch_seconds_round_trip() {
    let dt = parse_datetime("1600000000", "%s", &start_time()).unwrap();
    assert_eq!(epoch_seconds(&dt), 1_600_000_000);
}

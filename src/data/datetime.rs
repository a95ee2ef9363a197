// src/data/datetime.rs

//! `strptime(3)`-like parsing and `strftime(3)` re-emission over [`chrono`].
//!
//! Log formats carry separate user-passed date and time formats. A token
//! parsed with either one usually covers only part of a datetime
//! (`"10/Oct/2000"`, `"13:55:36"`, a syslog `"Nov  2"` without a year, or a
//! whole epoch timestamp for `%x`). The functions here parse what the format
//! describes and merge the rest from a base datetime, the way `strptime`
//! leaves unparsed `struct tm` fields untouched.

use std::fmt::Write;

#[doc(hidden)]
pub use ::chrono::{
    Datelike,
    Local,
    NaiveDate,
    NaiveDateTime,
    NaiveTime,
    Timelike,
};
use ::chrono::DateTime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Does the `strftime` format carry a year (or something implying one)?
fn fmt_has_year(fmt: &str) -> bool {
    let mut spec = false;
    for c in fmt.chars() {
        if spec {
            match c {
                'Y' | 'y' | 'G' | 'g' | 'C' | 's' => return true,
                _ => {}
            }
            spec = false;
        } else if c == '%' {
            spec = true;
        }
    }
    false
}

/// Format `dt` with a user-passed `strftime` format.
///
/// Returns `None` instead of panicking when the format has an unknown
/// specifier (chrono surfaces those as a formatting error).
pub fn strf(
    dt: &NaiveDateTime,
    fmt: &str,
) -> Option<String> {
    let mut out = String::with_capacity(fmt.len() * 2);
    match write!(out, "{}", dt.format(fmt)) {
        Ok(_) => Some(out),
        Err(_) => None,
    }
}

/// Parse the date portion of `tkn` according to `fmt`.
///
/// A format without a year (the syslog case, `"%b %d"`) borrows the year
/// from `base`.
pub fn parse_date(
    tkn: &str,
    fmt: &str,
    base: &NaiveDateTime,
) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(tkn, fmt) {
        return Some(d);
    }
    // the "date" format may describe a full datetime (epoch `%s` included)
    if let Ok(dt) = NaiveDateTime::parse_from_str(tkn, fmt) {
        return Some(dt.date());
    }
    if fmt.contains("%z") {
        if let Ok(dt) = DateTime::parse_from_str(tkn, fmt) {
            // fields as written in the log, offset not applied
            return Some(dt.naive_local().date());
        }
    }
    if !fmt_has_year(fmt) {
        let tkn_y = format!("{} {}", tkn, base.year());
        let fmt_y = format!("{} %Y", fmt);
        if let Ok(d) = NaiveDate::parse_from_str(&tkn_y, &fmt_y) {
            return Some(d);
        }
    }
    None
}

/// Parse the time portion of `tkn` according to `fmt`.
pub fn parse_time(
    tkn: &str,
    fmt: &str,
) -> Option<NaiveTime> {
    if let Ok(t) = NaiveTime::parse_from_str(tkn, fmt) {
        return Some(t);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(tkn, fmt) {
        return Some(dt.time());
    }
    if fmt.contains("%z") {
        if let Ok(dt) = DateTime::parse_from_str(tkn, fmt) {
            return Some(dt.naive_local().time());
        }
    }
    None
}

/// Parse a combined datetime token (`%x`), merging missing parts from
/// `base`.
pub fn parse_datetime(
    tkn: &str,
    fmt: &str,
    base: &NaiveDateTime,
) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(tkn, fmt) {
        return Some(dt);
    }
    if fmt.contains("%z") {
        if let Ok(dt) = DateTime::parse_from_str(tkn, fmt) {
            return Some(dt.naive_local());
        }
    }
    if let Some(d) = parse_date(tkn, fmt, base) {
        return Some(d.and_time(base.time()));
    }
    if let Ok(t) = NaiveTime::parse_from_str(tkn, fmt) {
        return Some(base.date().and_time(t));
    }
    None
}

/// Seconds since the epoch, taking the broken-down time as written
/// (the `mktime` stand-in; only ever compared against itself).
pub fn epoch_seconds(dt: &NaiveDateTime) -> i64 {
    dt.and_utc().timestamp()
}

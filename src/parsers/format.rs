// src/parsers/format.rs

//! The directive engine: interpret a log format over one raw line and
//! populate a [`LogItem`] field by field.
//!
//! The format language:
//!
//! - `%X`: a field directive, `X` one of
//!   `d t x v e C h m U q H r s b R u L T D n k K M`. An unknown `X`
//!   (conventionally `%^`) skips one token.
//! - `%{reject}h`: X-Forwarded-For form; `reject` is the character set
//!   delimiting addresses within the field.
//! - `~`: skip whitespace in the input.
//! - any other byte: a literal; consumes exactly one input byte without
//!   verification.
//!
//! The format is compiled once into a [`Vec`] of [`FormatToken`] so the
//! per-line hot path never re-scans the format string. For each directive
//! the *next raw format byte* is the token delimiter; the token ends at the
//! `cnt`-th unescaped occurrence of it (`cnt` is normally 1, widened for
//! `%d` to accommodate space-padded syslog dates).

use crate::common::{MILS, SECS};
use crate::config::{FormatError, ParseConf, RuntimeFlags};
use crate::data::datetime::{parse_date, parse_datetime, parse_time, strf};
use crate::data::logitem::{LogItem, TypeIp};
use crate::parsers::fields::{
    decode_url,
    extract_keyphrase,
    extract_method,
    extract_protocol,
    extract_referer_site,
    ipaddr_kind,
    is_cache_hit,
    is_valid_http_status,
    normalize_mime_type,
    parse_req,
};
use crate::storage::Classify;

use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why one directive failed on one line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SpecErr {
    /// missing token
    ToknNul(char),
    /// token present but rejected by its extractor
    ToknInv(char, Option<String>),
    /// input exhausted before the format
    LineInv,
}

impl fmt::Display for SpecErr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        match self {
            SpecErr::ToknNul(spec) => {
                write!(f, "Token for '%{}' specifier is NULL.", spec)
            }
            SpecErr::ToknInv(spec, tkn) => {
                write!(
                    f,
                    "Token '{}' doesn't match specifier '%{}'",
                    tkn.as_deref().unwrap_or("-"),
                    spec
                )
            }
            SpecErr::LineInv => {
                write!(f, "Incompatible format due to early parsed line ending '\\0'.")
            }
        }
    }
}

/// Record the error message on the item and hand the error back.
fn spec_err(
    logitem: &mut LogItem,
    err: SpecErr,
) -> SpecErr {
    logitem.errstr = Some(err.to_string());

    err
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LogFormat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One element of a compiled log format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormatToken {
    /// `%X` with the byte following it as token delimiter
    Spec { spec: char, delim: Option<u8> },
    /// a verbatim byte; consumes one input byte
    Literal(u8),
    /// `~`; skip input whitespace
    SkipWs,
    /// `%{reject}h` with the byte following `h` as the hard delimiter
    Xff { reject: String, delim: Option<u8> },
}

/// A log format compiled to a token sequence, plus the space count of the
/// date format (needed by `%d` for space-padded syslog dates).
#[derive(Clone, Debug)]
pub struct LogFormat {
    pub tokens: Vec<FormatToken>,
    pub date_spaces: usize,
}

impl LogFormat {
    /// Compile a format string. Statically malformed formats (a `%`
    /// followed by whitespace, unclosed or empty `%{…}` braces) are
    /// rejected here, before any line is read.
    pub fn compile(
        lfmt: &str,
        date_format: &str,
    ) -> Result<LogFormat, FormatError> {
        let b: &[u8] = lfmt.as_bytes();
        let mut tokens: Vec<FormatToken> = Vec::with_capacity(b.len());
        let mut perc = false;
        let mut i: usize = 0;
        while i < b.len() {
            let c: u8 = b[i];
            if c == b'%' {
                perc = true;
                i += 1;
                continue;
            }
            if c == b'~' && !perc {
                tokens.push(FormatToken::SkipWs);
                i += 1;
                continue;
            }
            if perc {
                if c.is_ascii_whitespace() {
                    return Err(FormatError::SpecifierSpace);
                }
                if c == b'{' {
                    let (reject, consumed) = extract_braces(&b[i..])?;
                    i += consumed;
                    if i >= b.len() || b[i] != b'h' {
                        return Err(FormatError::BracesWithoutHost);
                    }
                    i += 1;
                    // the byte after `h` belongs to the construct
                    let delim: Option<u8> = b.get(i).copied();
                    if delim.is_some() {
                        i += 1;
                    }
                    tokens.push(FormatToken::Xff { reject, delim });
                    perc = false;
                    continue;
                }
                tokens.push(FormatToken::Spec {
                    spec: c as char,
                    delim: b.get(i + 1).copied(),
                });
                perc = false;
                i += 1;
                continue;
            }
            tokens.push(FormatToken::Literal(c));
            i += 1;
        }

        Ok(LogFormat {
            tokens,
            date_spaces: date_format.bytes().filter(|c| *c == b' ').count(),
        })
    }
}

/// Extract the reject character set from `{…}`, honoring backslash
/// escapes. Returns the set and the byte count consumed (past the `}`).
fn extract_braces(b: &[u8]) -> Result<(String, usize), FormatError> {
    let mut b1: Option<usize> = None;
    let mut b2: Option<usize> = None;
    let mut esc = false;
    for (j, c) in b.iter().enumerate() {
        if *c == b'\\' {
            esc = true;
        } else if *c == b'{' && !esc {
            b1 = Some(j);
        } else if *c == b'}' && !esc {
            b2 = Some(j);
            break;
        } else {
            esc = false;
        }
    }
    match (b1, b2) {
        (Some(p1), Some(p2)) if p2 > p1 + 1 => {
            let reject = String::from_utf8_lossy(&b[p1 + 1..p2]).into_owned();
            Ok((reject, p2 + 1))
        }
        _ => Err(FormatError::UnclosedBraces),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// token extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn trim_lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b)
        .trim()
        .to_string()
}

/// Find and extract a token from `*cur`.
///
/// Scans for the `cnt`-th unescaped occurrence of `delim` (end of input
/// when `delim` is `None`, or when too few delimiters remain). The cursor
/// is left *on* the delimiter. Returns `None` when the delimiter does not
/// occur at all; the extracted token is whitespace-trimmed and may be
/// empty.
pub(crate) fn parse_string(
    cur: &mut &[u8],
    delim: Option<u8>,
    cnt: usize,
) -> Option<String> {
    let b: &[u8] = *cur;
    if let Some(d) = delim {
        if !b.contains(&d) {
            return None;
        }
    }
    let mut idx: usize = 0;
    let mut i: usize = 0;
    loop {
        if i >= b.len() {
            let tkn = trim_lossy(b);
            *cur = &b[b.len()..];
            return Some(tkn);
        }
        let c: u8 = b[i];
        if let Some(d) = delim {
            // match number of delims
            if c == d {
                idx += 1;
                if idx == cnt {
                    let tkn = trim_lossy(&b[..i]);
                    *cur = &b[i..];
                    return Some(tkn);
                }
            }
        }
        // a backslash escapes the following byte
        if c == b'\\' {
            i += 1;
        }
        i += 1;
    }
}

/// Move the cursor forward while it points at whitespace.
fn find_alpha(cur: &mut &[u8]) {
    let b: &[u8] = *cur;
    let n: usize = b
        .iter()
        .take_while(|c| c.is_ascii_whitespace())
        .count();
    *cur = &b[n..];
}

/// Count the whitespace run at the head of `b`.
fn find_alpha_count(b: &[u8]) -> usize {
    b.iter()
        .take_while(|c| c.is_ascii_whitespace())
        .count()
}

/// Skip forward to the next occurrence of the delimiter (end of input when
/// there is none to find by an empty delimiter). Used when a directive's
/// field is already populated.
fn skip_to_delim(
    cur: &mut &[u8],
    delim: Option<u8>,
) {
    let b: &[u8] = *cur;
    match delim {
        Some(d) => {
            if let Some(pos) = b.iter().position(|c| *c == d) {
                *cur = &b[pos..];
            }
        }
        None => {
            *cur = &b[b.len()..];
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// the engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a compiled format over one line, populating `logitem`.
///
/// Stops at the first directive error; the error message is also recorded
/// on `logitem.errstr`.
pub fn parse_format(
    logitem: &mut LogItem,
    line: &str,
    fmt: &LogFormat,
    conf: &ParseConf,
    rt: &RuntimeFlags,
    classify: &dyn Classify,
) -> Result<(), SpecErr> {
    if line.is_empty() {
        return Err(SpecErr::LineInv);
    }
    let mut cur: &[u8] = line.as_bytes();
    for token in fmt.tokens.iter() {
        if cur.is_empty() {
            return Err(spec_err(logitem, SpecErr::LineInv));
        }
        if cur[0] == b'\n' {
            return Ok(());
        }
        match token {
            FormatToken::SkipWs => find_alpha(&mut cur),
            // a literal consumes one input byte, unverified
            FormatToken::Literal(_) => cur = &cur[1..],
            FormatToken::Spec { spec, delim } => {
                parse_specifier(logitem, &mut cur, *spec, *delim, fmt, conf, rt, classify)?;
            }
            FormatToken::Xff { reject, delim } => {
                find_xff_host(logitem, &mut cur, reject, *delim)?;
            }
        }
    }

    Ok(())
}

/// Parse one `%X` directive at the cursor.
#[allow(clippy::too_many_arguments)]
fn parse_specifier(
    logitem: &mut LogItem,
    cur: &mut &[u8],
    spec: char,
    delim: Option<u8>,
    fmt: &LogFormat,
    conf: &ParseConf,
    rt: &RuntimeFlags,
    classify: &dyn Classify,
) -> Result<(), SpecErr> {
    match spec {
        // date
        'd' => {
            if logitem.date.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            // Attempt to parse a date format containing spaces, i.e. the
            // syslog date (Jul 15, Nov  2). The input may carry padding
            // (Dec  2 vs Nov 22), so look ahead and count spaces until an
            // alphanumeric char.
            let fmtspcs: usize = fmt.date_spaces;
            let mut dspc: usize = 0;
            if fmtspcs > 0 {
                if let Some(pos) = cur.iter().position(|c| *c == b' ') {
                    dspc = find_alpha_count(&cur[pos..]);
                }
            }
            let tkn = match parse_string(cur, delim, dspc.max(fmtspcs) + 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let date = match parse_date(&tkn, &conf.date_format, &logitem.dt) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            let dt = date.and_time(logitem.dt.time());
            let fdate = match strf(&dt, &conf.date_num_format) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            logitem.numdate = match fdate.parse::<u32>() {
                Ok(val) => val,
                Err(_) => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            logitem.date = Some(fdate);
            logitem.dt = dt;
        }
        // time
        't' => {
            if logitem.time.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let time = match parse_time(&tkn, &conf.time_format) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            let dt = logitem.dt.date().and_time(time);
            let ftime = match strf(&dt, "%H:%M:%S") {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            logitem.time = Some(ftime);
            logitem.dt = dt;
        }
        // date/time as one token, e.g. an epoch timestamp
        'x' => {
            if logitem.time.is_some() && logitem.date.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let dt = match parse_datetime(&tkn, &conf.time_format, &logitem.dt) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            let fdate = strf(&dt, &conf.date_num_format);
            let ftime = strf(&dt, "%H:%M:%S");
            let (fdate, ftime) = match (fdate, ftime) {
                (Some(d), Some(t)) => (d, t),
                _ => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            logitem.numdate = match fdate.parse::<u32>() {
                Ok(val) => val,
                Err(_) => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            logitem.date = Some(fdate);
            logitem.time = Some(ftime);
            logitem.dt = dt;
        }
        // virtual host
        'v' => {
            if logitem.vhost.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            match parse_string(cur, delim, 1) {
                Some(tkn) => logitem.vhost = Some(tkn),
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            }
        }
        // remote user
        'e' => {
            if logitem.userid.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            match parse_string(cur, delim, 1) {
                Some(tkn) => logitem.userid = Some(tkn),
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            }
        }
        // cache status
        'C' => {
            if logitem.cache_status.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            if is_cache_hit(&tkn) {
                logitem.cache_status = Some(tkn);
            }
        }
        // remote hostname (IP only)
        'h' => {
            if logitem.host.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            // per RFC 3986 section 3.2.2 square brackets are possible
            let mut delim_h: Option<u8> = delim;
            if cur.first() == Some(&b'[') {
                let b: &[u8] = *cur;
                *cur = &b[1..];
                if !cur.is_empty() {
                    delim_h = Some(b']');
                }
            }
            let tkn = match parse_string(cur, delim_h, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            if !conf.no_ip_validation {
                let kind: TypeIp = ipaddr_kind(&tkn);
                if kind == TypeIp::Invalid {
                    return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn))));
                }
                logitem.type_ip = kind;
            }
            // require a valid host token (e.g. ord38s18-in-f14.1e100.net)
            // even when not validating the IP
            if conf.no_ip_validation && tkn.is_empty() {
                return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn))));
            }
            logitem.host = Some(tkn);
        }
        // request method
        'm' => {
            if logitem.method.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            match extract_method(&tkn) {
                Some(meth) => logitem.method = Some(meth.to_string()),
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            }
        }
        // request not including method or protocol
        'U' => {
            if logitem.req.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) if !val.is_empty() => val,
                _ => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            match decode_url(&tkn, conf.double_decode) {
                Some(req) => logitem.req = Some(req),
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            }
        }
        // query string alone, e.g. ?param=value&tbm=shop
        'q' => {
            if logitem.qstr.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) if !val.is_empty() => val,
                _ => return Ok(()),
            };
            logitem.qstr = decode_url(&tkn, conf.double_decode);
        }
        // request protocol
        'H' => {
            if logitem.protocol.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            match extract_protocol(&tkn) {
                Some(proto) => logitem.protocol = Some(proto.to_string()),
                None => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            }
        }
        // request, including method + protocol
        'r' => {
            if logitem.req.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) if !val.is_empty() => val,
                _ => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let (req, method, protocol) = parse_req(
                &tkn,
                conf.append_method,
                conf.append_protocol,
                conf.double_decode,
            );
            logitem.req = Some(req);
            if method.is_some() {
                logitem.method = method;
            }
            if protocol.is_some() {
                logitem.protocol = protocol;
            }
        }
        // status code
        's' => {
            if logitem.status >= 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let status: i32 = match tkn.parse::<i32>() {
                Ok(val) => val,
                Err(_) => return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn)))),
            };
            if !conf.no_strict_status && !is_valid_http_status(status) {
                return Err(spec_err(logitem, SpecErr::ToknInv(spec, Some(tkn))));
            }
            logitem.status = status;
        }
        // size of response in bytes, excluding HTTP headers
        'b' => {
            if logitem.resp_size != 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            logitem.resp_size = tkn.parse::<u64>().unwrap_or(0);
            rt.set_bandwidth();
        }
        // referer
        'R' => {
            if logitem.referer.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let mut tkn: String = parse_string(cur, delim, 1).unwrap_or_default();
            if tkn.is_empty() {
                tkn = String::from("-");
            }
            if tkn != "-" {
                if let Some(keyphrase) = extract_keyphrase(&tkn, conf.double_decode) {
                    logitem.keyphrase = Some(keyphrase);
                }
                if let Some(site) = extract_referer_site(&tkn) {
                    logitem.site = site;
                }
                // hide referers from the report
                if classify.hide_referer(&logitem.site) {
                    logitem.site.clear();
                } else {
                    logitem.referer = Some(tkn);
                }
                return Ok(());
            }
            logitem.referer = Some(tkn);
        }
        // user agent
        'u' => {
            if logitem.agent.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            match parse_string(cur, delim, 1) {
                Some(tkn) if !tkn.is_empty() => {
                    // make sure the user agent is decoded (i.e. CloudFront)
                    logitem.agent =
                        Some(decode_url(&tkn, conf.double_decode).unwrap_or_default());
                    classify.set_browser_os(logitem);
                    logitem.set_agent_hash();
                }
                _ => {
                    logitem.agent = Some(String::from("-"));
                    logitem.set_agent_hash();
                }
            }
        }
        // time to serve the request, milliseconds
        'L' => {
            if logitem.serve_time != 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let msecs: u64 = tkn.parse::<u64>().unwrap_or(0);
            logitem.serve_time = msecs.saturating_mul(MILS);
            rt.set_serve_usecs();
        }
        // time to serve the request, seconds with optional fraction
        'T' => {
            if logitem.serve_time != 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let secs: f64 = if tkn.contains('.') {
                tkn.parse::<f64>().unwrap_or(0.0)
            } else {
                tkn.parse::<u64>().unwrap_or(0) as f64
            };
            logitem.serve_time = if secs > 0.0 {
                (secs * SECS as f64) as u64
            } else {
                0
            };
            rt.set_serve_usecs();
        }
        // time to serve the request, microseconds
        'D' => {
            if logitem.serve_time != 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            logitem.serve_time = tkn.parse::<u64>().unwrap_or(0);
            rt.set_serve_usecs();
        }
        // time to serve the request, nanoseconds
        'n' => {
            if logitem.serve_time != 0 {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            let nsecs: u64 = tkn.parse::<u64>().unwrap_or(0);
            logitem.serve_time = nsecs / MILS;
            rt.set_serve_usecs();
        }
        // TLS cipher suite, either by name or by decimal IANA code
        'k' => {
            if logitem.tls_cypher.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            if tkn.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(code) = tkn.parse::<u16>() {
                    if let Some((cypher, version)) = classify.tls_cipher(code) {
                        logitem.tls_cypher = Some(cypher);
                        logitem.tls_type = Some(version);
                    }
                }
            } else {
                logitem.tls_cypher = Some(tkn);
            }
        }
        // TLS parameters, like "TLSv1.2"
        'K' => {
            if logitem.tls_type.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            match parse_string(cur, delim, 1) {
                Some(tkn) => logitem.tls_type = Some(tkn),
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            }
        }
        // MIME type, like "text/html"
        'M' => {
            if logitem.mime_type.is_some() {
                skip_to_delim(cur, delim);
                return Ok(());
            }
            let tkn = match parse_string(cur, delim, 1) {
                Some(val) => val,
                None => return Err(spec_err(logitem, SpecErr::ToknNul(spec))),
            };
            logitem.mime_type = normalize_mime_type(&tkn);
        }
        // move forward through the input until not a space
        '~' => find_alpha(cur),
        // everything else skips one token
        _ => skip_to_delim(cur, delim),
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// X-Forwarded-For
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a `%{reject}h` directive at the cursor.
///
/// When the hard delimiter (the format byte following the construct) is
/// not part of the reject set and occurs in the input, the surrounding
/// token is sliced out first and address scanning stops at the first valid
/// IP; otherwise scanning runs over the remaining input without advancing
/// the cursor.
fn find_xff_host(
    logitem: &mut LogItem,
    cur: &mut &[u8],
    reject: &str,
    delim: Option<u8>,
) -> Result<(), SpecErr> {
    if let Some(d) = delim {
        if !reject.as_bytes().contains(&d) && cur.contains(&d) {
            let extract = match parse_string(cur, Some(d), 1) {
                Some(val) => val,
                None => return Ok(()),
            };
            set_xff_host(logitem, &extract, reject, true);
            // move a byte forward from the trailing delim
            if !cur.is_empty() {
                let b: &[u8] = *cur;
                *cur = &b[1..];
            }
            if logitem.host.is_none() {
                return Err(spec_err(logitem, SpecErr::ToknNul('h')));
            }
            return Ok(());
        }
    }
    let remainder: String = String::from_utf8_lossy(*cur).into_owned();
    set_xff_host(logitem, &remainder, reject, false);
    if logitem.host.is_none() {
        return Err(spec_err(logitem, SpecErr::ToknNul('h')));
    }

    Ok(())
}

/// Scan an X-Forwarded-For-like field for the client IP.
///
/// The first valid address becomes the host; once a host is on hand, a
/// non-address token ends the scan. With `first_only` the scan stops right
/// after the host is found.
fn set_xff_host(
    logitem: &mut LogItem,
    field: &str,
    skips: &str,
    first_only: bool,
) {
    let b: &[u8] = field.as_bytes();
    let skipb: &[u8] = skips.as_bytes();
    let mut i: usize = 0;
    let mut base: usize = 0;
    let mut idx: usize = 0;
    while i < b.len() {
        let len: usize = b[i..]
            .iter()
            .take_while(|c| !skipb.contains(c))
            .count();
        if len == 0 {
            i += 1;
            base += 1;
            idx += 1;
            continue;
        }
        // short of the delimiter count with a client IP on hand means the
        // XFF list has ended
        if idx < skipb.len() && logitem.host.is_some() {
            break;
        }
        i += len;
        let tkn: String = trim_lossy(&b[base..i]);
        let kind: TypeIp = ipaddr_kind(&tkn);
        let valid: bool = kind != TypeIp::Invalid;
        if logitem.host.is_some() && !valid {
            break;
        }
        if logitem.host.is_none() && valid {
            logitem.host = Some(tkn);
            logitem.type_ip = kind;
        }
        idx = 0;
        if logitem.host.is_some() && first_only {
            break;
        }
        base += len;
    }
}

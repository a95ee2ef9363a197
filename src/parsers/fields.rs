// src/parsers/fields.rs

//! Field extractors: the per-token decoders the directive engine calls.
//!
//! Everything here is pure string-in/value-out; the directive engine in
//! [`format`] owns cursor movement and error signaling.
//!
//! [`format`]: crate::parsers::format

use crate::common::{MAX_MIME_OUT, REF_SITE_LEN};
use crate::data::logitem::TypeIp;

use ::lazy_static::lazy_static;
use ::percent_encoding::percent_decode_str;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// static vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Known HTTP methods, canonical spelling. Matched by case-insensitive
/// prefix, so table order matters for overlapping names.
const HTTP_METHODS: &[&str] = &[
    "OPTIONS",
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "TRACE",
    "CONNECT",
    "PATCH",
    "SEARCH",
    // WebDAV
    "PROPFIND",
    "PROPPATCH",
    "MKCOL",
    "COPY",
    "MOVE",
    "LOCK",
    "UNLOCK",
    "VERSION-CONTROL",
    "REPORT",
    "CHECKOUT",
    "CHECKIN",
    "UNCHECKOUT",
    "MKWORKSPACE",
    "UPDATE",
    "LABEL",
    "MERGE",
    "BASELINE-CONTROL",
    "MKACTIVITY",
    "ORDERPATCH",
];

/// Known HTTP protocol tokens, canonical spelling.
const HTTP_PROTOCOLS: &[&str] = &[
    "HTTP/1.0",
    "HTTP/1.1",
    "HTTP/2",
    "HTTP/3",
];

/// Cache status vocabulary accepted by `%C`.
const CACHE_STATUSES: &[&str] = &[
    "MISS",
    "BYPASS",
    "EXPIRED",
    "STALE",
    "UPDATING",
    "REVALIDATED",
    "HIT",
];

lazy_static! {
    /// Registered (or at least widely deployed) HTTP status codes, sorted
    /// for binary search.
    static ref VALID_STATUS_CODES: Vec<i32> = {
        let mut codes: Vec<i32> = Vec::with_capacity(96);
        codes.extend(100..=103);
        codes.extend(200..=208);
        codes.extend([218, 226]);
        codes.extend(300..=308);
        codes.extend(400..=431);
        codes.extend([440, 444, 449, 450, 451, 460, 463, 464]);
        codes.extend(494..=499);
        codes.extend(500..=511);
        codes.extend(520..=530);
        codes.extend([561, 598, 599]);
        debug_assert!(codes.windows(2).all(|w| w[0] < w[1]));

        codes
    };
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// extractors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Percent-decode a URL-encoded string, optionally twice, strip CR/LF, and
/// trim surrounding whitespace.
///
/// An empty result is `None`.
pub fn decode_url(
    url: &str,
    double_decode: bool,
) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    let mut out: String = percent_decode_str(url)
        .decode_utf8_lossy()
        .into_owned();
    // double encoded URL?
    if double_decode {
        out = percent_decode_str(&out)
            .decode_utf8_lossy()
            .into_owned();
    }
    out.retain(|c| c != '\r' && c != '\n');
    let trimmed: &str = out.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(trimmed.to_string())
}

/// Match the beginning of `tkn` against the known HTTP methods.
/// On a match the canonical uppercase spelling is returned.
pub fn extract_method(tkn: &str) -> Option<&'static str> {
    let tb: &[u8] = tkn.as_bytes();
    HTTP_METHODS
        .iter()
        .find(|m| {
            let mb: &[u8] = m.as_bytes();
            tb.len() >= mb.len() && tb[..mb.len()].eq_ignore_ascii_case(mb)
        })
        .copied()
}

/// Match the beginning of `tkn` against the known HTTP protocol tokens.
/// On a match the canonical uppercase spelling is returned.
pub fn extract_protocol(tkn: &str) -> Option<&'static str> {
    let tb: &[u8] = tkn.as_bytes();
    HTTP_PROTOCOLS
        .iter()
        .find(|p| {
            let pb: &[u8] = p.as_bytes();
            tb.len() >= pb.len() && tb[..pb.len()].eq_ignore_ascii_case(pb)
        })
        .copied()
}

/// Is `tkn` one of the known upstream cache statuses?
pub fn is_cache_hit(tkn: &str) -> bool {
    CACHE_STATUSES
        .iter()
        .any(|s| tkn.eq_ignore_ascii_case(s))
}

/// Split a `%r` request line into the request itself and, when configured,
/// the canonical method and protocol.
///
/// The method is located by prefix; the protocol must follow the *last*
/// space of the line. A line without a recognizable method is taken as the
/// whole request. A line with a method but no trailing protocol (or an
/// empty middle) yields the literal `"-"`, which downstream treats as a
/// valid request.
pub fn parse_req(
    line: &str,
    append_method: bool,
    append_protocol: bool,
    double_decode: bool,
) -> (String, Option<String>, Option<String>) {
    let mut method: Option<String> = None;
    let mut protocol: Option<String> = None;

    let request: String = match extract_method(line) {
        // couldn't find a method, so use the whole request line
        None => line.to_string(),
        Some(meth) => {
            let rest: &str = &line[meth.len()..];
            let sp: usize = match rest.rfind(' ') {
                Some(val) => val,
                None => return (String::from("-"), method, protocol),
            };
            let proto: &'static str = match extract_protocol(&rest[sp + 1..]) {
                Some(val) => val,
                None => return (String::from("-"), method, protocol),
            };
            // the byte after the method separates it from the request
            if sp <= 1 {
                return (String::from("-"), method, protocol);
            }
            if append_method {
                method = Some(meth.to_string());
            }
            if append_protocol {
                protocol = Some(proto.to_string());
            }

            rest[1..sp].to_string()
        }
    };

    match decode_url(&request, double_decode) {
        Some(dreq) => (dreq, method, protocol),
        None => (request, method, protocol),
    }
}

/// Extract the search keyphrase from a Google search, cache, or translate
/// referer. The referer has deliberately *not* been URL-decoded yet since
/// the query itself may contain `&`.
pub fn extract_keyphrase(
    referer: &str,
    double_decode: bool,
) -> Option<String> {
    if !(referer.contains("http://www.google.")
        || referer.contains("http://webcache.googleusercontent.com/")
        || referer.contains("http://translate.googleusercontent.com/")
        || referer.contains("https://www.google.")
        || referer.contains("https://webcache.googleusercontent.com/")
        || referer.contains("https://translate.googleusercontent.com/"))
    {
        return None;
    }

    let mut encoded = false;
    let start: usize;
    if referer.contains("/+&") {
        return None;
    } else if let Some(p) = referer.find("/+") {
        start = p + 2;
    } else if let Some(p) = referer.find("q=cache:") {
        start = match referer[p..].find('+') {
            Some(plus) => p + plus + 1,
            None => p,
        };
    } else if let Some(p) = referer.find("&q=").or_else(|| referer.find("?q=")) {
        start = p + 3;
    } else if let Some(p) = referer
        .find("%26q%3D")
        .or_else(|| referer.find("%3Fq%3D"))
    {
        encoded = true;
        start = p + 7;
    } else {
        return None;
    }

    let mut slice: &str = &referer[start..];
    if !encoded {
        if let Some(amp) = slice.find('&') {
            slice = &slice[..amp];
        }
    } else if let Some(amp) = slice.find("%26") {
        slice = &slice[..amp];
    }

    let decoded: String = decode_url(slice, double_decode)?;
    let phrase: String = decoded.replace('+', " ");
    let phrase: &str = phrase.trim();
    if phrase.is_empty() {
        return None;
    }

    Some(phrase.to_string())
}

/// Extract the *host* part of a referring URI,
/// i.e. `//www.example.com/path?googleguy` → `www.example.com`,
/// truncated to [`REF_SITE_LEN`] bytes.
pub fn extract_referer_site(referer: &str) -> Option<String> {
    if referer.is_empty() {
        return None;
    }
    let begin: &str = match referer.find("//") {
        Some(p) => &referer[p + 2..],
        None => return None,
    };
    if begin.is_empty() {
        return None;
    }
    let end: usize = begin
        .find(|c| c == '/' || c == '?')
        .unwrap_or(begin.len());
    if end == 0 {
        return None;
    }
    let mut len: usize = end.min(REF_SITE_LEN);
    while len > 0 && !begin.is_char_boundary(len) {
        len -= 1;
    }

    Some(begin[..len].to_string())
}

/// Classify a host token as IPv4, IPv6, or neither.
pub fn ipaddr_kind(s: &str) -> TypeIp {
    if s.parse::<std::net::Ipv4Addr>().is_ok() {
        return TypeIp::Ipv4;
    }
    if s.parse::<std::net::Ipv6Addr>().is_ok() {
        return TypeIp::Ipv6;
    }

    TypeIp::Invalid
}

/// Is `code` a registered (or at least widely deployed) HTTP status code?
pub fn is_valid_http_status(code: i32) -> bool {
    VALID_STATUS_CODES.binary_search(&code).is_ok()
}

/// Normalize a MIME field: split on `;` and `,`, trim, lowercase, rejoin
/// with `"; "`, and cap at [`MAX_MIME_OUT`] bytes.
pub fn normalize_mime_type(mime: &str) -> Option<String> {
    if mime.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(mime.len().min(MAX_MIME_OUT));
    let mut first = true;
    for tkn in mime.split(|c| c == ';' || c == ',') {
        let tkn: &str = tkn.trim();
        if tkn.is_empty() {
            continue;
        }
        if !first {
            out.push_str("; ");
        }
        first = false;
        out.push_str(&tkn.to_ascii_lowercase());
    }
    if out.len() > MAX_MIME_OUT {
        let mut len: usize = MAX_MIME_OUT;
        while len > 0 && !out.is_char_boundary(len) {
            len -= 1;
        }
        out.truncate(len);
    }
    if out.is_empty() {
        return None;
    }

    Some(out)
}

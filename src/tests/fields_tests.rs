// src/tests/fields_tests.rs

//! tests for `fields.rs` extractors

use crate::data::logitem::{djb2, TypeIp};
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

use ::test_case::test_case;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test_case("%2Fpath%20x", false, Some("/path x"); "simple")]
#[test_case("%252F", true, Some("/"); "double decode")]
#[test_case("%252F", false, Some("%2F"); "single decode leaves one layer")]
#[test_case("plain", false, Some("plain"); "nothing encoded")]
#[test_case("  spaced  ", false, Some("spaced"); "trimmed")]
#[test_case("%0D%0A", false, None; "only CRLF decodes to nothing")]
#[test_case("", false, None; "empty")]
fn test_decode_url(
    url: &str,
    double: bool,
    expect: Option<&str>,
) {
    assert_eq!(decode_url(url, double).as_deref(), expect);
}

#[test]
fn test_decode_url_strips_newlines() {
    assert_eq!(decode_url("a%0Ab", false).as_deref(), Some("ab"));
}

#[test_case("GET /x HTTP/1.0", Some("GET"))]
#[test_case("get /x", Some("GET"); "case insensitive")]
#[test_case("PROPFIND /dav", Some("PROPFIND"))]
#[test_case("BREW /coffee", None)]
#[test_case("", None; "empty token")]
fn test_extract_method(
    tkn: &str,
    expect: Option<&str>,
) {
    assert_eq!(extract_method(tkn), expect);
}

#[test_case("HTTP/1.0", Some("HTTP/1.0"))]
#[test_case("http/1.1", Some("HTTP/1.1"); "case insensitive")]
#[test_case("HTTP/2", Some("HTTP/2"))]
#[test_case("HTTP/2.0", Some("HTTP/2"); "prefix match yields canonical")]
#[test_case("HTTP/3", Some("HTTP/3"))]
#[test_case("SPDY/3", None)]
fn test_extract_protocol(
    tkn: &str,
    expect: Option<&str>,
) {
    assert_eq!(extract_protocol(tkn), expect);
}

#[test]
fn test_parse_req_clf() {
    let (req, method, protocol) = parse_req("GET /apache_pb.gif HTTP/1.0", true, true, false);
    assert_eq!(req, "/apache_pb.gif");
    assert_eq!(method.as_deref(), Some("GET"));
    assert_eq!(protocol.as_deref(), Some("HTTP/1.0"));
}

#[test]
fn test_parse_req_no_appends() {
    let (req, method, protocol) = parse_req("GET /x HTTP/1.1", false, false, false);
    assert_eq!(req, "/x");
    assert_eq!(method, None);
    assert_eq!(protocol, None);
}

#[test]
fn test_parse_req_no_protocol_yields_dash() {
    let (req, method, protocol) = parse_req("GET /x", true, true, false);
    assert_eq!(req, "-");
    assert_eq!(method, None);
    assert_eq!(protocol, None);
}

#[test]
fn test_parse_req_empty_middle_yields_dash() {
    let (req, _, _) = parse_req("GET  HTTP/1.0", true, true, false);
    assert_eq!(req, "-");
}

#[test]
fn test_parse_req_no_method_keeps_line() {
    let (req, method, _) = parse_req("whatever this is", true, true, false);
    assert_eq!(req, "whatever this is");
    assert_eq!(method, None);
}

#[test]
fn test_parse_req_decodes() {
    let (req, _, _) = parse_req("GET /a%20b HTTP/1.1", true, true, false);
    assert_eq!(req, "/a b");
}

#[test_case("https://www.google.com/search?q=load+balancer&hl=en", Some("load balancer"); "spec scenario")]
#[test_case("https://www.google.de/url?q=rust+parser", Some("rust parser"); "country tld")]
#[test_case("https://www.google.com/url?%3Fq%3Dencoded%26x", Some("encoded"); "query encoded form")]
#[test_case("https://www.example.com/?q=nope", None; "not a google referer")]
#[test_case("https://www.google.com/", None; "no query")]
fn test_extract_keyphrase(
    referer: &str,
    expect: Option<&str>,
) {
    assert_eq!(extract_keyphrase(referer, false).as_deref(), expect);
}

#[test_case("https://www.google.com/search?q=x", Some("www.google.com"))]
#[test_case("http://example.com", Some("example.com"); "no path")]
#[test_case("//cdn.example.com/lib.js", Some("cdn.example.com"); "scheme relative")]
#[test_case("mailto:root", None; "no slashes")]
#[test_case("", None; "empty")]
fn test_extract_referer_site(
    referer: &str,
    expect: Option<&str>,
) {
    assert_eq!(extract_referer_site(referer).as_deref(), expect);
}

#[test_case("127.0.0.1", TypeIp::Ipv4)]
#[test_case("203.0.113.9", TypeIp::Ipv4)]
#[test_case("2001:db8::1", TypeIp::Ipv6)]
#[test_case("::1", TypeIp::Ipv6)]
#[test_case("999.1.1.1", TypeIp::Invalid)]
#[test_case("example.com", TypeIp::Invalid)]
#[test_case("", TypeIp::Invalid)]
fn test_ipaddr_kind(
    s: &str,
    expect: TypeIp,
) {
    assert_eq!(ipaddr_kind(s), expect);
}

#[test_case(200, true)]
#[test_case(404, true)]
#[test_case(444, true; "nginx no-response")]
#[test_case(599, true)]
#[test_case(99, false)]
#[test_case(600, false)]
#[test_case(-1, false)]
fn test_is_valid_http_status(
    code: i32,
    expect: bool,
) {
    assert_eq!(is_valid_http_status(code), expect);
}

#[test_case("HIT", true)]
#[test_case("hit", true; "case insensitive")]
#[test_case("REVALIDATED", true)]
#[test_case("None", false)]
#[test_case("", false)]
fn test_is_cache_hit(
    tkn: &str,
    expect: bool,
) {
    assert_eq!(is_cache_hit(tkn), expect);
}

#[test]
fn test_normalize_mime_type() {
    assert_eq!(
        normalize_mime_type("text/html; charset=UTF-8").as_deref(),
        Some("text/html; charset=utf-8"),
    );
    assert_eq!(
        normalize_mime_type("Application/JSON , text/plain").as_deref(),
        Some("application/json; text/plain"),
    );
    assert_eq!(normalize_mime_type("  ;  ,  "), None);
    assert_eq!(normalize_mime_type(""), None);
}

#[test]
fn test_djb2_known_values() {
    // hand-computed: 5381 * 33 + 45
    assert_eq!(djb2(b"-"), 177_618);
    assert_eq!(format!("{:x}", djb2(b"-")), "2b5d2");
    assert_eq!(djb2(b""), 5381);
}

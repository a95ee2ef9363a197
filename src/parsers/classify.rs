// src/parsers/classify.rs

//! The line classifier: ignore/validate policy applied after a successful
//! parse.

use crate::config::{IgnoreStatics, ParseConf};
use crate::data::logitem::{IgnoreLevel, LogItem};
use crate::storage::Classify;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ensure the fields no record can do without.
///
/// On a missing field the diagnostic is recorded on `errstr` and `true` is
/// returned.
pub fn verify_missing_fields(logitem: &mut LogItem) -> bool {
    if logitem.host.is_none() {
        logitem.errstr = Some(String::from(
            "IPv4/6 is required. You have to add format specifier '%h' [host (the client IP address, either IPv4 or IPv6)] to your log-format.",
        ));
    } else if logitem.date.is_none() {
        logitem.errstr = Some(String::from(
            "A valid date is required. You have to add format specifier '%x' [Datetime] or '%d' [Date] and '%t' [Time] to your log-format.",
        ));
    } else if logitem.req.is_none() {
        logitem.errstr = Some(String::from(
            "A request is required. Your log-format is missing format specifier '%r' [The request line from the client] or combination of special format specifiers such as '%m', '%U', '%q' and '%H' to parse individual fields.",
        ));
    }

    logitem.errstr.is_some()
}

/// Crawler policy: drop known bots, or everything *but* known bots.
fn crawler_ignored(
    agent: &str,
    conf: &ParseConf,
    classify: &dyn Classify,
) -> bool {
    if !conf.ignore_crawlers && !conf.crawlers_only {
        return false;
    }
    let bot: bool = classify.is_crawler(agent);

    (conf.ignore_crawlers && bot) || (conf.crawlers_only && !bot)
}

/// Is the status code on the ignore list? Status `0` never is.
fn ignore_status_code(
    status: i32,
    conf: &ParseConf,
) -> bool {
    if status == 0 || conf.ignore_status.is_empty() {
        return false;
    }

    conf.ignore_status.contains(&status)
}

/// Determine if the given request is a static asset (jpg, css, js, …).
///
/// With `all_static_files` the extension is also probed right before a
/// `?`, so `/download.zip?token=…` counts.
pub fn is_static_req(
    req: &str,
    conf: &ParseConf,
) -> bool {
    if req.is_empty() {
        return false;
    }
    let rb: &[u8] = req.as_bytes();
    for ext in conf.static_files.iter() {
        if ext.is_empty() {
            continue;
        }
        let eb: &[u8] = ext.as_bytes();
        let elen: usize = eb.len();
        if conf.all_static_files {
            if let Some(q) = req.find('?') {
                if q > elen {
                    if rb[q - elen..q].eq_ignore_ascii_case(eb) {
                        return true;
                    }
                    continue;
                }
            }
        }
        if rb.len() > elen && rb[rb.len() - elen..].eq_ignore_ascii_case(eb) {
            return true;
        }
    }

    false
}

/// Drop the query string from a request, e.g.
/// `/index.php?timestamp=1454385289`.
pub fn strip_qstring(req: &mut String) {
    if let Some(q) = req.find('?') {
        if q > 0 {
            req.truncate(q);
        }
    }
}

/// Is this a 404 (or a 444 configured to count as one)?
pub fn is_404(
    logitem: &LogItem,
    conf: &ParseConf,
) -> bool {
    logitem.status == 404 || (logitem.status == 444 && conf.code444_as_404)
}

/// Apply the ignore policy, in order: excluded IP, crawler policy, ignored
/// referer, ignored status, static asset. A kept line additionally gets
/// its query string stripped when so configured.
pub fn ignore_line(
    logitem: &mut LogItem,
    conf: &ParseConf,
    classify: &dyn Classify,
) -> IgnoreLevel {
    if classify.excluded_ip(logitem) {
        return IgnoreLevel::Panel;
    }
    let agent: &str = logitem.agent.as_deref().unwrap_or("-");
    if crawler_ignored(agent, conf, classify) {
        return IgnoreLevel::Panel;
    }
    if classify.ignore_referer(logitem.referer.as_deref().unwrap_or("")) {
        return IgnoreLevel::Panel;
    }
    if ignore_status_code(logitem.status, conf) {
        return IgnoreLevel::Panel;
    }
    if conf.ignore_statics != IgnoreStatics::Off {
        if let Some(req) = logitem.req.as_deref() {
            if is_static_req(req, conf) {
                return match conf.ignore_statics {
                    IgnoreStatics::Panel => IgnoreLevel::Panel,
                    _ => IgnoreLevel::Req,
                };
            }
        }
    }
    // check if we need to remove the request's query string
    if conf.ignore_qstr {
        if let Some(req) = logitem.req.as_mut() {
            strip_qstring(req);
        }
    }

    IgnoreLevel::Keep
}
